use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        product::{self, Entity as ProductEntity, Model as ProductModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, EntityTrait, LoaderTrait,
    ModelTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// One submitted cart line. `name`, `image` and `price` are snapshotted
/// onto the order as-is; only existence and stock are checked against the
/// catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image: String,
    pub price: i64,
    pub quantity: i32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ShippingAddressInput {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

/// Request body for placing an order. Pricing fields are persisted as
/// submitted; the server does not recompute totals at placement time.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub order_items: Vec<OrderItemInput>,
    #[serde(default)]
    pub shipping_address: ShippingAddressInput,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub items_price: i64,
    #[serde(default)]
    pub tax_price: i64,
    #[serde(default)]
    pub shipping_price: i64,
    #[serde(default)]
    pub discount_amount: i64,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub total_price: i64,
}

/// Query parameters for the admin order listing.
#[derive(Debug, Default, Deserialize)]
pub struct AdminOrderQuery {
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time.
    pub to: Option<DateTime<Utc>>,
    /// Keep only orders that count as revenue (paid or delivered).
    #[serde(default)]
    pub revenue_only: bool,
    pub is_paid: Option<bool>,
}

/// An order with its line items, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: OrderModel,
    pub order_items: Vec<OrderItemModel>,
}

/// Order placement and lifecycle management.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Places an order for `user_id`.
    ///
    /// The order and its lines are written in one transaction; stock is
    /// decremented afterwards per line with a conditional update that never
    /// drives stock negative. Decrement failures are logged, not surfaced.
    #[instrument(skip(self, request), fields(user_id = %user_id, lines = request.order_items.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        Self::check_submission(&request)?;

        let db = &*self.db_pool;

        let product_ids: Vec<Uuid> = request.order_items.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, ProductModel> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let catalog_items_price = Self::check_lines(&request.order_items, &products)?;
        if catalog_items_price != request.items_price {
            warn!(
                submitted = request.items_price,
                catalog = catalog_items_price,
                "Submitted items price disagrees with catalog prices"
            );
        }

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_id = Uuid::new_v4();
        let shipping = &request.shipping_address;
        let order_active_model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            full_name: Set(shipping.full_name.trim().to_string()),
            phone: Set(shipping.phone.trim().to_string()),
            address: Set(shipping.address.trim().to_string()),
            payment_method: Set(request.payment_method.trim().to_string()),
            items_price: Set(request.items_price),
            tax_price: Set(request.tax_price),
            shipping_price: Set(request.shipping_price),
            discount_amount: Set(request.discount_amount),
            coupon_code: Set(request.coupon_code.clone()),
            total_price: Set(request.total_price),
            is_paid: Set(false),
            paid_at: Set(None),
            is_delivered: Set(false),
            delivered_at: Set(None),
            ..Default::default()
        };

        let order_model = order_active_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        let mut line_models = Vec::with_capacity(request.order_items.len());
        for line in &request.order_items {
            let line_model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                image: Set(line.image.clone()),
                price: Set(line.price),
                quantity: Set(line.quantity),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to create order line");
                ServiceError::DatabaseError(e)
            })?;
            line_models.push(line_model);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        // Best-effort from here on: the order stands even when a decrement
        // does not land.
        for line in &request.order_items {
            match ProductEntity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(line.quantity),
                )
                .filter(product::Column::Id.eq(line.product_id))
                .filter(product::Column::Stock.gte(line.quantity))
                .exec(db)
                .await
            {
                Ok(result) if result.rows_affected == 0 => {
                    warn!(
                        order_id = %order_id,
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        "Stock decrement skipped, product gone or stock now below quantity"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        error = %e,
                        order_id = %order_id,
                        product_id = %line.product_id,
                        "Stock decrement failed"
                    );
                }
            }
        }

        info!(order_id = %order_id, user_id = %user_id, total_price = request.total_price, "Order created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order created event");
            }
        }

        Ok(OrderResponse {
            order: order_model,
            order_items: line_models,
        })
    }

    /// Fetches one order with its lines. Customers can only read their own
    /// orders; admins can read any.
    #[instrument(skip(self, caller), fields(order_id = %order_id, caller_id = %caller.user_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.user_id != caller.user_id && !caller.is_admin() {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }

        let order_items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        Ok(OrderResponse { order, order_items })
    }

    /// Lists the caller's orders, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_my_orders(&self, user_id: Uuid) -> Result<Vec<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;

        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await?;

        let items = orders.load_many(OrderItemEntity, db).await?;

        Ok(orders
            .into_iter()
            .zip(items)
            .map(|(order, order_items)| OrderResponse { order, order_items })
            .collect())
    }

    /// Lists all orders (admin), newest first, with optional creation-date
    /// window and paid/revenue filters.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        query: AdminOrderQuery,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;

        let mut select = OrderEntity::find();
        if let Some(from) = query.from {
            select = select.filter(order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = query.to {
            select = select.filter(order::Column::CreatedAt.lte(to));
        }
        if query.revenue_only {
            select = select.filter(
                Condition::any()
                    .add(order::Column::IsPaid.eq(true))
                    .add(order::Column::IsDelivered.eq(true)),
            );
        } else if let Some(is_paid) = query.is_paid {
            select = select.filter(order::Column::IsPaid.eq(is_paid));
        }

        let orders = select
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await?;

        let items = orders.load_many(OrderItemEntity, db).await?;

        Ok(orders
            .into_iter()
            .zip(items)
            .map(|(order, order_items)| OrderResponse { order, order_items })
            .collect())
    }

    /// Marks an order paid. Re-marking a paid order is a success no-op that
    /// keeps the original paid_at.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_paid(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.is_paid {
            return Ok(order);
        }

        let now = Utc::now();
        let mut active_model: order::ActiveModel = order.into();
        active_model.is_paid = Set(true);
        active_model.paid_at = Set(Some(now));

        let updated = active_model.update(db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to mark order as paid");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, "Order marked as paid");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderPaid(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order paid event");
            }
        }

        Ok(updated)
    }

    /// Marks an order delivered (admin). An unpaid order is marked paid at
    /// the same instant, since a delivered COD order is revenue. Re-marking
    /// a delivered order is a success no-op.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.is_delivered {
            return Ok(order);
        }

        let now = Utc::now();
        let was_paid = order.is_paid;
        let mut active_model: order::ActiveModel = order.into();
        active_model.is_delivered = Set(true);
        active_model.delivered_at = Set(Some(now));
        if !was_paid {
            active_model.is_paid = Set(true);
            active_model.paid_at = Set(Some(now));
        }

        let updated = active_model.update(db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to mark order as delivered");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, backfilled_payment = !was_paid, "Order marked as delivered");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderDelivered(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order delivered event");
            }
        }

        Ok(updated)
    }

    /// Deletes an order (admin), returning each line's quantity to stock
    /// first. Restock failures are logged and the deletion proceeds.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let order_items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        for line in &order_items {
            if let Err(e) = ProductEntity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).add(line.quantity),
                )
                .filter(product::Column::Id.eq(line.product_id))
                .exec(db)
                .await
            {
                error!(
                    error = %e,
                    order_id = %order_id,
                    product_id = %line.product_id,
                    "Restock failed while deleting order"
                );
            }
        }

        // Lines go with the order via the cascading foreign key.
        order.delete(db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to delete order");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, restocked_lines = order_items.len(), "Order deleted");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderDeleted(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order deleted event");
            }
        }

        Ok(())
    }

    /// First three rungs of the placement ladder, in submission order.
    fn check_submission(request: &CreateOrderRequest) -> Result<(), ServiceError> {
        if request.order_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "No items in the order".to_string(),
            ));
        }

        let shipping = &request.shipping_address;
        if shipping.full_name.trim().is_empty()
            || shipping.phone.trim().is_empty()
            || shipping.address.trim().is_empty()
        {
            return Err(ServiceError::ValidationError(
                "Shipping information is incomplete".to_string(),
            ));
        }

        if request.payment_method.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Payment method is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Checks every line against the resolved catalog rows and returns the
    /// catalog-priced subtotal for the submitted quantities.
    fn check_lines(
        lines: &[OrderItemInput],
        products: &HashMap<Uuid, ProductModel>,
    ) -> Result<i64, ServiceError> {
        let mut catalog_items_price = 0i64;

        for line in lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity must be positive: {}",
                    line.name
                )));
            }

            let product = products
                .get(&line.product_id)
                .ok_or_else(|| ServiceError::NotFound(format!("Product not found: {}", line.name)))?;

            if product.stock < line.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Product \"{}\" does not have enough stock (only {} left)",
                    line.name, product.stock
                )));
            }

            catalog_items_price += product.price * i64::from(line.quantity);
        }

        Ok(catalog_items_price)
    }
}
