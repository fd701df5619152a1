use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use uuid::Uuid;

use crate::auth::{AuthRouterExt, AuthUser};
use crate::entities::order;
use crate::services::orders::{AdminOrderQuery, CreateOrderRequest, OrderResponse};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Place a new order for the authenticated shopper
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state
        .services
        .orders
        .create_order(auth_user.user_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// Fetch a single order; shoppers only see their own, admins see all
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_order(order_id, &auth_user).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// List the authenticated shopper's own orders, newest first
pub async fn list_my_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<OrderResponse>> {
    let orders = state
        .services
        .orders
        .list_my_orders(auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// List all orders with optional date window and revenue filter (back office)
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrderQuery>,
) -> ApiResult<Vec<OrderResponse>> {
    let orders = state.services.orders.list_orders(query).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// Mark an order as paid
pub async fn mark_order_paid(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<order::Model> {
    let order = state.services.orders.mark_paid(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Mark an order as delivered (back office)
pub async fn mark_order_delivered(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<order::Model> {
    let order = state.services.orders.mark_delivered(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Delete an order and return its stock (back office)
pub async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.orders.delete_order(order_id).await?;
    Ok(Json(ApiResponse::message("Order removed")))
}

/// Order routes: shoppers place and read their own orders, the back
/// office lists, delivers and deletes.
pub fn order_routes() -> Router<AppState> {
    let shopper = Router::new()
        .route("/orders", post(create_order))
        .route("/orders/mine", get(list_my_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/pay", put(mark_order_paid))
        .with_auth();

    let admin = Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", delete(delete_order))
        .route("/orders/:id/deliver", put(mark_order_delivered))
        .with_role("admin");

    shopper.merge(admin)
}
