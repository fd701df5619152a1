use crate::{
    db::DbPool,
    entities::coupon::{self, DiscountType, Entity as CouponEntity, Model as CouponModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Request body for validating a coupon against a cart.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ValidateCouponRequest {
    pub code: String,
    #[validate(range(min = 0, message = "Cart total cannot be negative"))]
    pub cart_total: i64,
}

/// Request body for creating a coupon (admin).
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 1, message = "Coupon code is required"))]
    pub code: String,
    pub discount_type: DiscountType,
    #[validate(range(min = 1, message = "Discount value must be positive"))]
    pub discount_value: i64,
    pub expiry_date: DateTime<Utc>,
    #[serde(default)]
    #[validate(range(min = 0, message = "Minimum purchase cannot be negative"))]
    pub min_purchase: i64,
}

/// Discount resolved for a specific cart subtotal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponDiscount {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub discount_amount: i64,
}

/// Coupon row projected for the public pre-checkout listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_purchase: i64,
    pub discount_amount: i64,
}

impl From<CouponModel> for AvailableCoupon {
    fn from(coupon: CouponModel) -> Self {
        Self {
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            min_purchase: coupon.min_purchase,
            // Face value; percentage rendering uses discount_value directly.
            discount_amount: coupon.discount_value,
        }
    }
}

/// Discount for a cart subtotal, clamped so it never exceeds the subtotal.
/// Percentage amounts round half away from zero.
pub fn compute_discount(discount_type: &DiscountType, discount_value: i64, cart_total: i64) -> i64 {
    let raw = match discount_type {
        DiscountType::Percentage => {
            ((cart_total as f64) * (discount_value as f64) / 100.0).round() as i64
        }
        DiscountType::Fixed => discount_value,
    };

    raw.min(cart_total)
}

/// Format an amount in dong with thousands separators, e.g. `500.000 ₫`.
pub fn format_dong(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    if amount < 0 {
        format!("-{} ₫", grouped)
    } else {
        format!("{} ₫", grouped)
    }
}

/// Coupon validation and admin management.
#[derive(Clone)]
pub struct CouponService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CouponService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Validates a coupon code against a cart subtotal and resolves the
    /// discount it grants. Read-only; coupons are multi-use and no
    /// redemption bookkeeping happens here.
    #[instrument(skip(self), fields(code = %code, cart_total = cart_total))]
    pub async fn validate_coupon(
        &self,
        code: &str,
        cart_total: i64,
    ) -> Result<CouponDiscount, ServiceError> {
        let db = &*self.db_pool;

        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code is required".to_string(),
            ));
        }

        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.to_uppercase()))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Coupon not found".to_string()))?;

        let discount = Self::resolve_discount(&coupon, cart_total, Utc::now())?;

        info!(
            code = %discount.code,
            discount_amount = discount.discount_amount,
            "Coupon validated"
        );

        Ok(discount)
    }

    /// Applies `coupon` to a cart subtotal at instant `now`. The coupon is
    /// valid strictly before its expiry; an expiry equal to `now` is
    /// already expired.
    fn resolve_discount(
        coupon: &CouponModel,
        cart_total: i64,
        now: DateTime<Utc>,
    ) -> Result<CouponDiscount, ServiceError> {
        if coupon.expiry_date <= now {
            return Err(ServiceError::InvalidOperation(
                "Coupon has expired".to_string(),
            ));
        }

        if coupon.min_purchase > 0 && cart_total < coupon.min_purchase {
            return Err(ServiceError::InvalidOperation(format!(
                "Coupon only applies to orders of {} or more",
                format_dong(coupon.min_purchase)
            )));
        }

        let discount_amount =
            compute_discount(&coupon.discount_type, coupon.discount_value, cart_total);

        Ok(CouponDiscount {
            code: coupon.code.clone(),
            discount_type: coupon.discount_type.clone(),
            discount_value: coupon.discount_value,
            discount_amount,
        })
    }

    /// Lists coupons that have not expired yet, for display before checkout.
    #[instrument(skip(self))]
    pub async fn list_available(&self) -> Result<Vec<AvailableCoupon>, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let coupons = CouponEntity::find()
            .filter(coupon::Column::ExpiryDate.gte(now))
            .order_by_desc(coupon::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(coupons.into_iter().map(AvailableCoupon::from).collect())
    }

    /// Lists every coupon, newest first (admin).
    #[instrument(skip(self))]
    pub async fn list_coupons(&self) -> Result<Vec<CouponModel>, ServiceError> {
        let db = &*self.db_pool;

        let coupons = CouponEntity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(coupons)
    }

    /// Creates a coupon (admin). Codes are stored upper-cased and must be
    /// unique.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_coupon(
        &self,
        request: CreateCouponRequest,
    ) -> Result<CouponModel, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let code = request.code.trim().to_uppercase();

        let existing = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let coupon_id = Uuid::new_v4();
        let active_model = coupon::ActiveModel {
            id: Set(coupon_id),
            code: Set(code),
            discount_type: Set(request.discount_type),
            discount_value: Set(request.discount_value),
            min_purchase: Set(request.min_purchase),
            expiry_date: Set(request.expiry_date),
            ..Default::default()
        };

        let created = active_model.insert(db).await.map_err(|e| {
            error!(error = %e, coupon_id = %coupon_id, "Failed to create coupon");
            ServiceError::DatabaseError(e)
        })?;

        info!(coupon_id = %coupon_id, code = %created.code, "Coupon created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::CouponCreated(coupon_id)).await {
                warn!(error = %e, coupon_id = %coupon_id, "Failed to send coupon created event");
            }
        }

        Ok(created)
    }

    /// Deletes a coupon by id (admin).
    #[instrument(skip(self), fields(coupon_id = %coupon_id))]
    pub async fn delete_coupon(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let coupon = CouponEntity::find_by_id(coupon_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Coupon not found".to_string()))?;

        let code = coupon.code.clone();
        coupon.delete(db).await.map_err(|e| {
            error!(error = %e, coupon_id = %coupon_id, "Failed to delete coupon");
            ServiceError::DatabaseError(e)
        })?;

        info!(coupon_id = %coupon_id, code = %code, "Coupon deleted");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::CouponDeleted(coupon_id)).await {
                warn!(error = %e, coupon_id = %coupon_id, "Failed to send coupon deleted event");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use test_case::test_case;

    fn coupon(
        discount_type: DiscountType,
        discount_value: i64,
        min_purchase: i64,
        expires_in: Duration,
    ) -> CouponModel {
        CouponModel {
            id: Uuid::new_v4(),
            code: "SALE10".to_string(),
            discount_type,
            discount_value,
            min_purchase,
            expiry_date: Utc::now() + expires_in,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn fixed_discount_is_clamped_to_the_subtotal() {
        assert_eq!(compute_discount(&DiscountType::Fixed, 100_000, 50_000), 50_000);
        assert_eq!(compute_discount(&DiscountType::Fixed, 30_000, 50_000), 30_000);
    }

    #[test]
    fn percentage_discount_rounds_half_away_from_zero() {
        assert_eq!(compute_discount(&DiscountType::Percentage, 10, 123_457), 12_346);
        assert_eq!(compute_discount(&DiscountType::Percentage, 10, 123_454), 12_345);
        assert_eq!(compute_discount(&DiscountType::Percentage, 50, 1), 1);
    }

    #[test]
    fn expiry_equal_to_now_is_rejected() {
        let now = Utc::now();
        let mut expired = coupon(DiscountType::Fixed, 10_000, 0, Duration::zero());
        expired.expiry_date = now;

        match CouponService::resolve_discount(&expired, 100_000, now) {
            Err(ServiceError::InvalidOperation(msg)) => assert!(msg.contains("expired")),
            other => panic!("expected expiry rejection, got {:?}", other),
        }
    }

    #[test]
    fn coupon_is_valid_strictly_before_expiry() {
        let now = Utc::now();
        let valid = coupon(DiscountType::Fixed, 10_000, 0, Duration::seconds(1));

        let discount = CouponService::resolve_discount(&valid, 100_000, now).unwrap();
        assert_eq!(discount.discount_amount, 10_000);
    }

    #[test]
    fn min_purchase_boundary() {
        let gated = coupon(DiscountType::Fixed, 50_000, 500_000, Duration::days(1));
        let now = Utc::now();

        match CouponService::resolve_discount(&gated, 499_999, now) {
            Err(ServiceError::InvalidOperation(msg)) => assert!(msg.contains("500.000")),
            other => panic!("expected minimum purchase rejection, got {:?}", other),
        }

        let accepted = CouponService::resolve_discount(&gated, 500_000, now).unwrap();
        assert_eq!(accepted.discount_amount, 50_000);
    }

    #[test]
    fn zero_min_purchase_never_gates() {
        let ungated = coupon(DiscountType::Fixed, 5_000, 0, Duration::days(1));

        let discount = CouponService::resolve_discount(&ungated, 1, Utc::now()).unwrap();
        assert_eq!(discount.discount_amount, 1);
    }

    #[test_case(0, "0 ₫")]
    #[test_case(500, "500 ₫")]
    #[test_case(500_000, "500.000 ₫")]
    #[test_case(1_234_567, "1.234.567 ₫")]
    #[test_case(-25_000, "-25.000 ₫")]
    fn formats_dong_with_dot_separators(amount: i64, rendered: &str) {
        assert_eq!(format_dong(amount), rendered);
    }

    #[test]
    fn available_projection_mirrors_face_value() {
        let fixed = coupon(DiscountType::Fixed, 30_000, 100_000, Duration::days(1));
        let projected = AvailableCoupon::from(fixed);

        assert_eq!(projected.discount_amount, 30_000);
        assert_eq!(projected.min_purchase, 100_000);
    }

    proptest! {
        #[test]
        fn discount_never_exceeds_the_subtotal(
            value in 0i64..10_000_000,
            cart in 0i64..10_000_000,
        ) {
            prop_assert!(compute_discount(&DiscountType::Fixed, value, cart) <= cart);
        }

        #[test]
        fn percentage_discount_stays_within_bounds(
            value in 0i64..=100,
            cart in 0i64..10_000_000,
        ) {
            let discount = compute_discount(&DiscountType::Percentage, value, cart);
            prop_assert!(discount >= 0);
            prop_assert!(discount <= cart);
        }
    }
}
