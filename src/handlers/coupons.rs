use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthRouterExt;
use crate::entities::coupon;
use crate::services::coupons::{
    AvailableCoupon, CouponDiscount, CreateCouponRequest, ValidateCouponRequest,
};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Validate a coupon against a cart subtotal
pub async fn validate_coupon(
    State(state): State<AppState>,
    Json(request): Json<ValidateCouponRequest>,
) -> ApiResult<CouponDiscount> {
    request.validate()?;

    let discount = state
        .services
        .coupons
        .validate_coupon(&request.code, request.cart_total)
        .await?;

    Ok(Json(ApiResponse::success(discount)))
}

/// List coupons a shopper can still use
pub async fn list_available_coupons(
    State(state): State<AppState>,
) -> ApiResult<Vec<AvailableCoupon>> {
    let coupons = state.services.coupons.list_available().await?;
    Ok(Json(ApiResponse::success(coupons)))
}

/// List all coupons (back office)
pub async fn list_coupons(State(state): State<AppState>) -> ApiResult<Vec<coupon::Model>> {
    let coupons = state.services.coupons.list_coupons().await?;
    Ok(Json(ApiResponse::success(coupons)))
}

/// Create a coupon (back office)
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<coupon::Model>>), ServiceError> {
    if let Err(validation_errors) = request.validate() {
        let errors: Vec<String> = validation_errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                let field = field.clone();
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error.message.as_ref().unwrap_or(&"Invalid value".into())
                    )
                })
            })
            .collect();
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(errors)),
        ));
    }

    let coupon = state.services.coupons.create_coupon(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(coupon))))
}

/// Delete a coupon (back office)
pub async fn delete_coupon(
    State(state): State<AppState>,
    Path(coupon_id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.coupons.delete_coupon(coupon_id).await?;
    Ok(Json(ApiResponse::message("Coupon removed")))
}

/// Coupon routes: validation and availability are public, the rest is
/// back-office only.
pub fn coupon_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/coupons/validate", post(validate_coupon))
        .route("/coupons/available", get(list_available_coupons));

    let admin = Router::new()
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/coupons/:id", delete(delete_coupon))
        .with_role("admin");

    public.merge(admin)
}
