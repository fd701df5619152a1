use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::error;
use validator::Validate;

use crate::auth::{AuthRouterExt, AuthUser};
use crate::services::payments::CreateVnpayUrlRequest;
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Serialize)]
pub struct PaymentUrlResponse {
    pub payment_url: String,
}

/// Build a signed gateway redirect URL for an order
pub async fn create_vnpay_url(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<CreateVnpayUrlRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentUrlResponse>>), ServiceError> {
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

    let ip = client_ip(&headers, connect_info.as_ref());
    let payment_url = state.services.payments.build_redirect_url(
        request.order_id,
        request.amount,
        request.language.as_deref(),
        request.bank_code.as_deref(),
        &ip,
        Utc::now(),
    )?;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(PaymentUrlResponse { payment_url })),
    ))
}

/// Gateway return leg: verify, reconcile and send the browser back to the
/// storefront. This endpoint never answers with JSON.
pub async fn vnpay_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ServiceError> {
    let payments = &state.services.payments;

    let target = match payments.handle_callback(&params).await {
        Ok(outcome) if outcome.is_success() => payments.success_redirect(outcome.order_ref())?,
        Ok(outcome) => payments.failure_redirect(outcome.order_ref())?,
        Err(e) => {
            error!(error = %e, "Callback reconciliation failed");
            payments.failure_redirect("")?
        }
    };

    Ok(found(&target))
}

// Plain 302; axum's Redirect helpers only emit 303/307/308.
fn found(target: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, target.to_string())]).into_response()
}

/// First hop of x-forwarded-for when present, else the socket peer.
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Payment routes: URL building needs a signed-in shopper, the return leg
/// is hit by the gateway redirect and stays public.
pub fn payment_routes() -> Router<AppState> {
    let shopper = Router::new()
        .route("/payments/create-vnpay-url", post(create_vnpay_url))
        .with_auth();

    let gateway = Router::new().route("/payments/vnpay-return", get(vnpay_return));

    shopper.merge(gateway)
}
