//! End-to-end tests for the payment gateway surface: signed redirect URL
//! building and the browser return leg that reconciles the callback.

mod common;

use axum::{
    body,
    http::{header, Method},
    response::Response,
};
use common::TestApp;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha512;
use uuid::Uuid;

const SANDBOX_SECRET: &str = "RAOEXHYVSDDIIENYWSLDIIZTANRUAXNG";

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn location_of(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("location header")
        .to_string()
}

fn sign(payload: &str) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(SANDBOX_SECRET.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

// Every value below is form-safe (letters, digits, underscores), so the
// canonical form is just the key-sorted k=v join.
fn canonical(pairs: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = pairs.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn callback_pairs(txn_ref: &str, response_code: &str) -> Vec<(&'static str, String)> {
    vec![
        ("vnp_TmnCode", "DEMOV210".to_string()),
        ("vnp_TxnRef", txn_ref.to_string()),
        ("vnp_ResponseCode", response_code.to_string()),
        ("vnp_Amount", "300000000".to_string()),
        ("vnp_TransactionNo", "14226112".to_string()),
        ("vnp_BankCode", "NCB".to_string()),
    ]
}

fn signed_query(pairs: &[(&str, String)]) -> String {
    let canonical = canonical(pairs);
    let signature = sign(&canonical);
    format!("{}&vnp_SecureHash={}", canonical, signature)
}

async fn place_order(app: &TestApp, token: &str) -> Uuid {
    let product = app.seed_product("Orient Bambino", 3_000_000, 10).await;
    let payload = json!({
        "order_items": [{
            "product_id": product.id,
            "name": product.name,
            "image": product.image,
            "price": product.price,
            "quantity": 1
        }],
        "shipping_address": {
            "full_name": "Nguyen Van A",
            "phone": "0901234567",
            "address": "1 Tran Hung Dao, Q1, TP.HCM"
        },
        "payment_method": "vnpay",
        "items_price": 3_000_000,
        "tax_price": 0,
        "shipping_price": 30_000,
        "discount_amount": 0,
        "total_price": 3_030_000
    });

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(payload), Some(token))
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    body["data"]["id"]
        .as_str()
        .expect("order id")
        .parse()
        .expect("uuid")
}

// ==================== Redirect URL building ====================

#[tokio::test]
async fn create_vnpay_url_returns_a_signed_gateway_url() {
    let app = TestApp::new().await;
    let token = app.shopper_token(Uuid::new_v4());
    let order_id = place_order(&app, &token).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create-vnpay-url",
            Some(json!({ "order_id": order_id, "amount": 3_000_000 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);

    let url = body["data"]["payment_url"].as_str().expect("payment url");
    assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?"));
    assert!(url.contains(&format!("vnp_TxnRef={}_", order_id)));
    assert!(url.contains("vnp_Amount=300000000"));
    assert!(url.contains("vnp_IpAddr=127.0.0.1"));

    // The trailing hash re-verifies over the canonical remainder.
    let (canonical, signature) = url
        .split_once('?')
        .and_then(|(_, query)| query.split_once("&vnp_SecureHash="))
        .expect("signed query");
    assert_eq!(signature.len(), 128);
    assert_eq!(sign(canonical), signature);
}

#[tokio::test]
async fn url_building_requires_a_signed_in_shopper() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create-vnpay-url",
            Some(json!({ "order_id": Uuid::new_v4(), "amount": 1_000 })),
            None,
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn a_zero_amount_fails_validation() {
    let app = TestApp::new().await;
    let token = app.shopper_token(Uuid::new_v4());

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create-vnpay-url",
            Some(json!({ "order_id": Uuid::new_v4(), "amount": 0 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 400);

    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Validation failed");
    let errors = body["errors"].as_array().expect("errors array");
    assert!(errors
        .iter()
        .any(|e| e.as_str().unwrap_or_default().contains("Amount must be positive")));
}

// ==================== The return leg ====================

#[tokio::test]
async fn a_verified_success_callback_marks_the_order_paid() {
    let app = TestApp::new().await;
    let token = app.shopper_token(Uuid::new_v4());
    let order_id = place_order(&app, &token).await;

    let txn_ref = format!("{}_101530", order_id);
    let query = signed_query(&callback_pairs(&txn_ref, "00"));

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay-return?{}", query),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), 302);
    assert_eq!(
        location_of(&response),
        format!(
            "http://localhost:5173/order/{}?payment_status=success",
            order_id
        )
    );

    let order = app.order_row(order_id).await.expect("order row");
    assert!(order.is_paid);
    assert!(order.paid_at.is_some());
}

#[tokio::test]
async fn a_replayed_callback_keeps_the_original_payment_time() {
    let app = TestApp::new().await;
    let token = app.shopper_token(Uuid::new_v4());
    let order_id = place_order(&app, &token).await;

    let txn_ref = format!("{}_101530", order_id);
    let query = signed_query(&callback_pairs(&txn_ref, "00"));
    let uri = format!("/api/v1/payments/vnpay-return?{}", query);

    let response = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(response.status(), 302);
    let first_paid_at = app.order_row(order_id).await.expect("order row").paid_at;

    let response = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(response.status(), 302);
    assert!(location_of(&response).ends_with("payment_status=success"));

    let second_paid_at = app.order_row(order_id).await.expect("order row").paid_at;
    assert_eq!(first_paid_at, second_paid_at);
}

#[tokio::test]
async fn a_tampered_amount_fails_verification() {
    let app = TestApp::new().await;
    let token = app.shopper_token(Uuid::new_v4());
    let order_id = place_order(&app, &token).await;

    let txn_ref = format!("{}_101530", order_id);
    let good = callback_pairs(&txn_ref, "00");
    let signature = sign(&canonical(&good));

    let mut tampered = good;
    for (key, value) in tampered.iter_mut() {
        if *key == "vnp_Amount" {
            *value = "999".to_string();
        }
    }
    let query = format!("{}&vnp_SecureHash={}", canonical(&tampered), signature);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay-return?{}", query),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), 302);
    assert_eq!(
        location_of(&response),
        format!(
            "http://localhost:5173/order/{}?payment_status=fail",
            order_id
        )
    );

    let order = app.order_row(order_id).await.expect("order row");
    assert!(!order.is_paid);
    assert!(order.paid_at.is_none());
}

#[tokio::test]
async fn a_declined_payment_redirects_to_the_failure_page() {
    let app = TestApp::new().await;
    let token = app.shopper_token(Uuid::new_v4());
    let order_id = place_order(&app, &token).await;

    let txn_ref = format!("{}_101530", order_id);
    let query = signed_query(&callback_pairs(&txn_ref, "24"));

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay-return?{}", query),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), 302);
    assert!(location_of(&response).ends_with("payment_status=fail"));

    let order = app.order_row(order_id).await.expect("order row");
    assert!(!order.is_paid);
}

#[tokio::test]
async fn an_unknown_reference_fails_without_touching_anything() {
    let app = TestApp::new().await;

    let query = signed_query(&callback_pairs("not-a-uuid_101530", "00"));

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay-return?{}", query),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), 302);
    assert_eq!(
        location_of(&response),
        "http://localhost:5173/order/not-a-uuid?payment_status=fail"
    );
}

// ==================== Missing configuration ====================

#[tokio::test]
async fn an_unconfigured_gateway_is_a_server_error() {
    let app = TestApp::without_gateway().await;
    let token = app.shopper_token(Uuid::new_v4());

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create-vnpay-url",
            Some(json!({ "order_id": Uuid::new_v4(), "amount": 1_000 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 500);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("not configured"));

    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/vnpay-return?vnp_TxnRef=abc_101530",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), 500);
}
