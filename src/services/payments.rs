use crate::{
    config::VnpaySettings,
    db::DbPool,
    entities::order::{self, Entity as OrderEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

type HmacSha512 = Hmac<Sha512>;

/// Response code the gateway sends for a confirmed payment.
const SUCCESS_RESPONSE_CODE: &str = "00";

/// Request body for building a gateway redirect URL.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateVnpayUrlRequest {
    pub order_id: Uuid,
    /// Order total in dong; scaled x100 for the gateway's minor-unit form.
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub bank_code: Option<String>,
}

/// What a verified (or rejected) gateway callback means for the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Signature mismatch; nothing was touched.
    InvalidSignature { order_ref: String },
    /// Valid signature, but the gateway did not confirm the payment.
    GatewayDeclined {
        order_ref: String,
        response_code: String,
    },
    /// Valid success callback for an order we do not have.
    OrderNotFound { order_ref: String },
    /// Re-delivered success callback; the original paid_at stands.
    AlreadyPaid { order_ref: String },
    /// First successful confirmation; the order is now paid.
    Paid { order_ref: String },
}

impl CallbackOutcome {
    /// Whether the browser should land on the success page.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyPaid { .. } | Self::Paid { .. })
    }

    pub fn order_ref(&self) -> &str {
        match self {
            Self::InvalidSignature { order_ref }
            | Self::GatewayDeclined { order_ref, .. }
            | Self::OrderNotFound { order_ref }
            | Self::AlreadyPaid { order_ref }
            | Self::Paid { order_ref } => order_ref,
        }
    }
}

/// Builds signed gateway redirect URLs and reconciles the callback.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    settings: Option<VnpaySettings>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        settings: Option<VnpaySettings>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            settings,
            event_sender,
        }
    }

    fn settings(&self) -> Result<&VnpaySettings, ServiceError> {
        self.settings.as_ref().ok_or_else(|| {
            ServiceError::ConfigurationError("Payment gateway is not configured".to_string())
        })
    }

    /// Builds the hosted-payment-page URL for an order.
    ///
    /// Pure in its inputs plus `now` and the shared secret; nothing is
    /// persisted. The transaction reference appends a time-of-day suffix to
    /// the order id so retried payment attempts stay distinct.
    #[instrument(skip(self), fields(order_id = %order_id, amount = amount))]
    pub fn build_redirect_url(
        &self,
        order_id: Uuid,
        amount: i64,
        locale: Option<&str>,
        bank_code: Option<&str>,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let settings = self.settings()?;

        let txn_ref = format!("{}_{}", order_id, now.format("%H%M%S"));
        let create_date = now.format("%Y%m%d%H%M%S").to_string();
        let locale = match locale {
            Some(l) if !l.trim().is_empty() => l.trim().to_string(),
            _ => "vn".to_string(),
        };

        let mut params: Vec<(String, String)> = vec![
            ("vnp_Version".to_string(), "2.1.0".to_string()),
            ("vnp_Command".to_string(), "pay".to_string()),
            ("vnp_TmnCode".to_string(), settings.tmn_code.clone()),
            ("vnp_Locale".to_string(), locale),
            ("vnp_CurrCode".to_string(), "VND".to_string()),
            ("vnp_TxnRef".to_string(), txn_ref.clone()),
            (
                "vnp_OrderInfo".to_string(),
                format!("Thanh toan don hang {}", txn_ref),
            ),
            ("vnp_OrderType".to_string(), "other".to_string()),
            ("vnp_Amount".to_string(), (amount * 100).to_string()),
            ("vnp_ReturnUrl".to_string(), settings.return_url.clone()),
            ("vnp_IpAddr".to_string(), client_ip.to_string()),
            ("vnp_CreateDate".to_string(), create_date),
        ];
        if let Some(bank_code) = bank_code {
            if !bank_code.trim().is_empty() {
                params.push(("vnp_BankCode".to_string(), bank_code.trim().to_string()));
            }
        }

        let canonical = canonical_query(&params);
        let signature = sign(&settings.hash_secret, &canonical);

        info!(txn_ref = %txn_ref, "Built gateway redirect URL");

        Ok(format!(
            "{}?{}&vnp_SecureHash={}",
            settings.payment_url, canonical, signature
        ))
    }

    /// Verifies a gateway callback and applies it to the targeted order.
    ///
    /// The supplied signature is recomputed over every parameter except the
    /// signature fields themselves. Only a verified, gateway-confirmed
    /// callback for a known, still-unpaid order mutates anything.
    #[instrument(skip(self, params))]
    pub async fn handle_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let settings = self.settings()?;

        let supplied_signature = params.get("vnp_SecureHash").cloned().unwrap_or_default();
        let signable: Vec<(String, String)> = params
            .iter()
            .filter(|(k, _)| k.as_str() != "vnp_SecureHash" && k.as_str() != "vnp_SecureHashType")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let expected = sign(&settings.hash_secret, &canonical_query(&signable));

        let txn_ref = params.get("vnp_TxnRef").map(String::as_str).unwrap_or("");
        let order_ref = order_ref_from_txn_ref(txn_ref).to_string();

        if !constant_time_eq(&expected, &supplied_signature) {
            warn!(txn_ref = %txn_ref, "Callback signature mismatch");
            return Ok(CallbackOutcome::InvalidSignature { order_ref });
        }

        let response_code = params
            .get("vnp_ResponseCode")
            .map(String::as_str)
            .unwrap_or("");
        if response_code != SUCCESS_RESPONSE_CODE {
            info!(
                order_ref = %order_ref,
                response_code = response_code,
                "Gateway declined payment"
            );
            return Ok(CallbackOutcome::GatewayDeclined {
                order_ref,
                response_code: response_code.to_string(),
            });
        }

        let order_id = match Uuid::parse_str(&order_ref) {
            Ok(id) => id,
            Err(_) => {
                warn!(txn_ref = %txn_ref, "Callback transaction reference names no order");
                return Ok(CallbackOutcome::OrderNotFound { order_ref });
            }
        };

        let db = &*self.db_pool;
        let order = match OrderEntity::find_by_id(order_id).one(db).await? {
            Some(order) => order,
            None => {
                warn!(order_id = %order_id, "Callback for unknown order");
                return Ok(CallbackOutcome::OrderNotFound { order_ref });
            }
        };

        if order.is_paid {
            info!(order_id = %order_id, "Callback re-delivered for an already paid order");
            return Ok(CallbackOutcome::AlreadyPaid { order_ref });
        }

        let mut active_model: order::ActiveModel = order.into();
        active_model.is_paid = Set(true);
        active_model.paid_at = Set(Some(Utc::now()));
        active_model.update(db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to record payment");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, "Payment recorded from gateway callback");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderPaid(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order paid event");
            }
        }

        Ok(CallbackOutcome::Paid { order_ref })
    }

    /// Browser redirect for a successful payment outcome.
    pub fn success_redirect(&self, order_ref: &str) -> Result<String, ServiceError> {
        let settings = self.settings()?;
        Ok(client_redirect(
            &settings.client_success_url,
            order_ref,
            "success",
        ))
    }

    /// Browser redirect for any failed payment outcome.
    pub fn failure_redirect(&self, order_ref: &str) -> Result<String, ServiceError> {
        let settings = self.settings()?;
        Ok(client_redirect(
            &settings.client_failure_url,
            order_ref,
            "fail",
        ))
    }
}

/// Gateway canonical form: keys and values form-encoded (spaces become
/// `+`), sorted by encoded key, joined `k=v` with `&`.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (form_encode(k), form_encode(v)))
        .collect();
    encoded.sort();

    let pairs: Vec<String> = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    pairs.join("&")
}

fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// The order id is the portion of the transaction reference before the
/// first `_`; the rest is the per-attempt uniqueness suffix.
fn order_ref_from_txn_ref(txn_ref: &str) -> &str {
    txn_ref.split('_').next().unwrap_or("")
}

fn client_redirect(base: &str, order_ref: &str, status: &str) -> String {
    let order_ref = if order_ref.is_empty() {
        "unknown"
    } else {
        order_ref
    };
    format!(
        "{}/{}?payment_status={}",
        base.trim_end_matches('/'),
        order_ref,
        status
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sea_orm::DatabaseConnection;

    fn test_settings() -> VnpaySettings {
        VnpaySettings {
            tmn_code: "DEMOV210".to_string(),
            hash_secret: "RAOEXHYVSDDIIENYWSLDIIZTANRUAXNG".to_string(),
            payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            return_url: "http://localhost:8080/api/v1/payments/vnpay-return".to_string(),
            client_success_url: "http://localhost:5173/order".to_string(),
            client_failure_url: "http://localhost:5173/order".to_string(),
        }
    }

    fn test_service() -> PaymentService {
        PaymentService::new(
            Arc::new(DatabaseConnection::default()),
            Some(test_settings()),
            None,
        )
    }

    fn signed_params(mut pairs: HashMap<String, String>) -> HashMap<String, String> {
        let signable: Vec<(String, String)> =
            pairs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let signature = sign(&test_settings().hash_secret, &canonical_query(&signable));
        pairs.insert("vnp_SecureHash".to_string(), signature);
        pairs
    }

    fn success_callback(order_ref: &str) -> HashMap<String, String> {
        signed_params(HashMap::from([
            ("vnp_TxnRef".to_string(), format!("{}_101530", order_ref)),
            ("vnp_ResponseCode".to_string(), "00".to_string()),
            ("vnp_Amount".to_string(), "10000000".to_string()),
            ("vnp_TransactionNo".to_string(), "14226112".to_string()),
        ]))
    }

    #[test]
    fn canonical_query_sorts_keys_and_encodes_values() {
        let params = vec![
            (
                "vnp_OrderInfo".to_string(),
                "Thanh toan don hang abc_101530".to_string(),
            ),
            ("vnp_Amount".to_string(), "10000000".to_string()),
            (
                "vnp_ReturnUrl".to_string(),
                "http://localhost:8080/api/v1/payments/vnpay-return".to_string(),
            ),
        ];

        let canonical = canonical_query(&params);

        assert_eq!(
            canonical,
            "vnp_Amount=10000000\
             &vnp_OrderInfo=Thanh+toan+don+hang+abc_101530\
             &vnp_ReturnUrl=http%3A%2F%2Flocalhost%3A8080%2Fapi%2Fv1%2Fpayments%2Fvnpay-return"
        );
    }

    #[test]
    fn redirect_url_carries_fixed_params_and_a_verifiable_signature() {
        let service = test_service();
        let order_id = Uuid::new_v4();
        let now = DateTime::parse_from_rfc3339("2024-06-01T10:15:30Z")
            .unwrap()
            .with_timezone(&Utc);

        let url = service
            .build_redirect_url(order_id, 150_000, None, None, "127.0.0.1", now)
            .unwrap();

        assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?"));
        assert!(url.contains("vnp_Version=2.1.0"));
        assert!(url.contains("vnp_Command=pay"));
        assert!(url.contains("vnp_CurrCode=VND"));
        assert!(url.contains("vnp_Amount=15000000"));
        assert!(url.contains("vnp_CreateDate=20240601101530"));
        assert!(url.contains(&format!("vnp_TxnRef={}_101530", order_id)));
        assert!(!url.contains("vnp_BankCode"));

        // The trailing hash re-verifies over the canonical remainder.
        let (canonical, signature) = url
            .split_once('?')
            .and_then(|(_, q)| q.split_once("&vnp_SecureHash="))
            .unwrap();
        assert_eq!(signature.len(), 128);
        assert_eq!(sign(&test_settings().hash_secret, canonical), signature);
    }

    #[test]
    fn bank_code_and_locale_are_passed_through_when_present() {
        let service = test_service();
        let url = service
            .build_redirect_url(
                Uuid::new_v4(),
                50_000,
                Some("en"),
                Some("NCB"),
                "10.0.0.7",
                Utc::now(),
            )
            .unwrap();

        assert!(url.contains("vnp_Locale=en"));
        assert!(url.contains("vnp_BankCode=NCB"));
    }

    #[test]
    fn missing_gateway_settings_is_a_configuration_error() {
        let service = PaymentService::new(Arc::new(DatabaseConnection::default()), None, None);

        match service.build_redirect_url(Uuid::new_v4(), 1_000, None, None, "127.0.0.1", Utc::now())
        {
            Err(ServiceError::ConfigurationError(_)) => {}
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn declined_callback_verifies_but_does_not_pay() {
        let service = test_service();
        let params = signed_params(HashMap::from([
            ("vnp_TxnRef".to_string(), "abc_101530".to_string()),
            ("vnp_ResponseCode".to_string(), "24".to_string()),
        ]));

        let outcome = service.handle_callback(&params).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::GatewayDeclined {
                order_ref: "abc".to_string(),
                response_code: "24".to_string(),
            }
        );
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn tampered_parameter_invalidates_the_signature() {
        let service = test_service();
        let mut params = success_callback("abc");
        params.insert("vnp_Amount".to_string(), "999".to_string());

        let outcome = service.handle_callback(&params).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::InvalidSignature {
                order_ref: "abc".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn missing_signature_is_invalid() {
        let service = test_service();
        let mut params = success_callback("abc");
        params.remove("vnp_SecureHash");

        let outcome = service.handle_callback(&params).await.unwrap();
        assert_matches!(outcome, CallbackOutcome::InvalidSignature { .. });
    }

    #[tokio::test]
    async fn valid_success_callback_with_garbage_ref_is_order_not_found() {
        let service = test_service();
        let params = success_callback("not-a-uuid");

        let outcome = service.handle_callback(&params).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::OrderNotFound {
                order_ref: "not-a-uuid".to_string(),
            }
        );
    }

    #[test]
    fn order_ref_parsing_takes_the_portion_before_the_first_underscore() {
        assert_eq!(order_ref_from_txn_ref("abc_101530"), "abc");
        assert_eq!(order_ref_from_txn_ref("abc_101530_extra"), "abc");
        assert_eq!(order_ref_from_txn_ref("no-suffix"), "no-suffix");
        assert_eq!(order_ref_from_txn_ref(""), "");
    }

    #[test]
    fn constant_time_eq_checks_length_and_content() {
        assert!(constant_time_eq("deadbeef", "deadbeef"));
        assert!(!constant_time_eq("deadbeef", "deadbeee"));
        assert!(!constant_time_eq("deadbeef", "deadbee"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn client_redirects_name_the_order_and_status() {
        let service = test_service();

        assert_eq!(
            service.success_redirect("abc").unwrap(),
            "http://localhost:5173/order/abc?payment_status=success"
        );
        assert_eq!(
            service.failure_redirect("abc").unwrap(),
            "http://localhost:5173/order/abc?payment_status=fail"
        );
        assert_eq!(
            service.failure_redirect("").unwrap(),
            "http://localhost:5173/order/unknown?payment_status=fail"
        );
    }
}
