#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    middleware, Router,
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::{AuthConfig, AuthService, Claims},
    config::{AppConfig, VnpaySettings},
    db,
    entities::{
        coupon::{self, DiscountType},
        order, product,
    },
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Signing secret shared by the harness and every minted test token.
pub const TEST_JWT_SECRET: &str =
    "integration_test_signing_secret_with_plenty_of_entropy_0987654321_qwerty";

/// Gateway settings mirroring the public sandbox credentials.
pub fn sandbox_gateway() -> VnpaySettings {
    VnpaySettings {
        tmn_code: "DEMOV210".to_string(),
        hash_secret: "RAOEXHYVSDDIIENYWSLDIIZTANRUAXNG".to_string(),
        payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
        return_url: "http://127.0.0.1:18080/api/v1/payments/vnpay-return".to_string(),
        client_success_url: "http://localhost:5173/order".to_string(),
        client_failure_url: "http://localhost:5173/order".to_string(),
    }
}

/// Helper harness for spinning up an application router backed by a
/// throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a test application with the sandbox gateway configured.
    pub async fn new() -> Self {
        Self::with_gateway(Some(sandbox_gateway())).await
    }

    /// Construct a test application whose payment gateway is disabled.
    pub async fn without_gateway() -> Self {
        Self::with_gateway(None).await
    }

    async fn with_gateway(vnpay: Option<VnpaySettings>) -> Self {
        // Each harness owns its database file, so tests in the same binary
        // can run in parallel without sharing state.
        let db_dir = TempDir::new().expect("temp dir for the test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.vnpay = vnpay;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db_arc.clone(), Arc::new(event_sender.clone()), &cfg);

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
        };

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));
        let api_router = storefront_api::api_v1_routes().layer(middleware::from_fn_with_state(
            auth_service,
            |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
             mut req: Request<Body>,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ));

        let router = Router::new()
            .merge(storefront_api::root_routes())
            .nest("/api/v1", api_router)
            .layer(middleware::from_fn(
                storefront_api::request_id::request_id_middleware,
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Mint an access token for `user_id` carrying `roles`.
    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            name: Some("Integration Shopper".to_string()),
            email: Some("shopper@example.com".to_string()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            nbf: now.timestamp(),
            iss: self.state.config.auth_issuer.clone(),
            aud: self.state.config.auth_audience.clone(),
        };

        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.state.config.jwt_secret.as_bytes()),
        )
        .expect("encode access token")
    }

    pub fn shopper_token(&self, user_id: Uuid) -> String {
        self.token_for(user_id, &["customer"])
    }

    pub fn admin_token(&self) -> String {
        self.token_for(Uuid::new_v4(), &["admin"])
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Insert a catalog product directly, bypassing the HTTP surface.
    pub async fn seed_product(&self, name: &str, price: i64, stock: i32) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            image: Set(format!(
                "/images/{}.jpg",
                name.to_lowercase().replace(' ', "-")
            )),
            price: Set(price),
            stock: Set(stock),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product")
    }

    /// Insert a coupon that expires `expires_in` from now.
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        discount_value: i64,
        min_purchase: i64,
        expires_in: Duration,
    ) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(discount_value),
            min_purchase: Set(min_purchase),
            expiry_date: Set(Utc::now() + expires_in),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed coupon")
    }

    /// Current stock counter for a seeded product.
    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.state.db.as_ref())
            .await
            .expect("product lookup")
            .expect("seeded product should exist")
            .stock
    }

    /// The order row as persisted, if it still exists.
    pub async fn order_row(&self, order_id: Uuid) -> Option<order::Model> {
        order::Entity::find_by_id(order_id)
            .one(self.state.db.as_ref())
            .await
            .expect("order lookup")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
