pub mod coupons;
pub mod orders;
pub mod payments;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub coupons: Arc<crate::services::coupons::CouponService>,
    pub orders: Arc<crate::services::orders::OrderService>,
    pub payments: Arc<crate::services::payments::PaymentService>,
}

impl AppServices {
    /// Build the AppServices container shared by every request.
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let coupons = Arc::new(crate::services::coupons::CouponService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
        ));
        let orders = Arc::new(crate::services::orders::OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
        ));
        let payments = Arc::new(crate::services::payments::PaymentService::new(
            db_pool,
            config.vnpay.clone(),
            Some(event_sender),
        ));

        Self {
            coupons,
            orders,
            payments,
        }
    }
}
