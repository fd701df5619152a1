// Core services
pub mod coupons;
pub mod orders;
pub mod payments;
