use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// Percent off the cart subtotal.
    #[sea_orm(string_value = "percentage")]
    Percentage,
    /// Flat amount off, in dong.
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

/// Discount coupon redeemable at checkout.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Upper-cased redemption code, unique across coupons
    pub code: String,

    pub discount_type: DiscountType,

    /// Percent for percentage coupons, amount in dong for fixed ones
    pub discount_value: i64,

    /// Smallest cart subtotal the coupon applies to
    pub min_purchase: i64,

    /// The coupon is valid strictly before this instant
    pub expiry_date: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(Utc::now());
            }
        }

        active_model.updated_at = Set(Some(Utc::now()));

        Ok(active_model)
    }
}
