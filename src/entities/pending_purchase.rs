//! Pending purchase entity - A checkout that has not been fulfilled yet.
//!
//! The row carries the Payment Session state. It is removed once the session
//! is fulfilled or fails, and kept in `paid` when money was captured but no
//! voucher could be issued.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment Session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Plan and customer captured, gateway not contacted yet
    #[sea_orm(string_value = "created")]
    Created,
    /// Gateway issued a payment token; customer is paying externally
    #[sea_orm(string_value = "awaiting_gateway")]
    AwaitingGateway,
    /// Gateway confirmed payment
    #[sea_orm(string_value = "paid")]
    Paid,
    /// Gateway rejected or declined the payment
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Customer cancelled, or the callback carried no transaction token
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SessionState {
    /// `paid`, `failed` and `cancelled` accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Failed | Self::Cancelled)
    }

    /// Lowercase name as stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingGateway => "awaiting_gateway",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending purchase database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_purchases")]
pub struct Model {
    /// Merchant reference sent to the gateway as `CompanyRef`
    #[sea_orm(primary_key, auto_increment = false)]
    pub company_ref: String,
    /// Plan name
    pub plan: String,
    /// Plan duration label
    pub duration: String,
    /// Plan price
    pub price: i64,
    /// Customer full name
    pub user_name: String,
    /// Customer email
    pub user_email: String,
    /// Customer phone number
    pub user_phone: String,
    /// Current Payment Session state
    pub state: SessionState,
    /// Gateway transaction token, once issued
    pub trans_token: Option<String>,
    /// Gateway's own transaction reference, once issued
    pub trans_ref: Option<String>,
    /// Why the session is stuck or failed
    pub failure_reason: Option<String>,
    /// When checkout was started
    pub created_at: DateTimeUtc,
    /// Last state change
    pub updated_at: DateTimeUtc,
}

/// `PendingPurchase` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
