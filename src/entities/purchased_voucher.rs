//! Purchased voucher entity - The append-only ledger of issued codes.
//!
//! Each row records one code handed to one paying customer. The `code`
//! column is unique so the database rejects a second issue of the same code
//! even if the allocator lock were bypassed. `trans_ref` is unique too: one
//! payment buys at most one code.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle label stored with each issued voucher.
///
/// Set once at creation; nothing in the system moves a voucher to `Expired`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    /// Issued and usable
    #[sea_orm(string_value = "active")]
    Active,
    /// No longer usable
    #[sea_orm(string_value = "expired")]
    Expired,
}

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchased_vouchers")]
pub struct Model {
    /// Insertion-ordered identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The issued voucher code
    #[sea_orm(unique)]
    pub code: String,
    /// Plan name (e.g., "Daily Pass")
    pub plan: String,
    /// Human-readable duration (e.g., "24 Hours")
    pub duration: String,
    /// Price paid, in whole currency units
    pub price: i64,
    /// When the code was issued
    pub purchase_date: DateTimeUtc,
    /// `"active"` or `"expired"`
    pub status: VoucherStatus,
    /// Customer full name
    pub user_name: String,
    /// Customer email
    pub user_email: String,
    /// Customer phone number
    pub user_phone: String,
    /// Merchant reference of the payment that bought this code
    #[sea_orm(unique)]
    pub trans_ref: Option<String>,
    /// Gateway transaction token of that payment
    pub trans_token: Option<String>,
}

/// Ledger entries reference codes by value only, so there are no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
