//! Voucher roll entity - A named batch of voucher codes uploaded together.
//!
//! Rolls are immutable once created; the only mutation is whole-roll deletion.
//! The codes themselves live in [`super::voucher_code`] so they can be
//! queried in upload order without deserializing every roll.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Voucher roll database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "voucher_rolls")]
pub struct Model {
    /// Creation-ordered identifier; rolls are allocated from in ascending id order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Admin-facing name (e.g., "Daily Vouchers - January")
    pub name: String,
    /// Optional notes about the roll
    pub description: Option<String>,
    /// When the roll was uploaded
    pub upload_date: DateTimeUtc,
    /// Name of the uploaded file
    pub file_name: String,
}

/// Defines relationships between `VoucherRoll` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One roll has many codes
    #[sea_orm(has_many = "super::voucher_code::Entity")]
    Codes,
}

impl Related<super::voucher_code::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Codes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
