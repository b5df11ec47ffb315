//! Voucher code entity - One code from an uploaded roll.
//!
//! `position` keeps the in-file order so allocation can walk codes
//! oldest roll first, then top to bottom.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Voucher code database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "voucher_codes")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Roll this code was uploaded in
    pub roll_id: i64,
    /// Zero-based line order within the uploaded file
    pub position: i32,
    /// The access code handed to the customer
    pub code: String,
}

/// Defines relationships between `VoucherCode` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each code belongs to one roll
    #[sea_orm(
        belongs_to = "super::voucher_roll::Entity",
        from = "Column::RollId",
        to = "super::voucher_roll::Column::Id",
        on_delete = "Cascade"
    )]
    Roll,
}

impl Related<super::voucher_roll::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Roll.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
