//! Entity module - Contains all SeaORM entity definitions for the database.
//! Rolls and their codes form the voucher pool, purchased vouchers form the
//! ledger, and pending purchases hold in-flight payment sessions.

pub mod pending_purchase;
pub mod purchased_voucher;
pub mod voucher_code;
pub mod voucher_roll;

// Re-export specific types to avoid conflicts
pub use pending_purchase::{
    Column as PendingPurchaseColumn, Entity as PendingPurchase, Model as PendingPurchaseModel,
    SessionState,
};
pub use purchased_voucher::{
    Column as PurchasedVoucherColumn, Entity as PurchasedVoucher, Model as PurchasedVoucherModel,
    VoucherStatus,
};
pub use voucher_code::{Column as VoucherCodeColumn, Entity as VoucherCode, Model as VoucherCodeModel};
pub use voucher_roll::{Column as VoucherRollColumn, Entity as VoucherRoll, Model as VoucherRollModel};
