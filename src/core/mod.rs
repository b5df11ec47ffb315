//! Core business logic - framework-agnostic voucher pool, ledger, allocation,
//! and payment session operations.

/// Voucher allocation
pub mod allocator;
/// Append-only purchase ledger
pub mod ledger;
/// Voucher roll store
pub mod rolls;
/// Payment session state machine
pub mod session;
/// Sales and inventory statistics
pub mod stats;
/// Roll file parsing
pub mod upload;
