//! Sales and inventory statistics for the admin dashboard.
//!
//! Figures are computed from the ledger and the voucher pool on demand and
//! returned as plain data; formatting is left to the caller.

use crate::{
    core::{allocator, ledger},
    entities::{VoucherCode, VoucherStatus, purchased_voucher},
    errors::Result,
};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};

/// Sales of one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSales {
    /// Plan name as recorded on the ledger
    pub plan: String,
    /// Vouchers sold
    pub sales: u64,
    /// Revenue from this plan
    pub revenue: i64,
}

/// Totals across the whole ledger and pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesStats {
    /// Sum of all prices paid
    pub total_revenue: i64,
    /// Vouchers sold
    pub total_vouchers: u64,
    /// Sold vouchers with status `active`
    pub active_vouchers: u64,
    /// Sold vouchers with any other status
    pub expired_vouchers: u64,
    /// Per-plan breakdown, in order of each plan's first sale
    pub by_plan: Vec<PlanSales>,
    /// Codes uploaded across all rolls
    pub uploaded_codes: u64,
    /// Codes still available for allocation
    pub available_codes: u64,
}

/// Summarizes ledger entries.
///
/// Inventory fields are left at zero; [`sales_stats`] fills them in.
#[must_use]
pub fn summarize(entries: &[purchased_voucher::Model]) -> SalesStats {
    let total_revenue = entries.iter().map(|e| e.price).sum();
    let total_vouchers = entries.len() as u64;
    let active_vouchers = entries
        .iter()
        .filter(|e| e.status == VoucherStatus::Active)
        .count() as u64;

    let mut by_plan: Vec<PlanSales> = Vec::new();
    for entry in entries {
        match by_plan.iter_mut().find(|p| p.plan == entry.plan) {
            Some(plan) => {
                plan.sales += 1;
                plan.revenue += entry.price;
            }
            None => by_plan.push(PlanSales {
                plan: entry.plan.clone(),
                sales: 1,
                revenue: entry.price,
            }),
        }
    }

    SalesStats {
        total_revenue,
        total_vouchers,
        active_vouchers,
        expired_vouchers: total_vouchers - active_vouchers,
        by_plan,
        uploaded_codes: 0,
        available_codes: 0,
    }
}

/// Computes sales and inventory statistics.
pub async fn sales_stats(db: &DatabaseConnection) -> Result<SalesStats> {
    let entries = ledger::list_entries(db).await?;
    let mut stats = summarize(&entries);
    stats.uploaded_codes = VoucherCode::find().count(db).await?;
    stats.available_codes = allocator::available_count(db).await?;
    Ok(stats)
}
