//! Voucher allocation - Picks the next unused code and records it in the ledger.
//!
//! Codes are handed out oldest roll first, then in file order. The
//! read-then-append sequence runs under the allocator's lock and inside one
//! database transaction, so concurrent purchases never receive the same code.
//! Gateway calls must never be made while the lock is held.

use crate::{
    config::PlanConfig,
    core::ledger::{self, NewEntry},
    entities::{PurchasedVoucher, VoucherCode, VoucherStatus, purchased_voucher, voucher_code},
    errors::{Error, Result},
};
use sea_orm::{
    QueryOrder, QuerySelect, TransactionTrait, prelude::*,
    sea_query::{Query, SelectStatement},
};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Plan details copied onto a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSelection {
    /// Plan name
    pub name: String,
    /// Plan duration label
    pub duration: String,
    /// Price paid
    pub price: i64,
}

impl From<&PlanConfig> for PlanSelection {
    fn from(plan: &PlanConfig) -> Self {
        Self {
            name: plan.name.clone(),
            duration: plan.duration.clone(),
            price: plan.price,
        }
    }
}

/// Who bought the voucher and which payment paid for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseMeta {
    /// Customer full name
    pub user_name: String,
    /// Customer email
    pub user_email: String,
    /// Customer phone number
    pub user_phone: String,
    /// Merchant reference of the payment, if any
    pub trans_ref: Option<String>,
    /// Gateway transaction token of the payment, if any
    pub trans_token: Option<String>,
}

fn issued_codes() -> SelectStatement {
    Query::select()
        .column(purchased_voucher::Column::Code)
        .from(PurchasedVoucher)
        .to_owned()
}

fn unissued_codes() -> Select<VoucherCode> {
    VoucherCode::find()
        .filter(voucher_code::Column::Code.not_in_subquery(issued_codes()))
        .order_by_asc(voucher_code::Column::RollId)
        .order_by_asc(voucher_code::Column::Position)
}

/// Lists every code not yet in the ledger, in allocation order.
pub async fn available_codes<C>(db: &C) -> Result<Vec<String>>
where
    C: ConnectionTrait,
{
    let codes = unissued_codes().all(db).await?;
    Ok(codes.into_iter().map(|c| c.code).collect())
}

/// Counts codes not yet in the ledger.
pub async fn available_count<C>(db: &C) -> Result<u64>
where
    C: ConnectionTrait,
{
    unissued_codes().count(db).await.map_err(Into::into)
}

/// Serializes allocations against one database.
#[derive(Debug)]
pub struct Allocator {
    db: DatabaseConnection,
    lock: Mutex<()>,
}

impl Allocator {
    /// Creates an allocator over `db`.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            lock: Mutex::new(()),
        }
    }

    /// The underlying database connection.
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Issues the first available code for `plan` to the customer in `meta`.
    ///
    /// Fails with [`Error::NoCodesAvailable`] without touching the ledger when
    /// every code has been issued. On success exactly one ledger entry is
    /// appended and returned.
    ///
    /// A payment reference buys at most one code: if `meta.trans_ref` is
    /// already in the ledger, that entry is returned and nothing is appended.
    pub async fn allocate(
        &self,
        plan: &PlanSelection,
        meta: PurchaseMeta,
    ) -> Result<purchased_voucher::Model> {
        let _guard = self.lock.lock().await;
        let txn = self.db.begin().await?;

        if let Some(trans_ref) = meta.trans_ref.as_deref() {
            if let Some(existing) = ledger::find_by_trans_ref(&txn, trans_ref).await? {
                txn.commit().await?;
                info!(trans_ref, code = %existing.code, "Payment already fulfilled");
                return Ok(existing);
            }
        }

        let Some(next) = unissued_codes().limit(1).one(&txn).await? else {
            warn!(plan = %plan.name, "Voucher pool exhausted");
            return Err(Error::NoCodesAvailable);
        };

        let entry = ledger::append(
            &txn,
            NewEntry {
                code: next.code,
                plan: plan.name.clone(),
                duration: plan.duration.clone(),
                price: plan.price,
                purchase_date: chrono::Utc::now(),
                status: VoucherStatus::Active,
                user_name: meta.user_name,
                user_email: meta.user_email,
                user_phone: meta.user_phone,
                trans_ref: meta.trans_ref,
                trans_token: meta.trans_token,
            },
        )
        .await?;

        txn.commit().await?;

        info!(
            code = %entry.code,
            plan = %entry.plan,
            trans_ref = ?entry.trans_ref,
            "Voucher issued"
        );
        Ok(entry)
    }
}
