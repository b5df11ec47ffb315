//! Purchase ledger - The append-only record of issued voucher codes.
//!
//! Entries are only ever inserted. A code may appear at most once; this is
//! checked before the insert and enforced again by the unique `code` column.

use crate::{
    entities::{PurchasedVoucher, VoucherStatus, purchased_voucher},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::error;

/// A ledger entry that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Code being issued
    pub code: String,
    /// Plan name
    pub plan: String,
    /// Plan duration label
    pub duration: String,
    /// Price paid
    pub price: i64,
    /// Issue time
    pub purchase_date: DateTime<Utc>,
    /// Initial status
    pub status: VoucherStatus,
    /// Customer full name
    pub user_name: String,
    /// Customer email
    pub user_email: String,
    /// Customer phone number
    pub user_phone: String,
    /// Merchant reference of the payment
    pub trans_ref: Option<String>,
    /// Gateway transaction token of the payment
    pub trans_token: Option<String>,
}

/// Lists every ledger entry in insertion order.
pub async fn list_entries<C>(db: &C) -> Result<Vec<purchased_voucher::Model>>
where
    C: ConnectionTrait,
{
    PurchasedVoucher::find()
        .order_by_asc(purchased_voucher::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Returns `true` if `code` has already been issued.
pub async fn is_code_consumed<C>(db: &C, code: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(find_by_code(db, code).await?.is_some())
}

/// Finds the ledger entry for a code.
pub async fn find_by_code<C>(db: &C, code: &str) -> Result<Option<purchased_voucher::Model>>
where
    C: ConnectionTrait,
{
    PurchasedVoucher::find()
        .filter(purchased_voucher::Column::Code.eq(code))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds the ledger entry issued for a payment reference.
pub async fn find_by_trans_ref<C>(
    db: &C,
    trans_ref: &str,
) -> Result<Option<purchased_voucher::Model>>
where
    C: ConnectionTrait,
{
    PurchasedVoucher::find()
        .filter(purchased_voucher::Column::TransRef.eq(trans_ref))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds the ledger entry issued for a gateway transaction token.
pub async fn find_by_trans_token<C>(
    db: &C,
    trans_token: &str,
) -> Result<Option<purchased_voucher::Model>>
where
    C: ConnectionTrait,
{
    PurchasedVoucher::find()
        .filter(purchased_voucher::Column::TransToken.eq(trans_token))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Appends an entry to the ledger.
///
/// Fails with [`Error::DuplicateCode`] if the code has already been issued,
/// and with [`Error::DuplicatePayment`] if the payment reference already
/// bought a code. Either means allocation was bypassed, so both are logged
/// as errors.
pub async fn append<C>(db: &C, entry: NewEntry) -> Result<purchased_voucher::Model>
where
    C: ConnectionTrait,
{
    if is_code_consumed(db, &entry.code).await? {
        error!(code = %entry.code, "Refusing to issue a voucher code twice");
        return Err(Error::DuplicateCode { code: entry.code });
    }
    if let Some(trans_ref) = entry.trans_ref.as_deref() {
        if find_by_trans_ref(db, trans_ref).await?.is_some() {
            error!(trans_ref, "Refusing to fulfil a payment twice");
            return Err(Error::DuplicatePayment {
                trans_ref: trans_ref.to_string(),
            });
        }
    }

    let code = entry.code.clone();
    let trans_ref = entry.trans_ref.clone();
    purchased_voucher::ActiveModel {
        code: Set(entry.code),
        plan: Set(entry.plan),
        duration: Set(entry.duration),
        price: Set(entry.price),
        purchase_date: Set(entry.purchase_date),
        status: Set(entry.status),
        user_name: Set(entry.user_name),
        user_email: Set(entry.user_email),
        user_phone: Set(entry.user_phone),
        trans_ref: Set(entry.trans_ref),
        trans_token: Set(entry.trans_token),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| {
        let err = Error::from_ledger_insert(e, &code, trans_ref.as_deref());
        if matches!(err, Error::DuplicateCode { .. } | Error::DuplicatePayment { .. }) {
            error!(code = %code, trans_ref = ?trans_ref, "Ledger rejected a duplicate entry");
        }
        err
    })
}

/// Finds entries whose code, customer name or email contains `term`
/// (ignoring case), or whose phone number contains `term`.
pub async fn search_entries<C>(db: &C, term: &str) -> Result<Vec<purchased_voucher::Model>>
where
    C: ConnectionTrait,
{
    let needle = term.to_lowercase();
    Ok(list_entries(db)
        .await?
        .into_iter()
        .filter(|entry| {
            entry.code.to_lowercase().contains(&needle)
                || entry.user_name.to_lowercase().contains(&needle)
                || entry.user_email.to_lowercase().contains(&needle)
                || entry.user_phone.contains(term)
        })
        .collect())
}
