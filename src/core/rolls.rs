//! Voucher roll store - Uploading, listing, and removing batches of codes.
//!
//! A roll and its codes are written in one database transaction so a failed
//! upload never leaves a partial roll behind. Removing a roll never touches
//! the ledger: codes already issued stay issued.

use crate::{
    core::upload::{UploadFormat, read_roll_file},
    entities::{PurchasedVoucher, VoucherCode, VoucherRoll, purchased_voucher, voucher_code, voucher_roll},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Query};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// A roll together with its codes in upload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollWithCodes {
    /// The roll record
    pub roll: voucher_roll::Model,
    /// Codes in in-file order
    pub codes: Vec<String>,
}

/// Inventory figures for one roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollSummary {
    /// The roll record
    pub roll: voucher_roll::Model,
    /// Codes uploaded in this roll
    pub total_codes: u64,
    /// Codes from this roll that appear in the ledger
    pub issued_codes: u64,
    /// Codes from this roll still available for allocation
    pub available_codes: u64,
}

/// Stores a new roll of codes.
///
/// Fails with [`Error::Validation`] if the name is blank, there are no codes,
/// any code is blank, or a code appears twice in the roll.
pub async fn add_roll(
    db: &DatabaseConnection,
    name: String,
    description: Option<String>,
    codes: Vec<String>,
    file_name: String,
) -> Result<RollWithCodes> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(Error::Validation {
            message: "Roll name cannot be empty".to_string(),
        });
    }
    if codes.is_empty() {
        return Err(Error::Validation {
            message: "Roll must contain at least one voucher code".to_string(),
        });
    }
    if codes.iter().any(|code| code.trim().is_empty()) {
        return Err(Error::Validation {
            message: "Voucher codes cannot be empty".to_string(),
        });
    }
    let mut seen = HashSet::with_capacity(codes.len());
    if let Some(duplicate) = codes.iter().find(|code| !seen.insert(code.as_str())) {
        return Err(Error::Validation {
            message: format!("Voucher code {duplicate} appears more than once in the roll"),
        });
    }

    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let txn = db.begin().await?;

    let roll = voucher_roll::ActiveModel {
        name: Set(name),
        description: Set(description),
        upload_date: Set(chrono::Utc::now()),
        file_name: Set(file_name),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let rows = codes
        .iter()
        .enumerate()
        .map(|(position, code)| {
            Ok(voucher_code::ActiveModel {
                roll_id: Set(roll.id),
                position: Set(i32::try_from(position).map_err(|_| Error::Validation {
                    message: "Roll contains too many codes".to_string(),
                })?),
                code: Set(code.clone()),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;
    VoucherCode::insert_many(rows).exec(&txn).await?;

    txn.commit().await?;

    info!(roll_id = roll.id, name = %roll.name, codes = codes.len(), "Voucher roll uploaded");
    Ok(RollWithCodes { roll, codes })
}

/// Reads a roll file from disk, parses it, and stores it under the file's name.
pub async fn import_roll_file(
    db: &DatabaseConnection,
    path: &Path,
    name: String,
    description: Option<String>,
    format: UploadFormat,
) -> Result<RollWithCodes> {
    let (codes, file_name) = read_roll_file(path, format)?;
    add_roll(db, name, description, codes, file_name).await
}

/// Lists all rolls in upload order.
pub async fn list_rolls(db: &DatabaseConnection) -> Result<Vec<voucher_roll::Model>> {
    VoucherRoll::find()
        .order_by_asc(voucher_roll::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists all rolls with their codes, rolls in upload order and codes in file order.
pub async fn list_rolls_with_codes(db: &DatabaseConnection) -> Result<Vec<RollWithCodes>> {
    let rolls = VoucherRoll::find()
        .order_by_asc(voucher_roll::Column::Id)
        .find_with_related(VoucherCode)
        .order_by_asc(voucher_code::Column::Position)
        .all(db)
        .await?;

    Ok(rolls
        .into_iter()
        .map(|(roll, codes)| RollWithCodes {
            roll,
            codes: codes.into_iter().map(|c| c.code).collect(),
        })
        .collect())
}

/// Returns the codes of one roll in file order.
pub async fn roll_codes(db: &DatabaseConnection, roll_id: i64) -> Result<Vec<String>> {
    let codes = VoucherCode::find()
        .filter(voucher_code::Column::RollId.eq(roll_id))
        .order_by_asc(voucher_code::Column::Position)
        .all(db)
        .await?;
    Ok(codes.into_iter().map(|c| c.code).collect())
}

/// File name a roll is exported under: whitespace runs and path separators
/// become `_`, plus a `.txt` extension.
fn export_file_name(roll_name: &str) -> String {
    let stem = roll_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace(['/', '\\'], "_");
    format!("{stem}.txt")
}

/// Writes a roll's codes to `dir`, one code per line, and returns the path.
///
/// Fails with [`Error::Validation`] if the roll does not exist.
pub async fn export_roll(db: &DatabaseConnection, roll_id: i64, dir: &Path) -> Result<PathBuf> {
    let roll = VoucherRoll::find_by_id(roll_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::Validation {
            message: format!("Roll #{roll_id} not found"),
        })?;
    let codes = roll_codes(db, roll_id).await?;

    let path = dir.join(export_file_name(&roll.name));
    std::fs::write(&path, codes.join("\n"))?;

    info!(roll_id, path = %path.display(), codes = codes.len(), "Voucher roll exported");
    Ok(path)
}

/// Finds rolls whose name contains `term`, ignoring case.
pub async fn search_rolls(db: &DatabaseConnection, term: &str) -> Result<Vec<voucher_roll::Model>> {
    let needle = term.to_lowercase();
    Ok(list_rolls(db)
        .await?
        .into_iter()
        .filter(|roll| roll.name.to_lowercase().contains(&needle))
        .collect())
}

/// Deletes a roll and its codes. Unknown ids are a no-op.
pub async fn remove_roll(db: &DatabaseConnection, roll_id: i64) -> Result<()> {
    let txn = db.begin().await?;

    VoucherCode::delete_many()
        .filter(voucher_code::Column::RollId.eq(roll_id))
        .exec(&txn)
        .await?;
    let removed = VoucherRoll::delete_by_id(roll_id).exec(&txn).await?;

    txn.commit().await?;

    if removed.rows_affected > 0 {
        info!(roll_id, "Voucher roll removed");
    }
    Ok(())
}

/// Computes per-roll inventory for the admin roll list.
pub async fn roll_summaries(db: &DatabaseConnection) -> Result<Vec<RollSummary>> {
    let rolls = list_rolls(db).await?;
    let mut summaries = Vec::with_capacity(rolls.len());

    for roll in rolls {
        let total_codes = VoucherCode::find()
            .filter(voucher_code::Column::RollId.eq(roll.id))
            .count(db)
            .await?;
        let issued_codes = VoucherCode::find()
            .filter(voucher_code::Column::RollId.eq(roll.id))
            .filter(
                voucher_code::Column::Code.in_subquery(
                    Query::select()
                        .column(purchased_voucher::Column::Code)
                        .from(PurchasedVoucher)
                        .to_owned(),
                ),
            )
            .count(db)
            .await?;

        summaries.push(RollSummary {
            roll,
            total_codes,
            issued_codes,
            available_codes: total_codes - issued_codes,
        });
    }

    Ok(summaries)
}
