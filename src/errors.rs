//! Unified error type for the voucher portal.
//!
//! Every variant's `Display` output is a human-readable explanation that can be
//! shown to a purchaser or an admin as-is.

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// All failures produced by the voucher portal.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input to the roll store, plan selection, or customer details.
    #[error("Invalid input: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Every uploaded code has already been issued.
    #[error("No vouchers are available at the moment. Please contact the admin.")]
    NoCodesAvailable,

    /// A code was about to be issued twice.
    #[error("Voucher code {code} has already been issued")]
    DuplicateCode {
        /// The code that is already in the ledger
        code: String,
    },

    /// A payment already bought a voucher.
    #[error("Payment {trans_ref} has already been fulfilled")]
    DuplicatePayment {
        /// Merchant reference already present in the ledger
        trans_ref: String,
    },

    /// Transport failure or non-success result from the payment gateway.
    #[error("Payment gateway error: {message}")]
    Gateway {
        /// Gateway result explanation or transport error text
        message: String,
    },

    /// Payment succeeded but no voucher could be issued.
    #[error(
        "Payment {company_ref} was received but no voucher is available; it has been flagged for admin reconciliation"
    )]
    PaymentCapturedNoInventory {
        /// Merchant reference of the paid session
        company_ref: String,
    },

    /// The gateway reported the payment as declined or cancelled, or the
    /// customer came back without a transaction token.
    #[error("Payment was not completed: {reason}")]
    PaymentNotCompleted {
        /// Gateway explanation or local reason
        reason: String,
    },

    /// No payment session matches the given reference.
    #[error("Payment session not found: {company_ref}")]
    SessionNotFound {
        /// Reference that was looked up
        company_ref: String,
    },

    /// The session is not in a state that allows the requested transition.
    #[error("Payment session {company_ref} is {state}, cannot {action}")]
    InvalidSessionState {
        /// Merchant reference of the session
        company_ref: String,
        /// Current state
        state: String,
        /// Attempted action
        action: &'static str,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Database failure.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// I/O failure (upload files, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors whose message is meant for the purchaser.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::NoCodesAvailable
                | Self::Gateway { .. }
                | Self::PaymentNotCompleted { .. }
                | Self::PaymentCapturedNoInventory { .. }
        )
    }

    /// Returns `true` if re-initiating checkout may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway { .. } | Self::PaymentNotCompleted { .. })
    }

    /// Maps a unique-constraint violation on the ledger to
    /// [`Error::DuplicatePayment`] when the payment reference collided, and to
    /// [`Error::DuplicateCode`] otherwise.
    pub(crate) fn from_ledger_insert(err: DbErr, code: &str, trans_ref: Option<&str>) -> Self {
        match (err.sql_err(), trans_ref) {
            (Some(SqlErr::UniqueConstraintViolation(message)), Some(trans_ref))
                if message.contains("trans_ref") =>
            {
                Self::DuplicatePayment {
                    trans_ref: trans_ref.to_string(),
                }
            }
            (Some(SqlErr::UniqueConstraintViolation(_)), _) => Self::DuplicateCode {
                code: code.to_string(),
            },
            _ => Self::Database(err),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
