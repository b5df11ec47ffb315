//! Payment gateway adapter.
//!
//! The storefront only needs two calls from the gateway: create a payment
//! token for a checkout, and verify what happened to that token later.
//! [`PaymentGateway`] is the seam; [`dpo::DpoClient`] talks to DPO's XML API.

pub mod dpo;
mod xml;

use crate::errors::Result;
use async_trait::async_trait;

pub use dpo::DpoClient;

/// Result code the gateway uses for success.
pub const RESULT_SUCCESS: &str = "000";
/// Verification result code for a cancelled transaction.
pub const RESULT_CANCELLED: &str = "002";

/// Everything the gateway needs to open a hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Amount in whole currency units
    pub amount: i64,
    /// ISO currency code
    pub currency: String,
    /// Customer email
    pub customer_email: String,
    /// Customer first name
    pub customer_first_name: String,
    /// Customer last name
    pub customer_last_name: String,
    /// Customer phone number
    pub customer_phone: String,
    /// Merchant reference, echoed back on redirect
    pub company_ref: String,
    /// Where the customer lands after paying
    pub redirect_url: String,
    /// Where the customer lands on "back"
    pub back_url: String,
    /// Line item shown on the payment page
    pub service_description: String,
}

/// A payment page the customer can be redirected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPayment {
    /// Hosted payment page URL
    pub payment_url: String,
    /// Token identifying the transaction at the gateway
    pub trans_token: String,
    /// Gateway's own transaction reference
    pub trans_ref: Option<String>,
    /// Gateway's human-readable result
    pub result_explanation: Option<String>,
}

/// What the gateway reports for a transaction token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    /// `true` only when the gateway reports the transaction as paid
    pub paid: bool,
    /// Raw gateway result code
    pub result: Option<String>,
    /// Gateway's human-readable result
    pub result_explanation: Option<String>,
    /// Amount the customer paid
    pub transaction_amount: Option<String>,
    /// Customer name as captured by the gateway
    pub customer_name: Option<String>,
    /// Customer email as captured by the gateway
    pub customer_email: Option<String>,
    /// Customer phone as captured by the gateway
    pub customer_phone: Option<String>,
}

impl PaymentVerification {
    /// `true` when the gateway reports the customer cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.result.as_deref() == Some(RESULT_CANCELLED)
    }

    /// Text to show the customer for an unpaid transaction.
    #[must_use]
    pub fn explanation(&self) -> String {
        self.result_explanation
            .clone()
            .unwrap_or_else(|| "Payment was not completed".to_string())
    }
}

/// An external payment processor.
///
/// Both calls are blocking I/O with a timeout. `verify_payment` must be safe
/// to call repeatedly for the same token.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment for `request`.
    ///
    /// Fails with [`crate::errors::Error::Gateway`] on transport errors or a
    /// non-success result.
    async fn create_payment_token(&self, request: &PaymentRequest) -> Result<CreatedPayment>;

    /// Looks up the outcome of a payment.
    async fn verify_payment(&self, trans_token: &str) -> Result<PaymentVerification>;
}
