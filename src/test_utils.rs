//! Shared test utilities for the voucher portal.
//!
//! This module provides helpers for setting up in-memory databases, seeding
//! voucher rolls, and a scripted payment gateway.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use crate::{
    config::AppConfig,
    core::{
        allocator::{Allocator, PlanSelection, PurchaseMeta},
        ledger::NewEntry,
        rolls::{self, RollWithCodes},
        session::{CheckoutService, Customer},
    },
    entities::{VoucherStatus, purchased_voucher},
    errors::{Error, Result},
    gateway::{CreatedPayment, PaymentGateway, PaymentRequest, PaymentVerification},
};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Creates an in-memory `SQLite` database with all tables initialized.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Turns string literals into owned codes.
pub fn codes(codes: &[&str]) -> Vec<String> {
    codes.iter().map(ToString::to_string).collect()
}

/// Uploads a roll named `name` containing `codes`.
pub async fn create_test_roll(
    db: &DatabaseConnection,
    name: &str,
    roll_codes: &[&str],
) -> Result<RollWithCodes> {
    rolls::add_roll(
        db,
        name.to_string(),
        None,
        codes(roll_codes),
        format!("{}.csv", name.to_lowercase().replace(' ', "-")),
    )
    .await
}

/// Sets up a database with one roll and an allocator over it.
pub async fn setup_with_roll(roll_codes: &[&str]) -> Result<(DatabaseConnection, Allocator)> {
    let db = setup_test_db().await?;
    create_test_roll(&db, "Test Roll", roll_codes).await?;
    Ok((db.clone(), Allocator::new(db)))
}

/// The stock "Daily Pass" plan.
pub fn daily_plan() -> PlanSelection {
    PlanSelection {
        name: "Daily Pass".to_string(),
        duration: "24 Hours".to_string(),
        price: 200,
    }
}

/// The stock "Weekly Pass" plan.
pub fn weekly_plan() -> PlanSelection {
    PlanSelection {
        name: "Weekly Pass".to_string(),
        duration: "7 Days".to_string(),
        price: 1000,
    }
}

/// Purchase metadata for a typical customer, with no payment reference.
pub fn test_customer() -> PurchaseMeta {
    PurchaseMeta {
        user_name: "Amina Juma".to_string(),
        user_email: "amina@example.com".to_string(),
        user_phone: "0712345678".to_string(),
        trans_ref: None,
        trans_token: None,
    }
}

/// Checkout details for the same customer.
pub fn test_checkout_customer() -> Customer {
    Customer {
        name: "Amina Juma".to_string(),
        email: "amina@example.com".to_string(),
        phone: "0712345678".to_string(),
    }
}

/// A ledger entry for `code` on the daily plan.
pub fn test_entry(code: &str) -> NewEntry {
    NewEntry {
        code: code.to_string(),
        plan: "Daily Pass".to_string(),
        duration: "24 Hours".to_string(),
        price: 200,
        purchase_date: chrono::Utc::now(),
        status: VoucherStatus::Active,
        user_name: "Amina Juma".to_string(),
        user_email: "amina@example.com".to_string(),
        user_phone: "0712345678".to_string(),
        trans_ref: None,
        trans_token: None,
    }
}

/// An in-memory ledger row, for pure functions that take models.
pub fn ledger_model(code: &str, price: i64) -> purchased_voucher::Model {
    purchased_voucher::Model {
        id: 0,
        code: code.to_string(),
        plan: "Daily Pass".to_string(),
        duration: "24 Hours".to_string(),
        price,
        purchase_date: chrono::Utc::now(),
        status: VoucherStatus::Active,
        user_name: "Amina Juma".to_string(),
        user_email: "amina@example.com".to_string(),
        user_phone: "0712345678".to_string(),
        trans_ref: None,
        trans_token: None,
    }
}

#[derive(Debug, Default)]
struct FakeState {
    create_calls: usize,
    create_error: Option<String>,
    last_request: Option<PaymentRequest>,
    verifications: HashMap<String, PaymentVerification>,
    verify_delay: Option<Duration>,
}

/// A scripted [`PaymentGateway`].
///
/// Token creation succeeds with tokens `TT-1`, `TT-2`, ... unless
/// [`FakeGateway::fail_create`] was called. Verifying a token nobody scripted
/// fails with [`Error::Gateway`], like an unreachable gateway.
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    /// Makes every later token creation fail with `explanation`.
    pub fn fail_create(&self, explanation: &str) {
        self.state.lock().unwrap().create_error = Some(explanation.to_string());
    }

    /// Scripts `token` as paid.
    pub fn set_paid(&self, token: &str) {
        self.script(
            token,
            PaymentVerification {
                paid: true,
                result: Some("000".to_string()),
                result_explanation: Some("Transaction paid".to_string()),
                transaction_amount: Some("200.00".to_string()),
                customer_name: Some("Amina Juma".to_string()),
                customer_email: Some("amina@example.com".to_string()),
                customer_phone: Some("0712345678".to_string()),
            },
        );
    }

    /// Scripts `token` as unpaid with a gateway result code.
    pub fn set_unpaid(&self, token: &str, result: &str, explanation: &str) {
        self.script(
            token,
            PaymentVerification {
                paid: false,
                result: Some(result.to_string()),
                result_explanation: Some(explanation.to_string()),
                transaction_amount: None,
                customer_name: None,
                customer_email: None,
                customer_phone: None,
            },
        );
    }

    fn script(&self, token: &str, verification: PaymentVerification) {
        self.state
            .lock()
            .unwrap()
            .verifications
            .insert(token.to_string(), verification);
    }

    /// Makes every later verification wait `delay` before answering.
    pub fn set_verify_delay(&self, delay: Duration) {
        self.state.lock().unwrap().verify_delay = Some(delay);
    }

    /// Number of token creation attempts.
    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    /// The most recent token creation request.
    pub fn last_request(&self) -> Option<PaymentRequest> {
        self.state.lock().unwrap().last_request.clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_token(&self, request: &PaymentRequest) -> Result<CreatedPayment> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        state.last_request = Some(request.clone());
        if let Some(message) = state.create_error.clone() {
            return Err(Error::Gateway { message });
        }
        let trans_token = format!("TT-{}", state.create_calls);
        Ok(CreatedPayment {
            payment_url: format!("https://pay.test/?ID={trans_token}"),
            trans_ref: Some(format!("R{}", state.create_calls)),
            trans_token,
            result_explanation: Some("Transaction created".to_string()),
        })
    }

    async fn verify_payment(&self, trans_token: &str) -> Result<PaymentVerification> {
        let (delay, verification) = {
            let state = self.state.lock().unwrap();
            (state.verify_delay, state.verifications.get(trans_token).cloned())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        verification.ok_or_else(|| Error::Gateway {
            message: "connection refused".to_string(),
        })
    }
}

/// Sets up a checkout service over a fresh database seeded with `roll_codes`
/// (no roll at all when empty) and a [`FakeGateway`].
pub async fn setup_checkout(
    roll_codes: &[&str],
) -> Result<(CheckoutService, Arc<FakeGateway>)> {
    let db = setup_test_db().await?;
    if !roll_codes.is_empty() {
        create_test_roll(&db, "Test Roll", roll_codes).await?;
    }
    let gateway = Arc::new(FakeGateway::default());
    let service = CheckoutService::new(
        Arc::new(Allocator::new(db)),
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        &AppConfig::default(),
    );
    Ok((service, gateway))
}
