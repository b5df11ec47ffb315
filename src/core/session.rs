//! Payment sessions - Checkout from plan selection to issued voucher.
//!
//! A session moves `created → awaiting_gateway → {paid, failed, cancelled}`.
//! Sessions that fail or are cancelled are discarded. A paid session is
//! fulfilled by the allocator and then removed; if no voucher is available
//! it stays in `paid` so an admin can reconcile it after restocking.
//!
//! Gateway calls happen outside the allocator's lock.

use crate::{
    config::{AppConfig, GatewaySettings, PlanConfig, plans::find_plan},
    core::{
        allocator::{self, Allocator, PlanSelection, PurchaseMeta},
        ledger,
    },
    entities::{PendingPurchase, SessionState, pending_purchase, purchased_voucher},
    errors::{Error, Result},
    gateway::{PaymentGateway, PaymentRequest},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*, sea_query::Expr};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{error, info, warn};

/// Customer details captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    /// Full name
    pub name: String,
    /// Email address
    pub email: String,
    /// Phone number
    pub phone: String,
}

/// Where to send the customer to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRedirect {
    /// Merchant reference of the new session
    pub company_ref: String,
    /// Hosted payment page
    pub payment_url: String,
    /// Gateway transaction token
    pub trans_token: String,
}

/// Query parameters the gateway appends when it sends the customer back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// `TransactionToken` (or legacy `TransID`)
    pub trans_token: Option<String>,
    /// `CompanyRef`
    pub company_ref: Option<String>,
}

impl CallbackParams {
    /// Reads callback parameters from decoded query pairs.
    ///
    /// `TransactionToken` wins over `TransID`; empty values count as absent.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut token = None;
        let mut trans_id = None;
        let mut company_ref = None;
        for (key, value) in pairs {
            let value: String = value.into();
            if value.trim().is_empty() {
                continue;
            }
            match key.as_ref() {
                "TransactionToken" => token = Some(value),
                "TransID" => trans_id = Some(value),
                "CompanyRef" => company_ref = Some(value),
                _ => {}
            }
        }
        Self {
            trans_token: token.or(trans_id),
            company_ref,
        }
    }
}

/// Splits a full name into first and last name for the gateway.
fn split_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

fn required(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation {
            message: format!("{field} is required"),
        });
    }
    Ok(value.to_string())
}

fn plan_of(session: &pending_purchase::Model) -> PlanSelection {
    PlanSelection {
        name: session.plan.clone(),
        duration: session.duration.clone(),
        price: session.price,
    }
}

/// Drives payment sessions against a gateway and the allocator.
pub struct CheckoutService {
    allocator: Arc<Allocator>,
    gateway: Arc<dyn PaymentGateway>,
    plans: Vec<PlanConfig>,
    settings: GatewaySettings,
    last_ref_millis: AtomicI64,
}

impl CheckoutService {
    /// Creates a checkout service using the plans and gateway settings of `config`.
    #[must_use]
    pub fn new(
        allocator: Arc<Allocator>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            allocator,
            gateway,
            plans: config.plans.clone(),
            settings: config.gateway.clone(),
            last_ref_millis: AtomicI64::new(0),
        }
    }

    fn db(&self) -> &DatabaseConnection {
        self.allocator.db()
    }

    /// Plans offered at checkout.
    #[must_use]
    pub fn plans(&self) -> &[PlanConfig] {
        &self.plans
    }

    /// Generates a merchant reference: strictly increasing milliseconds plus a
    /// random suffix.
    fn next_company_ref(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_ref_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let millis = now.max(previous + 1);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{millis}-{}", &suffix[..8])
    }

    /// Starts checkout for `plan_id` and returns the payment page to redirect to.
    ///
    /// Fails with [`Error::NoCodesAvailable`] before contacting the gateway if
    /// the voucher pool is empty. A gateway failure discards the session and is
    /// returned as [`Error::Gateway`].
    pub async fn start_checkout(&self, plan_id: &str, customer: Customer) -> Result<CheckoutRedirect> {
        let plan = find_plan(&self.plans, plan_id).ok_or_else(|| Error::Validation {
            message: format!("Unknown plan: {plan_id}"),
        })?;
        let name = required(&customer.name, "Full name")?;
        let email = required(&customer.email, "Email address")?;
        let phone = required(&customer.phone, "Phone number")?;

        if allocator::available_count(self.db()).await? == 0 {
            warn!(plan = %plan.id, "Checkout refused, voucher pool is empty");
            return Err(Error::NoCodesAvailable);
        }

        let now = Utc::now();
        let session = pending_purchase::ActiveModel {
            company_ref: Set(self.next_company_ref()),
            plan: Set(plan.name.clone()),
            duration: Set(plan.duration.clone()),
            price: Set(plan.price),
            user_name: Set(name.clone()),
            user_email: Set(email.clone()),
            user_phone: Set(phone.clone()),
            state: Set(SessionState::Created),
            trans_token: Set(None),
            trans_ref: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await?;
        info!(company_ref = %session.company_ref, plan = %plan.id, "Checkout started");

        let (first_name, last_name) = split_name(&name);
        let request = PaymentRequest {
            amount: plan.price,
            currency: self.settings.currency.clone(),
            customer_email: email,
            customer_first_name: first_name,
            customer_last_name: last_name,
            customer_phone: phone,
            company_ref: session.company_ref.clone(),
            redirect_url: self.settings.redirect_url.clone(),
            back_url: self.settings.back_url.clone(),
            service_description: format!("{} - {}", plan.name, plan.duration),
        };

        let created = match self.gateway.create_payment_token(&request).await {
            Ok(created) => created,
            Err(e) => {
                warn!(company_ref = %session.company_ref, error = %e, "Payment token creation failed");
                self.discard(&session.company_ref, SessionState::Failed).await?;
                return Err(e);
            }
        };

        let company_ref = session.company_ref.clone();
        let mut active: pending_purchase::ActiveModel = session.into();
        active.state = Set(SessionState::AwaitingGateway);
        active.trans_token = Set(Some(created.trans_token.clone()));
        active.trans_ref = Set(created.trans_ref.clone());
        active.updated_at = Set(Utc::now());
        active.update(self.db()).await?;
        info!(company_ref = %company_ref, "Awaiting payment at gateway");

        Ok(CheckoutRedirect {
            company_ref,
            payment_url: created.payment_url,
            trans_token: created.trans_token,
        })
    }

    /// Handles the customer returning from the gateway.
    ///
    /// Safe to call more than once: a repeated callback for a session that was
    /// already fulfilled returns the voucher issued the first time.
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<purchased_voucher::Model> {
        let fulfilled = match (params.company_ref.as_deref(), params.trans_token.as_deref()) {
            (Some(company_ref), _) => ledger::find_by_trans_ref(self.db(), company_ref).await?,
            (None, Some(trans_token)) => {
                ledger::find_by_trans_token(self.db(), trans_token).await?
            }
            (None, None) => None,
        };
        if let Some(existing) = fulfilled {
            info!(
                trans_ref = ?existing.trans_ref,
                code = %existing.code,
                "Repeated callback for fulfilled session"
            );
            return Ok(existing);
        }

        let Some(trans_token) = params.trans_token else {
            if let Some(company_ref) = params.company_ref.as_deref() {
                if let Some(session) = self.find_session(company_ref).await? {
                    if !session.state.is_terminal() {
                        self.discard(company_ref, SessionState::Cancelled).await?;
                    }
                }
            }
            return Err(Error::PaymentNotCompleted {
                reason: "no payment information was received".to_string(),
            });
        };

        let session = match params.company_ref.as_deref() {
            Some(company_ref) => self.find_session(company_ref).await?,
            None => {
                PendingPurchase::find()
                    .filter(pending_purchase::Column::TransToken.eq(trans_token.as_str()))
                    .one(self.db())
                    .await?
            }
        }
        .ok_or_else(|| Error::SessionNotFound {
            company_ref: params
                .company_ref
                .clone()
                .unwrap_or_else(|| trans_token.clone()),
        })?;

        if session
            .trans_token
            .as_deref()
            .is_some_and(|known| known != trans_token)
        {
            return Err(Error::Validation {
                message: "Transaction token does not match this payment".to_string(),
            });
        }

        self.settle(session, &trans_token).await
    }

    /// Verifies an awaiting session with the gateway without a callback.
    pub async fn verify(&self, company_ref: &str) -> Result<purchased_voucher::Model> {
        let session = self.require_session(company_ref).await?;
        let Some(trans_token) = session.trans_token.clone() else {
            return Err(Error::InvalidSessionState {
                company_ref: company_ref.to_string(),
                state: session.state.to_string(),
                action: "verify",
            });
        };
        self.settle(session, &trans_token).await
    }

    async fn settle(
        &self,
        session: pending_purchase::Model,
        trans_token: &str,
    ) -> Result<purchased_voucher::Model> {
        match session.state {
            SessionState::Created | SessionState::AwaitingGateway => {}
            SessionState::Paid => return self.fulfil(session).await,
            state @ (SessionState::Failed | SessionState::Cancelled) => {
                return Err(Error::InvalidSessionState {
                    company_ref: session.company_ref,
                    state: state.to_string(),
                    action: "verify",
                });
            }
        }

        let verification = self.gateway.verify_payment(trans_token).await?;

        if !verification.paid {
            let state = if verification.is_cancelled() {
                SessionState::Cancelled
            } else {
                SessionState::Failed
            };
            let reason = verification.explanation();
            info!(
                company_ref = %session.company_ref,
                result = ?verification.result,
                %state,
                "Payment not completed"
            );
            self.discard(&session.company_ref, state).await?;
            return Err(Error::PaymentNotCompleted { reason });
        }

        // A concurrent callback may already have fulfilled and removed the row.
        let now = Utc::now();
        PendingPurchase::update_many()
            .col_expr(pending_purchase::Column::State, Expr::value(SessionState::Paid))
            .col_expr(pending_purchase::Column::TransToken, Expr::value(trans_token))
            .col_expr(pending_purchase::Column::UpdatedAt, Expr::value(now))
            .filter(pending_purchase::Column::CompanyRef.eq(session.company_ref.as_str()))
            .exec(self.db())
            .await?;
        let session = pending_purchase::Model {
            state: SessionState::Paid,
            trans_token: Some(trans_token.to_string()),
            updated_at: now,
            ..session
        };
        info!(
            company_ref = %session.company_ref,
            amount = ?verification.transaction_amount,
            "Payment confirmed"
        );

        self.fulfil(session).await
    }

    /// Issues a voucher for a paid session and removes the session.
    async fn fulfil(&self, session: pending_purchase::Model) -> Result<purchased_voucher::Model> {
        let company_ref = session.company_ref.clone();
        let meta = PurchaseMeta {
            user_name: session.user_name.clone(),
            user_email: session.user_email.clone(),
            user_phone: session.user_phone.clone(),
            trans_ref: Some(company_ref.clone()),
            trans_token: session.trans_token.clone(),
        };

        match self.allocator.allocate(&plan_of(&session), meta).await {
            Ok(entry) => {
                PendingPurchase::delete_by_id(company_ref).exec(self.db()).await?;
                Ok(entry)
            }
            Err(Error::NoCodesAvailable) => {
                error!(
                    company_ref = %company_ref,
                    plan = %session.plan,
                    "Payment captured but the voucher pool is empty; needs reconciliation"
                );
                self.flag(&company_ref, "payment received but no voucher was available")
                    .await?;
                Err(Error::PaymentCapturedNoInventory { company_ref })
            }
            Err(e) => {
                error!(company_ref = %company_ref, error = %e, "Voucher allocation failed for a paid session");
                self.flag(&company_ref, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn flag(&self, company_ref: &str, reason: &str) -> Result<()> {
        PendingPurchase::update_many()
            .col_expr(pending_purchase::Column::FailureReason, Expr::value(reason))
            .col_expr(pending_purchase::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(pending_purchase::Column::CompanyRef.eq(company_ref))
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn discard(&self, company_ref: &str, state: SessionState) -> Result<()> {
        PendingPurchase::delete_by_id(company_ref.to_string())
            .exec(self.db())
            .await?;
        info!(company_ref, %state, "Payment session discarded");
        Ok(())
    }

    /// Abandons a session that has not been paid.
    pub async fn cancel(&self, company_ref: &str) -> Result<()> {
        let session = self.require_session(company_ref).await?;
        if session.state.is_terminal() {
            return Err(Error::InvalidSessionState {
                company_ref: company_ref.to_string(),
                state: session.state.to_string(),
                action: "cancel",
            });
        }
        self.discard(company_ref, SessionState::Cancelled).await
    }

    /// Looks up a session by merchant reference.
    pub async fn find_session(&self, company_ref: &str) -> Result<Option<pending_purchase::Model>> {
        PendingPurchase::find_by_id(company_ref.to_string())
            .one(self.db())
            .await
            .map_err(Into::into)
    }

    async fn require_session(&self, company_ref: &str) -> Result<pending_purchase::Model> {
        self.find_session(company_ref)
            .await?
            .ok_or_else(|| Error::SessionNotFound {
                company_ref: company_ref.to_string(),
            })
    }

    /// Paid sessions that are still waiting for a voucher.
    pub async fn unreconciled(&self) -> Result<Vec<pending_purchase::Model>> {
        PendingPurchase::find()
            .filter(pending_purchase::Column::State.eq(SessionState::Paid))
            .order_by_asc(pending_purchase::Column::CreatedAt)
            .all(self.db())
            .await
            .map_err(Into::into)
    }

    /// Retries voucher issue for a paid session, e.g. after a restock.
    pub async fn reconcile(&self, company_ref: &str) -> Result<purchased_voucher::Model> {
        let session = self.require_session(company_ref).await?;
        if session.state != SessionState::Paid {
            return Err(Error::InvalidSessionState {
                company_ref: company_ref.to_string(),
                state: session.state.to_string(),
                action: "reconcile",
            });
        }
        let entry = self.fulfil(session).await?;
        info!(company_ref, code = %entry.code, "Paid session reconciled");
        Ok(entry)
    }

    /// Clears out unpaid sessions older than `max_age`. Paid sessions are kept.
    ///
    /// Sessions that reached the gateway are verified first: a payment that
    /// landed late is fulfilled (or flagged for reconciliation) instead of
    /// being dropped, and a session whose verification fails is kept for the
    /// next run. Returns the number of sessions deleted.
    pub async fn purge_stale(&self, max_age: chrono::Duration) -> Result<u64> {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Ok(0);
        };
        let stale = PendingPurchase::find()
            .filter(
                pending_purchase::Column::State
                    .is_in([SessionState::Created, SessionState::AwaitingGateway]),
            )
            .filter(pending_purchase::Column::CreatedAt.lt(cutoff))
            .order_by_asc(pending_purchase::Column::CreatedAt)
            .all(self.db())
            .await?;

        let mut purged = 0;
        for session in stale {
            let company_ref = session.company_ref.clone();
            let Some(trans_token) = session.trans_token.clone() else {
                self.discard(&company_ref, SessionState::Cancelled).await?;
                purged += 1;
                continue;
            };
            match self.settle(session, &trans_token).await {
                Ok(entry) => {
                    info!(company_ref = %company_ref, code = %entry.code, "Late payment fulfilled during purge");
                }
                Err(Error::PaymentNotCompleted { .. }) => purged += 1,
                Err(e) => {
                    warn!(company_ref = %company_ref, error = %e, "Stale session kept, payment status unknown");
                }
            }
        }

        if purged > 0 {
            info!(purged, "Stale payment sessions purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::rolls;
    use crate::test_utils::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("Amina Juma"), ("Amina".to_string(), "Juma".to_string()));
        assert_eq!(
            split_name("  Neema  Grace Mushi "),
            ("Neema".to_string(), "Grace Mushi".to_string())
        );
        assert_eq!(split_name("Baraka"), ("Baraka".to_string(), String::new()));
    }

    #[test]
    fn test_callback_params_from_query() {
        let params = CallbackParams::from_query([
            ("TransID", "OLD"),
            ("TransactionToken", "TT-1"),
            ("CompanyRef", "REF-1"),
            ("PnrID", "ignored"),
        ]);
        assert_eq!(params.trans_token.as_deref(), Some("TT-1"));
        assert_eq!(params.company_ref.as_deref(), Some("REF-1"));

        let legacy = CallbackParams::from_query([("TransID", "TT-2"), ("CompanyRef", "")]);
        assert_eq!(legacy.trans_token.as_deref(), Some("TT-2"));
        assert_eq!(legacy.company_ref, None);
    }

    #[tokio::test]
    async fn test_company_refs_are_unique_and_increasing() -> Result<()> {
        let (service, _gateway) = setup_checkout(&["A"]).await?;
        let refs: Vec<String> = (0..50).map(|_| service.next_company_ref()).collect();

        let millis: Vec<i64> = refs
            .iter()
            .map(|r| r.split('-').next().unwrap().parse().unwrap())
            .collect();
        assert!(millis.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[tokio::test]
    async fn test_full_checkout_issues_voucher() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A", "B"]).await?;

        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;
        assert_eq!(redirect.payment_url, format!("https://pay.test/?ID={}", redirect.trans_token));

        let session = service.find_session(&redirect.company_ref).await?.unwrap();
        assert_eq!(session.state, SessionState::AwaitingGateway);
        assert_eq!(session.plan, "Daily Pass");

        let request = gateway.last_request().unwrap();
        assert_eq!(request.amount, 200);
        assert_eq!(request.customer_first_name, "Amina");
        assert_eq!(request.customer_last_name, "Juma");
        assert_eq!(request.company_ref, redirect.company_ref);

        gateway.set_paid(&redirect.trans_token);
        let voucher = service
            .handle_callback(CallbackParams {
                trans_token: Some(redirect.trans_token.clone()),
                company_ref: Some(redirect.company_ref.clone()),
            })
            .await?;

        assert_eq!(voucher.code, "A");
        assert_eq!(voucher.trans_ref.as_deref(), Some(redirect.company_ref.as_str()));
        assert_eq!(voucher.user_email, "amina@example.com");
        assert!(service.find_session(&redirect.company_ref).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_callback_returns_same_voucher() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A", "B"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;
        gateway.set_paid(&redirect.trans_token);

        let params = CallbackParams {
            trans_token: Some(redirect.trans_token.clone()),
            company_ref: Some(redirect.company_ref.clone()),
        };
        let first = service.handle_callback(params.clone()).await?;
        let second = service.handle_callback(params).await?;

        assert_eq!(first, second);
        assert_eq!(ledger::list_entries(service.db()).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_callback_without_company_ref_finds_session_by_token() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1hour", test_checkout_customer()).await?;
        gateway.set_paid(&redirect.trans_token);

        let voucher = service
            .handle_callback(CallbackParams {
                trans_token: Some(redirect.trans_token),
                company_ref: None,
            })
            .await?;
        assert_eq!(voucher.plan, "1 Hour Access");
        assert_eq!(voucher.price, 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_refused_when_pool_empty() -> Result<()> {
        let (service, gateway) = setup_checkout(&[]).await?;

        let result = service.start_checkout("1day", test_checkout_customer()).await;
        assert!(matches!(result, Err(Error::NoCodesAvailable)));
        assert_eq!(gateway.create_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_validation() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;

        let unknown = service.start_checkout("1year", test_checkout_customer()).await;
        assert!(matches!(unknown, Err(Error::Validation { .. })));

        let mut customer = test_checkout_customer();
        customer.phone = "  ".to_string();
        let missing_phone = service.start_checkout("1day", customer).await;
        assert!(matches!(missing_phone, Err(Error::Validation { .. })));

        assert_eq!(gateway.create_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_rejection_discards_session() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        gateway.fail_create("Invalid company token");

        let result = service.start_checkout("1day", test_checkout_customer()).await;
        assert!(matches!(result, Err(Error::Gateway { ref message }) if message == "Invalid company token"));
        assert!(PendingPurchase::find().all(service.db()).await?.is_empty());
        assert!(ledger::list_entries(service.db()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_declined_payment_discards_session() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;
        gateway.set_unpaid(&redirect.trans_token, "007", "Transaction declined");

        let result = service
            .handle_callback(CallbackParams {
                trans_token: Some(redirect.trans_token),
                company_ref: Some(redirect.company_ref.clone()),
            })
            .await;

        assert!(matches!(result, Err(Error::PaymentNotCompleted { ref reason }) if reason == "Transaction declined"));
        assert!(service.find_session(&redirect.company_ref).await?.is_none());
        assert!(ledger::list_entries(service.db()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_callback_without_token_cancels_session() -> Result<()> {
        let (service, _gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;

        let result = service
            .handle_callback(CallbackParams {
                trans_token: None,
                company_ref: Some(redirect.company_ref.clone()),
            })
            .await;

        assert!(matches!(result, Err(Error::PaymentNotCompleted { .. })));
        assert!(service.find_session(&redirect.company_ref).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_outage_during_verify_keeps_session() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;

        let result = service.verify(&redirect.company_ref).await;
        assert!(matches!(result, Err(Error::Gateway { .. })));
        let session = service.find_session(&redirect.company_ref).await?.unwrap();
        assert_eq!(session.state, SessionState::AwaitingGateway);

        gateway.set_paid(&redirect.trans_token);
        let voucher = service.verify(&redirect.company_ref).await?;
        assert_eq!(voucher.code, "A");
        Ok(())
    }

    #[tokio::test]
    async fn test_paid_without_inventory_is_flagged_and_reconciled() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        let first = service.start_checkout("1day", test_checkout_customer()).await?;
        let second = service.start_checkout("1week", test_checkout_customer()).await?;
        gateway.set_paid(&first.trans_token);
        gateway.set_paid(&second.trans_token);

        service.verify(&first.company_ref).await?;
        let result = service.verify(&second.company_ref).await;
        assert!(matches!(
            result,
            Err(Error::PaymentCapturedNoInventory { ref company_ref }) if *company_ref == second.company_ref
        ));

        let stuck = service.unreconciled().await?;
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].company_ref, second.company_ref);
        assert_eq!(stuck[0].state, SessionState::Paid);
        assert!(stuck[0].failure_reason.is_some());

        // Purging never drops paid sessions
        assert_eq!(service.purge_stale(chrono::Duration::zero()).await?, 0);

        rolls::add_roll(
            service.db(),
            "Restock".to_string(),
            None,
            codes(&["R-1"]),
            "restock.csv".to_string(),
        )
        .await?;
        let voucher = service.reconcile(&second.company_ref).await?;
        assert_eq!(voucher.code, "R-1");
        assert_eq!(voucher.plan, "Weekly Pass");
        assert!(service.unreconciled().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_requires_paid_session() -> Result<()> {
        let (service, _gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;

        let result = service.reconcile(&redirect.company_ref).await;
        assert!(matches!(result, Err(Error::InvalidSessionState { .. })));

        let missing = service.reconcile("nope").await;
        assert!(matches!(missing, Err(Error::SessionNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel() -> Result<()> {
        let (service, _gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;

        service.cancel(&redirect.company_ref).await?;
        assert!(service.find_session(&redirect.company_ref).await?.is_none());
        assert!(matches!(
            service.cancel(&redirect.company_ref).await,
            Err(Error::SessionNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_stale_sessions() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;

        assert_eq!(service.purge_stale(chrono::Duration::hours(1)).await?, 0);
        assert!(service.find_session(&redirect.company_ref).await?.is_some());

        gateway.set_unpaid(&redirect.trans_token, "904", "Transaction expired");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(service.purge_stale(chrono::Duration::zero()).await?, 1);
        assert!(service.find_session(&redirect.company_ref).await?.is_none());
        assert!(ledger::list_entries(service.db()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_fulfils_late_payment() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;
        gateway.set_paid(&redirect.trans_token);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(service.purge_stale(chrono::Duration::zero()).await?, 0);
        assert!(service.find_session(&redirect.company_ref).await?.is_none());

        let entry = ledger::find_by_trans_ref(service.db(), &redirect.company_ref)
            .await?
            .unwrap();
        assert_eq!(entry.code, "A");

        // The customer's own callback still gets the voucher
        let voucher = service
            .handle_callback(CallbackParams {
                trans_token: Some(redirect.trans_token),
                company_ref: Some(redirect.company_ref),
            })
            .await?;
        assert_eq!(voucher, entry);
        Ok(())
    }

    #[tokio::test]
    async fn test_payment_after_unverifiable_purge_is_honoured() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;

        // Gateway unreachable while purging: the session must survive
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(service.purge_stale(chrono::Duration::zero()).await?, 0);
        assert!(service.find_session(&redirect.company_ref).await?.is_some());

        gateway.set_paid(&redirect.trans_token);
        let voucher = service
            .handle_callback(CallbackParams {
                trans_token: Some(redirect.trans_token),
                company_ref: Some(redirect.company_ref),
            })
            .await?;
        assert_eq!(voucher.code, "A");
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_token_only_callback_returns_same_voucher() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A", "B"]).await?;
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;
        gateway.set_paid(&redirect.trans_token);

        let params = CallbackParams {
            trans_token: Some(redirect.trans_token.clone()),
            company_ref: None,
        };
        let first = service.handle_callback(params.clone()).await?;
        assert_eq!(first.trans_token.as_deref(), Some(redirect.trans_token.as_str()));

        let second = service.handle_callback(params).await?;
        assert_eq!(first, second);
        assert_eq!(ledger::list_entries(service.db()).await?.len(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_callbacks_issue_one_voucher() -> Result<()> {
        let (service, gateway) = setup_checkout(&["A", "B", "C"]).await?;
        let service = Arc::new(service);
        let redirect = service.start_checkout("1day", test_checkout_customer()).await?;
        gateway.set_paid(&redirect.trans_token);
        gateway.set_verify_delay(std::time::Duration::from_millis(50));

        let params = CallbackParams {
            trans_token: Some(redirect.trans_token.clone()),
            company_ref: Some(redirect.company_ref.clone()),
        };
        let first = tokio::spawn({
            let service = Arc::clone(&service);
            let params = params.clone();
            async move { service.handle_callback(params).await }
        });
        let second = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.handle_callback(params).await }
        });

        let first = first.await.unwrap()?;
        let second = second.await.unwrap()?;
        assert_eq!(first.code, second.code);
        assert_eq!(ledger::list_entries(service.db()).await?.len(), 1);
        assert_eq!(allocator::available_count(service.db()).await?, 2);
        assert!(service.find_session(&redirect.company_ref).await?.is_none());
        Ok(())
    }
}
