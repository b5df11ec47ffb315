//! DPO (3G Direct Pay) XML API client.
//!
//! Requests are `API3G` documents posted to a single endpoint; the request
//! kind is named inside the document. Responses are flat XML and only a
//! handful of elements are read from them.

use super::xml::{element_text, escape};
use super::{
    CreatedPayment, PaymentGateway, PaymentRequest, PaymentVerification, RESULT_SUCCESS,
};
use crate::config::GatewaySettings;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

/// Client for the DPO payment API.
#[derive(Debug)]
pub struct DpoClient {
    http: reqwest::Client,
    settings: GatewaySettings,
    company_token: SecretString,
}

impl DpoClient {
    /// Builds a client with the configured request timeout.
    pub fn new(settings: GatewaySettings, company_token: SecretString) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(concat!("voucher-portal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Gateway {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_client(http, settings, company_token))
    }

    /// Wraps an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(
        http: reqwest::Client,
        settings: GatewaySettings,
        company_token: SecretString,
    ) -> Self {
        Self {
            http,
            settings,
            company_token,
        }
    }

    fn create_token_document(&self, request: &PaymentRequest) -> String {
        let service_date = chrono::Local::now().format("%Y/%m/%d %H:%M");
        let s = &self.settings;
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<API3G>
  <CompanyToken>{token}</CompanyToken>
  <Request>createToken</Request>
  <Transaction>
    <PaymentAmount>{amount}</PaymentAmount>
    <PaymentCurrency>{currency}</PaymentCurrency>
    <CompanyRef>{company_ref}</CompanyRef>
    <RedirectURL>{redirect_url}</RedirectURL>
    <BackURL>{back_url}</BackURL>
    <CompanyRefUnique>0</CompanyRefUnique>
    <PTL>{ptl}</PTL>
    <customerEmail>{email}</customerEmail>
    <customerFirstName>{first_name}</customerFirstName>
    <customerLastName>{last_name}</customerLastName>
    <customerPhone>{phone}</customerPhone>
    <customerCountry>{country}</customerCountry>
    <DefaultPayment>{default_payment}</DefaultPayment>
    <DefaultPaymentCountry>{payment_country}</DefaultPaymentCountry>
  </Transaction>
  <Services>
    <Service>
      <ServiceType>{service_type}</ServiceType>
      <ServiceDescription>{description}</ServiceDescription>
      <ServiceDate>{service_date}</ServiceDate>
    </Service>
  </Services>
</API3G>"#,
            token = escape(self.company_token.expose_secret()),
            amount = request.amount,
            currency = escape(&request.currency),
            company_ref = escape(&request.company_ref),
            redirect_url = escape(&request.redirect_url),
            back_url = escape(&request.back_url),
            ptl = s.payment_time_limit_hours,
            email = escape(&request.customer_email),
            first_name = escape(&request.customer_first_name),
            last_name = escape(&request.customer_last_name),
            phone = escape(&request.customer_phone),
            country = escape(&s.country),
            default_payment = escape(&s.default_payment),
            payment_country = escape(&s.default_payment_country),
            service_type = escape(&s.service_type),
            description = escape(&request.service_description),
        )
    }

    fn verify_token_document(&self, trans_token: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<API3G>
  <CompanyToken>{token}</CompanyToken>
  <Request>verifyToken</Request>
  <TransactionToken>{trans_token}</TransactionToken>
</API3G>"#,
            token = escape(self.company_token.expose_secret()),
            trans_token = escape(trans_token),
        )
    }

    async fn post(&self, document: String) -> Result<String> {
        let response = self
            .http
            .post(&self.settings.api_url)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(document)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            warn!(%status, "Payment gateway answered with a non-success HTTP status");
        }
        Ok(body)
    }

    fn payment_url(&self, trans_token: &str) -> String {
        format!("{}?ID={trans_token}", self.settings.payment_url_base)
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    let message = if err.is_timeout() {
        "the payment service did not respond in time, please try again".to_string()
    } else {
        format!("could not reach the payment service: {err}")
    };
    Error::Gateway { message }
}

#[async_trait]
impl PaymentGateway for DpoClient {
    async fn create_payment_token(&self, request: &PaymentRequest) -> Result<CreatedPayment> {
        debug!(company_ref = %request.company_ref, amount = request.amount, "Creating payment token");
        let body = self.post(self.create_token_document(request)).await?;

        let result = element_text(&body, "Result");
        let result_explanation = element_text(&body, "ResultExplanation");
        let trans_token = element_text(&body, "TransToken").filter(|t| !t.is_empty());

        match (result.as_deref(), trans_token) {
            (Some(RESULT_SUCCESS), Some(trans_token)) => Ok(CreatedPayment {
                payment_url: self.payment_url(&trans_token),
                trans_ref: element_text(&body, "TransRef").filter(|r| !r.is_empty()),
                trans_token,
                result_explanation,
            }),
            _ => {
                warn!(
                    company_ref = %request.company_ref,
                    result = ?result,
                    explanation = ?result_explanation,
                    "Payment gateway refused to create a token"
                );
                Err(Error::Gateway {
                    message: result_explanation
                        .unwrap_or_else(|| "the payment could not be created".to_string()),
                })
            }
        }
    }

    async fn verify_payment(&self, trans_token: &str) -> Result<PaymentVerification> {
        debug!(trans_token, "Verifying payment token");
        let body = self.post(self.verify_token_document(trans_token)).await?;

        let Some(result) = element_text(&body, "Result") else {
            return Err(Error::Gateway {
                message: "the payment service returned an unreadable verification response"
                    .to_string(),
            });
        };
        let paid = result == RESULT_SUCCESS;

        Ok(PaymentVerification {
            paid,
            result_explanation: element_text(&body, "ResultExplanation"),
            transaction_amount: paid
                .then(|| element_text(&body, "TransactionAmount"))
                .flatten(),
            customer_name: paid.then(|| element_text(&body, "CustomerName")).flatten(),
            customer_email: paid.then(|| element_text(&body, "CustomerEmail")).flatten(),
            customer_phone: paid.then(|| element_text(&body, "CustomerPhone")).flatten(),
            result: Some(result),
        })
    }
}
