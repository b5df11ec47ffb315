//! Application configuration loading from config.toml and the environment.
//!
//! Non-secret settings (plan catalogue, gateway endpoints, timeouts) live in
//! config.toml. The gateway company token is a secret and is only ever read
//! from the `DPO_COMPANY_TOKEN` environment variable.

use super::plans::{PlanConfig, default_plans};
use crate::errors::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the gateway company token.
pub const COMPANY_TOKEN_ENV: &str = "DPO_COMPANY_TOKEN";

/// Top-level structure of config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Plans offered at checkout
    #[serde(default = "default_plans")]
    pub plans: Vec<PlanConfig>,
    /// Payment gateway settings
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Age after which unpaid sessions are purged. Must cover the gateway's
    /// payment time limit.
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_minutes: u64,
}

/// Non-secret payment gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// XML API endpoint
    pub api_url: String,
    /// Hosted payment page; the transaction token is appended as `?ID=`
    pub payment_url_base: String,
    /// Merchant service type identifier
    pub service_type: String,
    /// ISO currency code
    pub currency: String,
    /// Customer country code
    pub country: String,
    /// Customer country name, used to preselect payment options
    pub default_payment_country: String,
    /// Preselected payment method (`MO` = mobile money)
    pub default_payment: String,
    /// Payment time limit in hours
    pub payment_time_limit_hours: u32,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Where the gateway sends the customer after paying
    pub redirect_url: String,
    /// Where the gateway sends the customer on "back"
    pub back_url: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_url: "https://secure.3gdirectpay.com/API/v6/".to_string(),
            payment_url_base: "https://secure.3gdirectpay.com/payv2.php".to_string(),
            service_type: "5525".to_string(),
            currency: "TZS".to_string(),
            country: "TZ".to_string(),
            default_payment_country: "Tanzania".to_string(),
            default_payment: "MO".to_string(),
            payment_time_limit_hours: 24,
            timeout_secs: 30,
            redirect_url: "http://localhost:3000/payment/callback".to_string(),
            back_url: "http://localhost:3000/".to_string(),
        }
    }
}

impl GatewaySettings {
    /// Request timeout as a [`Duration`]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

const fn default_pending_ttl() -> u64 {
    24 * 60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plans: default_plans(),
            gateway: GatewaySettings::default(),
            pending_ttl_minutes: default_pending_ttl(),
        }
    }
}

impl AppConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse config.toml: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Unpaid-session lifetime as a [`chrono::Duration`]
    #[must_use]
    pub fn pending_ttl(&self) -> chrono::Duration {
        i64::try_from(self.pending_ttl_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    fn validate(&self) -> Result<()> {
        let payment_window = u64::from(self.gateway.payment_time_limit_hours) * 60;
        if self.pending_ttl_minutes < payment_window {
            return Err(Error::Config {
                message: format!(
                    "pending_ttl_minutes ({}) is shorter than the gateway payment time limit ({payment_window} minutes)",
                    self.pending_ttl_minutes
                ),
            });
        }
        if self.plans.is_empty() {
            return Err(Error::Config {
                message: "At least one plan must be configured".to_string(),
            });
        }
        for (index, plan) in self.plans.iter().enumerate() {
            if plan.price <= 0 {
                return Err(Error::Config {
                    message: format!("Plan '{}' must have a positive price", plan.id),
                });
            }
            if self.plans[..index].iter().any(|other| other.id == plan.id) {
                return Err(Error::Config {
                    message: format!("Plan id '{}' is configured twice", plan.id),
                });
            }
        }
        Ok(())
    }
}

/// Loads application configuration from a TOML file
///
/// # Errors
/// Returns an error if the file cannot be read, the TOML is invalid, or a
/// plan has a non-positive price or a repeated id.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    tracing::debug!("Loading configuration from {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    AppConfig::from_toml(&contents)
}

/// Loads ./config.toml, falling back to built-in defaults when it is absent.
pub fn load_default_config() -> Result<AppConfig> {
    let path = Path::new("config.toml");
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!("config.toml not found, using built-in defaults");
        Ok(AppConfig::default())
    }
}

/// Reads the gateway company token from the environment.
pub fn company_token_from_env() -> Result<SecretString> {
    std::env::var(COMPANY_TOKEN_ENV)
        .map(SecretString::from)
        .map_err(|e| Error::Config {
            message: format!("{COMPANY_TOKEN_ENV} is not set: {e}"),
        })
}
