//! Access plan catalogue.
//!
//! Plans are what the customer picks at checkout. The catalogue comes from
//! the `[[plans]]` tables of config.toml; [`default_plans`] mirrors the
//! storefront's stock offering.

use serde::Deserialize;

/// A purchasable access plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanConfig {
    /// Stable identifier used by the storefront (e.g., `"1day"`)
    pub id: String,
    /// Display name recorded on the ledger entry
    pub name: String,
    /// Human-readable access duration
    pub duration: String,
    /// Price in whole currency units
    pub price: i64,
    /// Devices allowed on one voucher
    #[serde(default = "one")]
    pub devices: u32,
    /// Advertised speed
    #[serde(default)]
    pub speed: Option<String>,
}

const fn one() -> u32 {
    1
}

/// The four stock plans: hourly, daily, weekly, monthly.
#[must_use]
pub fn default_plans() -> Vec<PlanConfig> {
    [
        ("1hour", "1 Hour Access", "1 Hour", 50, 1, "5 Mbps"),
        ("1day", "Daily Pass", "24 Hours", 200, 2, "10 Mbps"),
        ("1week", "Weekly Pass", "7 Days", 1000, 5, "20 Mbps"),
        ("1month", "Monthly Pass", "30 Days", 3500, 10, "50 Mbps"),
    ]
    .into_iter()
    .map(|(id, name, duration, price, devices, speed)| PlanConfig {
        id: id.to_string(),
        name: name.to_string(),
        duration: duration.to_string(),
        price,
        devices,
        speed: Some(speed.to_string()),
    })
    .collect()
}

/// Looks up a plan by id.
#[must_use]
pub fn find_plan<'a>(plans: &'a [PlanConfig], id: &str) -> Option<&'a PlanConfig> {
    plans.iter().find(|plan| plan.id == id)
}
