/// Database configuration and connection management
pub mod database;

/// Access plan catalogue
pub mod plans;

/// config.toml and environment loading
pub mod settings;

pub use plans::PlanConfig;
pub use settings::{AppConfig, GatewaySettings};
