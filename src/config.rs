use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CANCEL_WINDOW_MINUTES: i64 = 30;
const DEFAULT_RETURN_WINDOW_DAYS: i32 = 7;
const DEFAULT_DELIVERY_CHARGE: i64 = 5_000;
const DEFAULT_FREE_DELIVERY_THRESHOLD: i64 = 50_000;

/// Order policy: self-service windows and delivery pricing.
///
/// Monetary values are in minor currency units.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OrderPolicyConfig {
    /// Minutes after placement during which a customer may cancel without review
    #[serde(default = "default_cancel_window_minutes")]
    #[validate(custom = "validate_positive_minutes")]
    pub cancel_window_minutes: i64,

    /// Return window used for books whose category does not set one
    #[serde(default = "default_return_window_days")]
    #[validate(custom = "validate_positive_days")]
    pub default_return_window_days: i32,

    /// Flat delivery charge
    #[serde(default = "default_delivery_charge")]
    #[validate(custom = "validate_non_negative_amount")]
    pub delivery_charge: i64,

    /// Orders whose final total reaches this amount ship free
    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold: Option<i64>,
}

impl Default for OrderPolicyConfig {
    fn default() -> Self {
        Self {
            cancel_window_minutes: default_cancel_window_minutes(),
            default_return_window_days: default_return_window_days(),
            delivery_charge: default_delivery_charge(),
            free_delivery_threshold: default_free_delivery_threshold(),
        }
    }
}

impl OrderPolicyConfig {
    pub fn cancel_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cancel_window_minutes)
    }

    /// Delivery charge for an order with the given final total.
    pub fn delivery_charge_for(&self, final_total: i64) -> i64 {
        match self.free_delivery_threshold {
            Some(threshold) if final_total >= threshold => 0,
            _ => self.delivery_charge,
        }
    }
}

/// Payment gateway settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    #[serde(default)]
    pub key_id: String,

    /// Shared secret used to sign `order_id|payment_id`
    #[serde(default)]
    pub key_secret: String,

    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_circuit_breaker_failures")]
    pub circuit_breaker_failure_threshold: u32,

    #[serde(default = "default_circuit_breaker_timeout")]
    pub circuit_breaker_timeout_secs: u64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            key_id: String::new(),
            key_secret: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failures(),
            circuit_breaker_timeout_secs: default_circuit_breaker_timeout(),
        }
    }
}

impl PaymentGatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// ISO currency code for all wallets and orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Request timeout applied by the HTTP layer (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub orders: OrderPolicyConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentGatewayConfig,
}

impl AppConfig {
    /// Creates a configuration with default policies
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            currency: default_currency(),
            request_timeout_secs: default_request_timeout_secs(),
            orders: OrderPolicyConfig::default(),
            payment: PaymentGatewayConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.payment.key_secret.trim().is_empty() {
            let mut err = ValidationError::new("payment_key_secret_required");
            err.message = Some(
                "Set APP__PAYMENT__KEY_SECRET in production; online payments cannot be verified without it".into(),
            );
            errors.add("payment", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cancel_window_minutes() -> i64 {
    DEFAULT_CANCEL_WINDOW_MINUTES
}

fn default_return_window_days() -> i32 {
    DEFAULT_RETURN_WINDOW_DAYS
}

fn default_delivery_charge() -> i64 {
    DEFAULT_DELIVERY_CHARGE
}

fn default_free_delivery_threshold() -> Option<i64> {
    Some(DEFAULT_FREE_DELIVERY_THRESHOLD)
}

fn default_gateway_url() -> String {
    "https://api.razorpay.com/v1".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_circuit_breaker_failures() -> u32 {
    5
}

fn default_circuit_breaker_timeout() -> u64 {
    30
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_positive_minutes(minutes: i64) -> Result<(), ValidationError> {
    if minutes <= 0 {
        let mut err = ValidationError::new("cancel_window_minutes");
        err.message = Some("cancel_window_minutes must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_positive_days(days: i32) -> Result<(), ValidationError> {
    if days <= 0 {
        let mut err = ValidationError::new("default_return_window_days");
        err.message = Some("default_return_window_days must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_non_negative_amount(amount: i64) -> Result<(), ValidationError> {
    if amount < 0 {
        let mut err = ValidationError::new("delivery_charge");
        err.message = Some("delivery_charge cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("bookstore_fulfillment={},tower_http=debug", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://bookstore.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.orders.cancel_window_minutes, 30);
        assert_eq!(cfg.orders.default_return_window_days, 7);
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_cancel_window() {
        let mut cfg = base_config();
        cfg.orders.cancel_window_minutes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_policy_values() {
        let mut cfg = base_config();
        cfg.orders.default_return_window_days = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.orders.delivery_charge = -1;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.event_channel_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn production_requires_payment_secret() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.payment.key_secret = "live-secret".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn free_delivery_above_threshold() {
        let policy = OrderPolicyConfig {
            delivery_charge: 4_000,
            free_delivery_threshold: Some(100_000),
            ..OrderPolicyConfig::default()
        };
        assert_eq!(policy.delivery_charge_for(99_999), 4_000);
        assert_eq!(policy.delivery_charge_for(100_000), 0);

        let always_charged = OrderPolicyConfig {
            free_delivery_threshold: None,
            ..policy
        };
        assert_eq!(always_charged.delivery_charge_for(1_000_000), 4_000);
    }
}
