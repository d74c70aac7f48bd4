//! Service configuration, read from the environment (and `.env` via dotenvy).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub pricing: PricingConfig,
    pub gateway: GatewayConfig,
    pub reconciliation: ReconciliationConfig,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub currency: String,
    /// Fraction applied to `subtotal - discount`.
    pub tax_rate: Decimal,
    /// Decimal places of the currency's minor unit.
    pub scale: u32,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
    pub return_url: String,
    pub cancel_url: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ReconciliationConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PricingConfig {
    fn default() -> Self { Self { currency: "VND".into(), tax_rate: dec!(0.1), scale: 0 } }
}

impl Default for ReconciliationConfig {
    fn default() -> Self { Self { interval: Duration::from_secs(30), max_attempts: 120 } }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let pricing = PricingConfig {
            currency: get("CURRENCY").unwrap_or_else(|| "VND".into()),
            tax_rate: parse_or(&get, "TAX_RATE", dec!(0.1))?,
            scale: parse_or(&get, "CURRENCY_SCALE", 0)?,
        };
        if pricing.tax_rate < Decimal::ZERO || pricing.tax_rate > Decimal::ONE {
            return Err(ConfigError::Invalid { key: "TAX_RATE", value: pricing.tax_rate.to_string() });
        }

        let gateway = GatewayConfig {
            base_url: get("PAYMENT_GATEWAY_URL").unwrap_or_else(|| "https://api-merchant.payos.vn".into()),
            client_id: required("PAYMENT_CLIENT_ID")?,
            api_key: required("PAYMENT_API_KEY")?,
            checksum_key: required("PAYMENT_CHECKSUM_KEY")?,
            return_url: get("PAYMENT_RETURN_URL").unwrap_or_else(|| "http://localhost:3000/payment/success".into()),
            cancel_url: get("PAYMENT_CANCEL_URL").unwrap_or_else(|| "http://localhost:3000/payment/cancel".into()),
            timeout: Duration::from_millis(parse_or(&get, "PAYMENT_TIMEOUT_MS", 10_000)?),
        };

        let reconciliation = ReconciliationConfig {
            interval: Duration::from_secs(parse_or(&get, "RECONCILE_INTERVAL_SECS", 30)?),
            max_attempts: parse_or(&get, "RECONCILE_MAX_ATTEMPTS", 120)?,
        };
        if reconciliation.interval.is_zero() {
            return Err(ConfigError::Invalid { key: "RECONCILE_INTERVAL_SECS", value: "0".into() });
        }
        if reconciliation.max_attempts == 0 {
            return Err(ConfigError::Invalid { key: "RECONCILE_MAX_ATTEMPTS", value: "0".into() });
        }

        Ok(Self {
            port: parse_or(&get, "PORT", 8083)?,
            database_url: get("DATABASE_URL"),
            nats_url: get("NATS_URL"),
            pricing,
            gateway,
            reconciliation,
        })
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
