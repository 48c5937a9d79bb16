//! Configuration loading and representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bankbook_core::Currency;

pub const DEFAULT_CURRENCY_ENV: &str = "BANKBOOK_DEFAULT_CURRENCY";
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Process-level settings of the bank service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Currency of the organization; used when an account is opened without one.
    pub default_currency: Currency,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            default_currency: Currency::new("EUR").unwrap_or_default(),
            log_filter: "info".to_string(),
        }
    }
}

impl BankConfig {
    /// Defaults overridden by `BANKBOOK_DEFAULT_CURRENCY` and `RUST_LOG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BankConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(code) = lookup(DEFAULT_CURRENCY_ENV).filter(|v| !v.trim().is_empty()) {
            config.default_currency = Currency::new(&code).map_err(|e| ConfigError::Invalid {
                key: DEFAULT_CURRENCY_ENV,
                reason: e.to_string(),
            })?;
        }
        if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|v| !v.trim().is_empty()) {
            config.log_filter = filter;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = BankConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BankConfig::default());
        assert_eq!(config.default_currency.code(), "EUR");
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = BankConfig::from_lookup(lookup(&[
            (DEFAULT_CURRENCY_ENV, "usd"),
            (LOG_FILTER_ENV, "bankbook_bank=debug"),
        ]))
        .unwrap();
        assert_eq!(config.default_currency.code(), "USD");
        assert_eq!(config.log_filter, "bankbook_bank=debug");
    }

    #[test]
    fn malformed_currency_is_reported() {
        let err = BankConfig::from_lookup(lookup(&[(DEFAULT_CURRENCY_ENV, "euros")])).unwrap_err();
        assert!(err.to_string().contains(DEFAULT_CURRENCY_ENV));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: BankConfig = serde_json::from_str(r#"{"default_currency":"gbp"}"#).unwrap();
        assert_eq!(config.default_currency.code(), "GBP");
        assert_eq!(config.log_filter, "info");
    }
}
