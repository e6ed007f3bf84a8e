//! Engine configuration and per-request context

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::TaxRoundingMethod;

/// Order in which candidate lines are scanned when pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrder {
    /// Latest maturity first
    #[default]
    NewestFirst,
    /// Earliest maturity first
    OldestFirst,
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Decimal precision of company-currency accounting amounts
    pub account_precision: u32,
    /// Default label of write-off lines
    pub writeoff_label: String,
    /// Label of exchange difference entries
    pub exchange_label: String,
    pub match_order: MatchOrder,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            account_precision: 2,
            writeoff_label: "Write-Off".to_string(),
            exchange_label: "Currency exchange rate difference".to_string(),
            match_order: MatchOrder::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `ACCOUNTING_*` environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("ACCOUNTING").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Precision used by the balance check, never below 5 digits
    pub fn balance_digits(&self) -> u32 {
        self.account_precision.max(5)
    }
}

/// Role of the user issuing a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Bound by both lock dates
    #[default]
    Accountant,
    /// Bound by the fiscal year lock date only
    Adviser,
}

/// Who acts, for which company, and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub company_id: String,
    pub role: ActorRole,
    pub today: NaiveDate,
    /// Overrides the company tax rounding method
    pub tax_rounding: Option<TaxRoundingMethod>,
}

impl RequestContext {
    pub fn new(company_id: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            company_id: company_id.into(),
            role: ActorRole::default(),
            today,
            tax_rounding: None,
        }
    }

    pub fn as_adviser(mut self) -> Self {
        self.role = ActorRole::Adviser;
        self
    }

    pub fn with_tax_rounding(mut self, method: TaxRoundingMethod) -> Self {
        self.tax_rounding = Some(method);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.account_precision, 2);
        assert_eq!(config.writeoff_label, "Write-Off");
        assert_eq!(config.match_order, MatchOrder::NewestFirst);
        assert_eq!(config.balance_digits(), 5);
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"account_precision": 6, "match_order": "oldest_first"}"#)
                .unwrap();
        assert_eq!(config.account_precision, 6);
        assert_eq!(config.balance_digits(), 6);
        assert_eq!(config.match_order, MatchOrder::OldestFirst);
        assert_eq!(config.exchange_label, "Currency exchange rate difference");
    }

    #[test]
    fn test_from_env_overrides_defaults() {
        std::env::set_var("ACCOUNTING_WRITEOFF_LABEL", "Bank charges");
        std::env::set_var("ACCOUNTING_ACCOUNT_PRECISION", "3");
        let config = EngineConfig::from_env().unwrap();
        std::env::remove_var("ACCOUNTING_WRITEOFF_LABEL");
        std::env::remove_var("ACCOUNTING_ACCOUNT_PRECISION");

        assert_eq!(config.writeoff_label, "Bank charges");
        assert_eq!(config.account_precision, 3);
        assert_eq!(config.match_order, MatchOrder::NewestFirst);
    }

    #[test]
    fn test_context_builders() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let ctx = RequestContext::new("c1", today)
            .as_adviser()
            .with_tax_rounding(TaxRoundingMethod::RoundGlobally);
        assert_eq!(ctx.role, ActorRole::Adviser);
        assert_eq!(ctx.tax_rounding, Some(TaxRoundingMethod::RoundGlobally));
    }
}
