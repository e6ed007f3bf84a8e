//! Reconciliation of journal items
//!
//! Matching debit and credit items produces partial reconciliations. When a
//! set of matched items is settled, a full reconciliation ties them
//! together, booking an exchange difference entry first if one currency is
//! settled while the other is not.

pub mod engine;
pub mod exchange;
pub mod matcher;
pub mod residual;
pub mod writeoff;

use serde::{Deserialize, Serialize};

use crate::traits::AccountingStorage;
use crate::types::*;

pub use engine::*;
pub use matcher::{get_pair_to_reconcile, MatchField, MatchPair};
pub use residual::{compute_residual, LineResidual};
pub use writeoff::*;

/// Which residual drives the matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingField {
    /// Chosen from the account and line currencies
    #[default]
    Auto,
    /// Company currency only; partials carry no amount in currency
    CompanyCurrencyOnly,
    /// Secondary currency only
    ForeignCurrencyOnly,
}

/// Options of a reconciliation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcileOptions {
    pub matching: MatchingField,
}

/// Root of the parent chain of a partner
pub(crate) async fn commercial_partner_id<S: AccountingStorage + ?Sized>(
    storage: &S,
    partner_id: Option<&str>,
) -> LedgerResult<Option<String>> {
    let Some(mut current) = partner_id.map(str::to_string) else {
        return Ok(None);
    };

    // Bounded walk in case of a cyclic hierarchy
    for _ in 0..32 {
        match storage.get_partner(&current).await? {
            Some(Partner {
                parent_id: Some(parent),
                ..
            }) if parent != current => current = parent,
            _ => break,
        }
    }
    Ok(Some(current))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;

    use crate::config::{EngineConfig, RequestContext};
    use crate::currency::Currency;
    use crate::ledger::account::{utils::create_standard_chart, AccountManager, StandardChart};
    use crate::ledger::moves::{MoveDraft, MoveManager};
    use crate::reconciliation::ReconciliationEngine;
    use crate::traits::AccountingStorage;
    use crate::types::*;
    use crate::utils::memory_storage::MemoryStorage;

    pub const PARTNER: &str = "p1";

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    /// EUR company with the standard chart, a USD currency and one customer
    pub struct Fixture {
        pub engine: ReconciliationEngine<MemoryStorage>,
        pub chart: StandardChart,
        pub ctx: RequestContext,
    }

    pub async fn fixture() -> Fixture {
        let mut storage = MemoryStorage::new();
        storage.save_currency(&Currency::new("EUR", "Euro", 2)).await.unwrap();
        storage.save_currency(&Currency::new("USD", "US Dollar", 2)).await.unwrap();
        storage
            .save_partner(&Partner {
                id: PARTNER.to_string(),
                name: "Customer".to_string(),
                parent_id: None,
            })
            .await
            .unwrap();

        let mut company = Company::new("c1".to_string(), "Acme".to_string(), "EUR".to_string());
        storage.save_company(&company).await.unwrap();
        let mut accounts = AccountManager::new(storage.clone());
        let chart = create_standard_chart(&mut accounts, &mut company).await.unwrap();

        Fixture {
            engine: ReconciliationEngine::new(MoveManager::new(storage, EngineConfig::default())),
            chart,
            ctx: RequestContext::new("c1", date(2024, 3, 31)),
        }
    }

    impl Fixture {
        pub fn account(&self, key: &str) -> String {
            self.chart.account(key).unwrap().id.clone()
        }

        pub fn journal(&self, key: &str) -> String {
            self.chart.journal(key).unwrap().id.clone()
        }

        pub async fn line(&self, line_id: &str) -> MoveLine {
            self.engine.moves().get_line_required(line_id).await.unwrap()
        }

        /// Post an entry and return its first item
        async fn book(&mut self, journal: &str, date: NaiveDate, lines: Vec<MoveLine>) -> MoveLine {
            let draft = MoveDraft {
                journal_id: self.journal(journal),
                date,
                reference: None,
                lines,
            };
            let recorded = self.engine.moves_mut().record(&self.ctx, draft).await.unwrap();
            recorded.lines.into_iter().next().unwrap()
        }

        fn pair(
            &self,
            first: &str,
            second: &str,
            balance: &BigDecimal,
            amount_currency: Option<BigDecimal>,
            label: &str,
        ) -> Vec<MoveLine> {
            let mut a = MoveLine::from_balance(self.account(first), balance, label.to_string())
                .with_partner(Some(PARTNER.to_string()));
            let mut b = MoveLine::from_balance(self.account(second), &-balance.clone(), label.to_string())
                .with_partner(Some(PARTNER.to_string()));
            if let Some(amount_currency) = amount_currency {
                a = a.with_currency("USD".to_string(), amount_currency.clone());
                b = b.with_currency("USD".to_string(), -amount_currency);
            }
            vec![a, b]
        }

        /// Customer invoice; returns the receivable item
        pub async fn invoice(&mut self, amount: &str, usd: Option<&str>, on: NaiveDate) -> MoveLine {
            let lines = self.pair("receivable", "sales", &dec(amount), usd.map(dec), "INV");
            self.book("sale", on, lines).await
        }

        /// Customer payment; returns the receivable item
        pub async fn payment(&mut self, amount: &str, usd: Option<&str>, on: NaiveDate) -> MoveLine {
            let lines = self.pair(
                "receivable",
                "bank",
                &-dec(amount),
                usd.map(|value| -dec(value)),
                "PAY",
            );
            self.book("bank", on, lines).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;

    #[tokio::test]
    async fn test_commercial_partner_is_the_root() {
        let mut storage = MemoryStorage::new();
        for (id, parent) in [("acme", None), ("acme-billing", Some("acme")), ("alice", Some("acme-billing"))] {
            storage
                .save_partner(&Partner {
                    id: id.to_string(),
                    name: id.to_string(),
                    parent_id: parent.map(str::to_string),
                })
                .await
                .unwrap();
        }

        let root = commercial_partner_id(&storage, Some("alice")).await.unwrap();
        assert_eq!(root.as_deref(), Some("acme"));
        assert_eq!(commercial_partner_id(&storage, None).await.unwrap(), None);
        let unknown = commercial_partner_id(&storage, Some("bob")).await.unwrap();
        assert_eq!(unknown.as_deref(), Some("bob"));
    }
}
