//! Pairing of debit and credit journal items

use bigdecimal::{BigDecimal, Zero};
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use tracing::debug;

use crate::config::MatchOrder;
use crate::currency::Currency;
use crate::reconciliation::{MatchingField, ReconcileOptions};
use crate::types::*;

/// Residual compared when matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    /// Company currency residual
    AmountResidual,
    /// Secondary currency residual
    AmountResidualCurrency,
}

impl MatchField {
    pub fn value<'a>(&self, line: &'a MoveLine) -> &'a BigDecimal {
        match self {
            MatchField::AmountResidual => &line.amount_residual,
            MatchField::AmountResidualCurrency => &line.amount_residual_currency,
        }
    }

    fn forced(matching: MatchingField) -> Option<Self> {
        match matching {
            MatchingField::Auto => None,
            MatchingField::CompanyCurrencyOnly => Some(MatchField::AmountResidual),
            MatchingField::ForeignCurrencyOnly => Some(MatchField::AmountResidualCurrency),
        }
    }
}

/// Debit and credit items selected for a match, as indexes into the candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPair {
    pub debit: usize,
    pub credit: usize,
    pub field: MatchField,
}

/// Whether the account forces a currency other than the company's
pub(crate) fn foreign_account_currency<'a>(
    account: &'a Account,
    company_currency: &Currency,
) -> Option<&'a str> {
    account
        .currency_id
        .as_deref()
        .filter(|currency_id| *currency_id != company_currency.id)
}

/// Currency shared by every line, if any
pub(crate) fn common_currency(lines: &[MoveLine]) -> Option<&str> {
    let first = lines.first()?.currency_id.as_deref()?;
    lines
        .iter()
        .all(|line| line.currency_id.as_deref() == Some(first))
        .then_some(first)
}

/// Select the newest (or oldest) debit and credit items still open
///
/// The secondary currency residual is compared when the account carries a
/// foreign currency, or when every line shares one currency with a non-zero
/// amount in it; otherwise the company residual. Returns `None` when no
/// strictly positive and strictly negative pair exists.
pub fn get_pair_to_reconcile(
    lines: &[MoveLine],
    account: &Account,
    company_currency: &Currency,
    currencies: &HashMap<String, Currency>,
    options: &ReconcileOptions,
    order: MatchOrder,
) -> Option<MatchPair> {
    let mut field = MatchField::AmountResidual;
    let mut rounding = company_currency;

    if let Some(currency_id) = foreign_account_currency(account, company_currency) {
        field = MatchField::AmountResidualCurrency;
        rounding = currencies.get(currency_id).unwrap_or(company_currency);
    }

    if let Some(currency_id) = common_currency(lines) {
        if lines.iter().all(|line| !line.amount_currency.is_zero()) {
            field = MatchField::AmountResidualCurrency;
            rounding = currencies.get(currency_id).unwrap_or(company_currency);
        }
    }

    if let Some(forced) = MatchField::forced(options.matching) {
        field = forced;
        if forced == MatchField::AmountResidual {
            rounding = company_currency;
        }
    }

    let mut sorted: Vec<usize> = (0..lines.len()).collect();
    match order {
        MatchOrder::OldestFirst => sorted.sort_by_key(|&i| lines[i].maturity_or_date()),
        MatchOrder::NewestFirst => sorted.sort_by_key(|&i| Reverse(lines[i].maturity_or_date())),
    }

    let zero = BigDecimal::zero();
    let mut debit = None;
    let mut credit = None;
    for i in sorted {
        if debit.is_some() && credit.is_some() {
            break;
        }
        match rounding.compare_amounts(field.value(&lines[i]), &zero) {
            Ordering::Greater if debit.is_none() => debit = Some(i),
            Ordering::Less if credit.is_none() => credit = Some(i),
            _ => {}
        }
    }

    let pair = MatchPair {
        debit: debit?,
        credit: credit?,
        field,
    };
    debug!(
        debit = %lines[pair.debit].id,
        credit = %lines[pair.credit].id,
        field = ?pair.field,
        "pair selected"
    );
    Some(pair)
}

/// Field used to size a match between a selected pair
pub(crate) fn reconcile_field(
    lines: &[MoveLine],
    debit: &MoveLine,
    account: &Account,
    company_currency: &Currency,
    options: &ReconcileOptions,
) -> MatchField {
    let mut field = if foreign_account_currency(account, company_currency).is_some() {
        MatchField::AmountResidualCurrency
    } else {
        MatchField::AmountResidual
    };

    // Exchange difference items have neither debit nor credit
    if debit.debit.is_zero() && debit.credit.is_zero() {
        field = MatchField::AmountResidualCurrency;
    }

    if common_currency(lines).is_some() {
        field = MatchField::AmountResidualCurrency;
    }

    MatchField::forced(options.matching).unwrap_or(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn open_line(id: &str, residual: i32, maturity: (i32, u32, u32)) -> MoveLine {
        let mut line = MoveLine::from_balance(
            "rec".to_string(),
            &BigDecimal::from(residual),
            id.to_string(),
        );
        line.id = id.to_string();
        line.amount_residual = BigDecimal::from(residual);
        line.date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        line.date_maturity = NaiveDate::from_ymd_opt(maturity.0, maturity.1, maturity.2);
        line
    }

    fn receivable() -> Account {
        Account::new(
            "rec".to_string(),
            "1200".to_string(),
            "Receivable".to_string(),
            "c1".to_string(),
            InternalType::Receivable,
        )
    }

    #[test]
    fn test_newest_pair_first_by_default() {
        let lines = vec![
            open_line("inv-late", 100, (2024, 3, 1)),
            open_line("inv-early", 50, (2024, 2, 1)),
            open_line("pay", -80, (2024, 2, 15)),
        ];
        let eur = Currency::new("EUR", "Euro", 2);

        let pair = get_pair_to_reconcile(
            &lines,
            &receivable(),
            &eur,
            &HashMap::new(),
            &ReconcileOptions::default(),
            MatchOrder::default(),
        )
        .unwrap();
        assert_eq!(lines[pair.debit].id, "inv-late");
        assert_eq!(lines[pair.credit].id, "pay");
        assert_eq!(pair.field, MatchField::AmountResidual);

        let pair = get_pair_to_reconcile(
            &lines,
            &receivable(),
            &eur,
            &HashMap::new(),
            &ReconcileOptions::default(),
            MatchOrder::OldestFirst,
        )
        .unwrap();
        assert_eq!(lines[pair.debit].id, "inv-early");
    }

    #[test]
    fn test_no_pair_without_both_sides() {
        let lines = vec![
            open_line("a", 100, (2024, 3, 1)),
            open_line("b", 50, (2024, 2, 1)),
        ];
        let eur = Currency::new("EUR", "Euro", 2);
        assert!(get_pair_to_reconcile(
            &lines,
            &receivable(),
            &eur,
            &HashMap::new(),
            &ReconcileOptions::default(),
            MatchOrder::default(),
        )
        .is_none());
    }

    #[test]
    fn test_shared_currency_switches_field() {
        let mut lines = vec![
            open_line("inv", 100, (2024, 1, 1)),
            open_line("pay", -100, (2024, 1, 2)),
        ];
        lines[0] = lines[0]
            .clone()
            .with_currency("USD".to_string(), BigDecimal::from(120));
        lines[0].amount_residual_currency = BigDecimal::from(120);
        lines[1] = lines[1]
            .clone()
            .with_currency("USD".to_string(), BigDecimal::from(-110));
        lines[1].amount_residual_currency = BigDecimal::from(-110);

        let eur = Currency::new("EUR", "Euro", 2);
        let currencies =
            HashMap::from([("USD".to_string(), Currency::new("USD", "US Dollar", 2))]);
        let pair = get_pair_to_reconcile(
            &lines,
            &receivable(),
            &eur,
            &currencies,
            &ReconcileOptions::default(),
            MatchOrder::default(),
        )
        .unwrap();
        assert_eq!(pair.field, MatchField::AmountResidualCurrency);

        let forced = ReconcileOptions {
            matching: MatchingField::CompanyCurrencyOnly,
        };
        let pair = get_pair_to_reconcile(
            &lines,
            &receivable(),
            &eur,
            &currencies,
            &forced,
            MatchOrder::default(),
        )
        .unwrap();
        assert_eq!(pair.field, MatchField::AmountResidual);
    }
}
