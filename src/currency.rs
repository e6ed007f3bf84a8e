//! Currency rounding and conversion services consumed by the engine

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::traits::AccountingStorage;
use crate::types::*;

/// Currency with its rounding rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    /// ISO code used as identifier (e.g. "EUR")
    pub id: String,
    pub name: String,
    /// Number of decimal places amounts are stored with
    pub decimal_places: u32,
    /// Smallest representable increment (e.g. 0.01, or 0.05 for cash rounding)
    pub rounding: BigDecimal,
}

impl Currency {
    /// Create a currency rounding to its decimal places
    pub fn new(id: impl Into<String>, name: impl Into<String>, decimal_places: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            decimal_places,
            rounding: BigDecimal::new(1.into(), decimal_places as i64),
        }
    }

    /// Use a coarser rounding increment than the decimal places
    pub fn with_rounding(mut self, rounding: BigDecimal) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn decimal_places(&self) -> u32 {
        self.decimal_places
    }

    /// Round half-up to the currency increment
    pub fn round(&self, amount: &BigDecimal) -> BigDecimal {
        if self.rounding.is_zero() {
            return round_digits(amount, self.decimal_places as i64);
        }
        let steps = (amount / &self.rounding).with_scale_round(0, RoundingMode::HalfUp);
        (steps * &self.rounding).with_scale_round(self.decimal_places as i64, RoundingMode::HalfUp)
    }

    /// Whether the amount rounds to zero in this currency
    pub fn is_zero(&self, amount: &BigDecimal) -> bool {
        self.round(amount).is_zero()
    }

    /// Compare two amounts at the currency precision
    pub fn compare_amounts(&self, a: &BigDecimal, b: &BigDecimal) -> Ordering {
        let delta = self.round(&(a - b));
        delta.cmp(&BigDecimal::zero())
    }
}

/// Exchange rate of a currency at a date, relative to the base currency (rate 1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub currency_id: String,
    pub date: NaiveDate,
    /// Units of the currency for one unit of the base currency
    pub rate: BigDecimal,
}

/// Round half-up to a number of decimal digits
pub fn round_digits(amount: &BigDecimal, digits: i64) -> BigDecimal {
    amount.with_scale_round(digits, RoundingMode::HalfUp)
}

/// Tolerance `10^-digits`
pub fn tolerance(digits: u32) -> BigDecimal {
    BigDecimal::new(1.into(), digits as i64)
}

/// Load a currency, returning an error if it is not configured
pub async fn load_currency<S: AccountingStorage + ?Sized>(
    storage: &S,
    currency_id: &str,
) -> LedgerResult<Currency> {
    storage
        .get_currency(currency_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Currency", currency_id))
}

/// Convert an amount between two currencies at the rates valid on `date`
pub async fn convert_amount<S: AccountingStorage + ?Sized>(
    storage: &S,
    amount: &BigDecimal,
    from: &Currency,
    to: &Currency,
    round: bool,
    date: NaiveDate,
) -> LedgerResult<BigDecimal> {
    let converted = if from.id == to.id {
        amount.clone()
    } else {
        let from_rate = storage.get_rate(&from.id, date).await?;
        let to_rate = storage.get_rate(&to.id, date).await?;
        if from_rate.is_zero() {
            return Err(LedgerError::Configuration(format!(
                "No usable rate for currency {} at {}",
                from.id, date
            )));
        }
        amount * &to_rate / &from_rate
    };

    Ok(if round { to.round(&converted) } else { converted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn test_round_half_up() {
        let eur = Currency::new("EUR", "Euro", 2);
        assert_eq!(eur.round(&dec("2.345")), dec("2.35"));
        assert_eq!(eur.round(&dec("2.344")), dec("2.34"));
        assert_eq!(eur.round(&dec("-2.345")), dec("-2.35"));
    }

    #[test]
    fn test_cash_rounding_increment() {
        let chf = Currency::new("CHF", "Swiss Franc", 2).with_rounding(dec("0.05"));
        assert_eq!(chf.round(&dec("1.03")), dec("1.05"));
        assert_eq!(chf.round(&dec("1.02")), dec("1.00"));
    }

    #[test]
    fn test_zero_and_compare() {
        let jpy = Currency::new("JPY", "Yen", 0);
        assert!(jpy.is_zero(&dec("0.4")));
        assert!(!jpy.is_zero(&dec("0.5")));
        assert_eq!(
            jpy.compare_amounts(&dec("100.2"), &dec("100")),
            Ordering::Equal
        );
        assert_eq!(jpy.compare_amounts(&dec("99"), &dec("100")), Ordering::Less);
    }

    #[test]
    fn test_tolerance() {
        assert_eq!(tolerance(5), dec("0.00001"));
    }
}
