//! Derived residual state of journal items
//!
//! A line on a reconcilable or liquidity account carries the part of its
//! balance not yet matched, in company currency and in its secondary
//! currency. Every partial reconciliation where the line is the debit side
//! decreases the residual, every one where it is the credit side increases
//! it.

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

use crate::currency::{load_currency, Currency};
use crate::traits::AccountingStorage;
use crate::types::*;

/// Residual amounts and reconciled flag of a line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResidual {
    pub amount_residual: BigDecimal,
    pub amount_residual_currency: BigDecimal,
    pub reconciled: bool,
}

impl LineResidual {
    fn settled() -> Self {
        Self {
            amount_residual: BigDecimal::zero(),
            amount_residual_currency: BigDecimal::zero(),
            reconciled: false,
        }
    }

    /// State of a line before any match
    pub fn opening(line: &MoveLine, account: &Account) -> Self {
        if !account.tracks_residual() {
            return Self::settled();
        }
        Self {
            amount_residual: line.balance(),
            amount_residual_currency: if line.currency_id.is_some() {
                line.amount_currency.clone()
            } else {
                BigDecimal::zero()
            },
            reconciled: false,
        }
    }

    pub fn apply(self, line: &mut MoveLine) {
        line.amount_residual = self.amount_residual;
        line.amount_residual_currency = self.amount_residual_currency;
        line.reconciled = self.reconciled;
    }
}

/// Compute the residual of a line from the partial reconciliations touching it
pub async fn compute_residual<S: AccountingStorage + ?Sized>(
    storage: &S,
    line: &MoveLine,
    account: &Account,
    company_currency: &Currency,
    partials: &[PartialReconcile],
) -> LedgerResult<LineResidual> {
    if !account.tracks_residual() {
        return Ok(LineResidual::settled());
    }

    let zero = BigDecimal::zero();
    let balance = line.balance();
    let line_currency = match &line.currency_id {
        Some(currency_id) => Some(load_currency(storage, currency_id).await?),
        None => None,
    };
    let tracks_currency = line_currency.is_some() && !line.amount_currency.is_zero();

    let mut amount = balance.abs();
    let mut amount_currency = line.amount_currency.abs();
    let sign = if balance.is_zero() && tracks_currency {
        // Exchange difference items only move the secondary currency
        if line.amount_currency > zero { 1 } else { -1 }
    } else if balance > zero {
        1
    } else {
        -1
    };
    let sign = BigDecimal::from(sign);

    for partial in partials {
        let partial_sign = if partial.credit_move_id == line.id {
            sign.clone()
        } else {
            -sign.clone()
        };
        amount += &partial_sign * &partial.amount;

        let Some(currency) = line_currency.as_ref().filter(|_| tracks_currency) else {
            continue;
        };
        if partial.currency_id.as_deref() == Some(currency.id.as_str()) {
            amount_currency += &partial_sign * &partial.amount_currency;
        } else {
            let rate = if !balance.is_zero() {
                &line.amount_currency / &balance
            } else {
                let other_id = if partial.debit_move_id == line.id {
                    &partial.credit_move_id
                } else {
                    &partial.debit_move_id
                };
                let date = match storage.get_line(other_id).await? {
                    Some(other) => other.date,
                    None => line.date,
                };
                let company_rate = storage.get_rate(&company_currency.id, date).await?;
                if company_rate.is_zero() {
                    return Err(LedgerError::Configuration(format!(
                        "No usable rate for currency {} at {}",
                        company_currency.id, date
                    )));
                }
                storage.get_rate(&currency.id, date).await? / company_rate
            };
            amount_currency += &partial_sign * currency.round(&(&partial.amount * &rate));
        }
    }

    let matched = !partials.is_empty() && company_currency.is_zero(&amount);
    let currency_settled = match &line_currency {
        Some(currency) if tracks_currency => currency.is_zero(&amount_currency),
        _ => true,
    };

    Ok(LineResidual {
        amount_residual: company_currency.round(&(&amount * &sign)),
        amount_residual_currency: line_currency
            .map(|currency| currency.round(&(&amount_currency * &sign)))
            .unwrap_or_else(BigDecimal::zero),
        reconciled: line.full_reconcile_id.is_some() || (matched && currency_settled),
    })
}

/// Recompute and store the residual of a line
pub async fn refresh_line<S: AccountingStorage + ?Sized>(
    storage: &mut S,
    line_id: &str,
) -> LedgerResult<MoveLine> {
    let mut line = storage
        .get_line(line_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Journal item", line_id))?;
    let account = storage
        .get_account(&line.account_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Account", line.account_id.clone()))?;
    let company = storage
        .get_company(&line.company_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Company", line.company_id.clone()))?;
    let company_currency = load_currency(&*storage, &company.currency_id).await?;
    let partials = storage.get_line_partials(line_id).await?;

    compute_residual(&*storage, &line, &account, &company_currency, &partials)
        .await?
        .apply(&mut line);
    storage.save_line(&line).await?;
    Ok(line)
}
