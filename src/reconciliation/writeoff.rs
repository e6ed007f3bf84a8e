//! Write-off entries closing the open balance of a reconciliation

use bigdecimal::{BigDecimal, One, Zero};
use chrono::NaiveDate;
use tracing::{info, instrument};

use crate::config::RequestContext;
use crate::ledger::moves::ValidityCheck;
use crate::reconciliation::{commercial_partner_id, ReconciliationEngine};
use crate::tax::{compute_all, ComputeAllParams, Tax};
use crate::traits::AccountingStorage;
use crate::types::*;

/// How the write-off carries the secondary currency of the written-off items
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WriteoffCurrency {
    /// Mirror the open secondary currency residual of the items
    #[default]
    Auto,
    /// No amount in currency
    Excluded,
    /// Amount in currency booked on the reconciled account
    Explicit(BigDecimal),
}

/// Parameters of a write-off
#[derive(Debug, Clone)]
pub struct WriteoffParams {
    /// Account absorbing the difference
    pub account_id: String,
    pub journal_id: String,
    /// Explicit amounts on the reconciled account; both or neither
    pub debit: Option<BigDecimal>,
    pub credit: Option<BigDecimal>,
    pub date: Option<NaiveDate>,
    pub name: Option<String>,
    /// Taxes applied on the write-off account line
    pub tax_ids: Vec<String>,
    pub currency: WriteoffCurrency,
}

impl WriteoffParams {
    pub fn new(account_id: impl Into<String>, journal_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            journal_id: journal_id.into(),
            debit: None,
            credit: None,
            date: None,
            name: None,
            tax_ids: Vec::new(),
            currency: WriteoffCurrency::default(),
        }
    }

    pub fn amounts(mut self, debit: BigDecimal, credit: BigDecimal) -> Self {
        self.debit = Some(debit);
        self.credit = Some(credit);
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn labelled(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_taxes(mut self, tax_ids: Vec<String>) -> Self {
        self.tax_ids = tax_ids;
        self
    }

    pub fn currency(mut self, currency: WriteoffCurrency) -> Self {
        self.currency = currency;
        self
    }
}

impl<S: AccountingStorage> ReconciliationEngine<S> {
    /// Book a write-off of the open residual of `lines`
    ///
    /// The entry has one item on the account of the written-off items, one on
    /// the write-off account, plus one per tax applied on the latter. It is
    /// posted right away. Returns the item on the written-off account.
    #[instrument(skip(self, ctx, lines, params), fields(lines = lines.len(), account = %params.account_id))]
    pub async fn create_writeoff(
        &mut self,
        ctx: &RequestContext,
        lines: &[MoveLine],
        params: &WriteoffParams,
    ) -> LedgerResult<MoveLine> {
        let first = lines.first().ok_or_else(|| {
            LedgerError::Validation("No journal item to write off".to_string())
        })?;
        let zero = BigDecimal::zero();

        let (debit, credit) = match (&params.debit, &params.credit) {
            (Some(debit), Some(credit)) => (debit.clone(), credit.clone()),
            (None, None) => {
                let residual: BigDecimal = lines.iter().map(|l| &l.amount_residual).sum();
                ((-residual.clone()).max(zero.clone()), residual.max(zero.clone()))
            }
            _ => {
                return Err(LedgerError::Validation(
                    "Either pass both debit and credit or none.".to_string(),
                ))
            }
        };

        let name = params
            .name
            .clone()
            .unwrap_or_else(|| self.config().writeoff_label.clone());
        let date = params.date.unwrap_or(ctx.today);
        let partner_id = commercial_partner_id(self.storage(), first.partner_id.as_deref()).await?;
        let (company, company_currency) = self.company_and_currency(&first.company_id).await?;

        let writeoff_currency = first
            .currency_id
            .clone()
            .unwrap_or_else(|| company.currency_id.clone());
        let amount_currency = match &params.currency {
            WriteoffCurrency::Excluded => None,
            WriteoffCurrency::Explicit(amount) => first
                .currency_id
                .clone()
                .map(|currency_id| (currency_id, amount.clone())),
            WriteoffCurrency::Auto if writeoff_currency != company.currency_id => {
                let residual: BigDecimal = lines.iter().map(|l| &l.amount_residual_currency).sum();
                // Follow the booked side; with nothing left in company currency,
                // close the currency residual instead
                let sign = if debit > zero {
                    BigDecimal::one()
                } else if credit > zero || residual > zero {
                    -BigDecimal::one()
                } else {
                    BigDecimal::one()
                };
                Some((writeoff_currency, sign * residual.abs()))
            }
            WriteoffCurrency::Auto => None,
        };

        let mut taxes: Vec<Tax> = Vec::with_capacity(params.tax_ids.len());
        for tax_id in &params.tax_ids {
            let tax = self
                .storage()
                .get_tax(tax_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("Tax", tax_id.clone()))?;
            taxes.push(tax);
        }

        let mut entry_lines = Vec::with_capacity(2 + taxes.len());
        if taxes.is_empty() {
            let mut counterpart = MoveLine::new(first.account_id.clone(), debit.clone(), credit.clone(), name.clone())
                .with_partner(partner_id.clone());
            let mut writeoff = MoveLine::new(params.account_id.clone(), credit, debit, name.clone())
                .with_partner(partner_id.clone());
            if let Some((currency_id, amount)) = &amount_currency {
                counterpart = counterpart.with_currency(currency_id.clone(), amount.clone());
                writeoff = writeoff.with_currency(currency_id.clone(), -amount.clone());
            }
            entry_lines.push(counterpart);
            entry_lines.push(writeoff);
        } else {
            let amount = &credit - &debit;
            let rounding = ctx.tax_rounding.unwrap_or(company.tax_rounding_method);
            let compute = ComputeAllParams::new(amount.clone(), BigDecimal::one(), &company_currency)
                .rounding(rounding);
            let result = compute_all(&taxes, &compute)?;

            let mut counterpart = MoveLine::from_balance(
                first.account_id.clone(),
                &-result.total_included.clone(),
                name.clone(),
            )
            .with_partner(partner_id.clone());
            let mut writeoff =
                MoveLine::from_balance(params.account_id.clone(), &result.total_excluded, name.clone())
                    .with_partner(partner_id.clone())
                    .with_taxes(params.tax_ids.clone());
            if let Some((currency_id, amount)) = &amount_currency {
                counterpart = counterpart.with_currency(currency_id.clone(), amount.clone());
                writeoff = writeoff.with_currency(currency_id.clone(), -amount.clone());
            }
            entry_lines.push(counterpart);
            entry_lines.push(writeoff);

            for applied in result.taxes {
                if applied.amount.is_zero() {
                    continue;
                }
                let account_id = if amount > zero {
                    applied.account_id
                } else {
                    applied.refund_account_id.or(applied.account_id)
                }
                .unwrap_or_else(|| params.account_id.clone());
                let mut tax_line = MoveLine::from_balance(
                    account_id,
                    &applied.amount,
                    format!("{} {}", name, applied.name),
                )
                .with_partner(partner_id.clone());
                tax_line.tax_line_id = Some(applied.tax_id);
                entry_lines.push(tax_line);
            }
        }

        let move_ = self
            .moves
            .create_move(ctx, &params.journal_id, date, None)
            .await?;
        let saved = self
            .moves
            .add_lines(ctx, &move_.id, entry_lines, ValidityCheck::Deferred)
            .await?;
        self.moves.post(ctx, &move_.id).await?;

        let counterpart = saved.into_iter().next().ok_or_else(|| {
            LedgerError::InvariantViolation("Write-off entry has no journal item".to_string())
        })?;
        info!(
            move_id = %move_.id,
            debit = %counterpart.debit,
            credit = %counterpart.credit,
            "write-off booked"
        );
        Ok(counterpart)
    }
}
