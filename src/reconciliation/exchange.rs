//! Full reconciliation of settled item sets and exchange difference entries

use bigdecimal::{BigDecimal, Zero};
use chrono::{Datelike, NaiveDate};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, instrument, warn};

use crate::config::RequestContext;
use crate::currency::{load_currency, Currency};
use crate::ledger::moves::ValidityCheck;
use crate::reconciliation::residual::refresh_line;
use crate::reconciliation::ReconciliationEngine;
use crate::traits::AccountingStorage;
use crate::types::*;

/// Sequence key numbering full reconciliations
const MATCHING_SEQUENCE: &str = "full_reconcile";

/// Exchange difference entry booked to settle a reconciliation
#[derive(Debug, Clone)]
pub struct ExchangeEntry {
    pub entry: Move,
    /// Item on the reconciled account, matched with every open item
    pub line: MoveLine,
    pub partials: Vec<PartialReconcile>,
}

/// Secondary currency carried by every line, when it is not the company's
fn shared_currency<'a>(lines: &'a [MoveLine], company_currency_id: &str) -> Option<&'a str> {
    let first = lines.first()?.currency_id.as_deref();
    let shared = lines.iter().all(|line| line.currency_id.as_deref() == first);
    match first {
        Some(currency_id) if shared && currency_id != company_currency_id => Some(currency_id),
        _ => {
            if lines.iter().any(|line| line.currency_id.is_some()) && !shared {
                warn!("reconciled items mix currencies, no exchange difference is booked");
            }
            None
        }
    }
}

impl<S: AccountingStorage> ReconciliationEngine<S> {
    /// Items and partials reachable from `line_ids` through partials not yet fully reconciled
    async fn open_reconciliation_closure(
        &self,
        line_ids: &[String],
    ) -> LedgerResult<(Vec<MoveLine>, Vec<PartialReconcile>)> {
        let mut queue: VecDeque<String> = line_ids.iter().cloned().collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut partial_ids: HashSet<String> = HashSet::new();
        let mut partials = Vec::new();
        let mut line_order: Vec<String> = Vec::new();

        while let Some(line_id) = queue.pop_front() {
            if !visited.insert(line_id.clone()) {
                continue;
            }
            for partial in self.storage().get_line_partials(&line_id).await? {
                if partial.full_reconcile_id.is_some() || !partial_ids.insert(partial.id.clone()) {
                    continue;
                }
                for side in [&partial.debit_move_id, &partial.credit_move_id] {
                    if !line_order.contains(side) {
                        line_order.push(side.clone());
                    }
                    queue.push_back(side.clone());
                }
                partials.push(partial);
            }
        }

        let lines = self.load_lines(&line_order).await?;
        Ok((lines, partials))
    }

    /// Tie the items matched with `line_ids` in a full reconciliation once they are settled
    ///
    /// The set is settled when total debit equals total credit in company
    /// currency, or when the amounts of the shared secondary currency sum to
    /// zero. In the latter case the remaining company currency difference is
    /// booked as an exchange difference first. Returns `None` when the set is
    /// not settled.
    #[instrument(skip(self, ctx, line_ids), fields(lines = line_ids.len()))]
    pub async fn compute_full_after_batch_reconcile(
        &mut self,
        ctx: &RequestContext,
        line_ids: &[String],
    ) -> LedgerResult<Option<FullReconcile>> {
        let (lines, mut partials) = self.open_reconciliation_closure(line_ids).await?;
        let Some(first) = lines.first() else {
            return Ok(None);
        };

        let (company, company_currency) = self.company_and_currency(&first.company_id).await?;
        let currency = match shared_currency(&lines, &company.currency_id) {
            Some(currency_id) => Some(load_currency(self.storage(), currency_id).await?),
            None => None,
        };

        let total_debit: BigDecimal = lines.iter().map(|l| &l.debit).sum();
        let total_credit: BigDecimal = lines.iter().map(|l| &l.credit).sum();
        let total_amount_currency: BigDecimal = lines.iter().map(|l| &l.amount_currency).sum();
        let max_date = lines.iter().map(|l| l.date).max().unwrap_or(ctx.today);

        let company_settled =
            company_currency.compare_amounts(&total_debit, &total_credit) == Ordering::Equal;
        let currency_settled = currency
            .as_ref()
            .map_or(false, |c| c.is_zero(&total_amount_currency));
        if !company_settled && !currency_settled {
            debug!(debit = %total_debit, credit = %total_credit, "items not settled");
            return Ok(None);
        }

        let to_balance: Vec<MoveLine> = lines
            .iter()
            .filter(|l| !l.amount_residual.is_zero() || !l.amount_residual_currency.is_zero())
            .cloned()
            .collect();

        let mut exchange = None;
        if let Some(currency) = &currency {
            if !to_balance.is_empty() {
                let residual: BigDecimal = to_balance.iter().map(|l| &l.amount_residual).sum();
                let residual_currency: BigDecimal =
                    to_balance.iter().map(|l| &l.amount_residual_currency).sum();
                let after = &total_debit - &total_credit - &residual;
                let after_currency = &total_amount_currency - &residual_currency;
                if !company_currency.is_zero(&after) || !currency.is_zero(&after_currency) {
                    warn!(
                        residual = %residual,
                        residual_currency = %residual_currency,
                        "exchange difference would not settle the items"
                    );
                    return Ok(None);
                }
                exchange = Some(
                    self.create_exchange_rate_entry(ctx, &company, &company_currency, currency, &to_balance, max_date)
                        .await?,
                );
            }
        }

        let mut line_ids: Vec<String> = lines.iter().map(|l| l.id.clone()).collect();
        if let Some(exchange) = &exchange {
            partials.extend(exchange.partials.iter().cloned());
            line_ids.push(exchange.line.id.clone());
        }

        let number = self
            .storage_mut()
            .next_sequence_number(MATCHING_SEQUENCE, max_date.year())
            .await?;
        let full = FullReconcile {
            id: new_id(),
            name: format!("A{}", number),
            partial_reconcile_ids: partials.iter().map(|p| p.id.clone()).collect(),
            reconciled_line_ids: line_ids.clone(),
            exchange_move_id: exchange.as_ref().map(|e| e.entry.id.clone()),
            exchange_partial_rec_id: exchange
                .as_ref()
                .and_then(|e| e.partials.first())
                .map(|p| p.id.clone()),
        };
        self.storage_mut().save_full_reconcile(&full).await?;

        for mut partial in partials {
            partial.full_reconcile_id = Some(full.id.clone());
            self.storage_mut().save_partial(&partial).await?;
        }
        for line_id in &line_ids {
            let mut line = self.moves.get_line_required(line_id).await?;
            line.full_reconcile_id = Some(full.id.clone());
            self.storage_mut().save_line(&line).await?;
            refresh_line(self.storage_mut(), line_id).await?;
        }

        info!(
            full = %full.name,
            lines = full.reconciled_line_ids.len(),
            exchange = full.exchange_move_id.is_some(),
            "full reconcile created"
        );
        Ok(Some(full))
    }

    /// Book the residuals of `to_fix` as an exchange difference
    ///
    /// One item on the reconciled account carries the opposite of the summed
    /// residuals and is matched with every item of `to_fix`; its counterpart
    /// goes to the exchange gain or loss account.
    ///
    /// A positive company residual books a loss and a negative one a gain.
    /// When the company residual rounds to zero, the side follows the sign
    /// of the currency residual instead: positive is a loss, otherwise a gain.
    pub async fn create_exchange_rate_entry(
        &mut self,
        ctx: &RequestContext,
        company: &Company,
        company_currency: &Currency,
        currency: &Currency,
        to_fix: &[MoveLine],
        max_date: NaiveDate,
    ) -> LedgerResult<ExchangeEntry> {
        let journal_id = company.currency_exchange_journal_id.clone().ok_or_else(|| {
            LedgerError::Configuration("You should configure the 'Exchange Rate Journal' in the accounting settings, to manage automatically the booking of accounting entries related to differences between exchange rates.".to_string())
        })?;
        let gain_account_id = company.income_currency_exchange_account_id.clone().ok_or_else(|| {
            LedgerError::Configuration("You should configure the 'Gain Exchange Rate Account' in the accounting settings, to manage automatically the booking of accounting entries related to differences between exchange rates.".to_string())
        })?;
        let loss_account_id = company.expense_currency_exchange_account_id.clone().ok_or_else(|| {
            LedgerError::Configuration("You should configure the 'Loss Exchange Rate Account' in the accounting settings, to manage automatically the booking of accounting entries related to differences between exchange rates.".to_string())
        })?;
        let first = to_fix.first().ok_or_else(|| {
            LedgerError::InvariantViolation("No journal item to fix".to_string())
        })?;

        let date = match company.fiscalyear_lock_date {
            Some(lock_date) if max_date <= lock_date => ctx.today,
            _ => max_date,
        };
        let zero = BigDecimal::zero();
        let residual: BigDecimal = to_fix.iter().map(|l| &l.amount_residual).sum();
        let residual_currency: BigDecimal = to_fix.iter().map(|l| &l.amount_residual_currency).sum();
        let amount_diff = company_currency.round(&residual);
        let diff_currency = currency.round(&residual_currency);

        let label = self.config().exchange_label.clone();
        let line_to_rec = MoveLine::from_balance(first.account_id.clone(), &-amount_diff.clone(), label.clone())
            .with_partner(first.partner_id.clone())
            .with_currency(currency.id.clone(), -diff_currency.clone());

        let loss = amount_diff > zero || (amount_diff.is_zero() && diff_currency > zero);
        let counterpart_account = if loss { loss_account_id } else { gain_account_id };
        let counterpart = MoveLine::from_balance(counterpart_account, &amount_diff, label)
            .with_partner(first.partner_id.clone())
            .with_currency(currency.id.clone(), diff_currency.clone());

        let move_ = self.moves.create_move(ctx, &journal_id, date, None).await?;
        let saved = self
            .moves
            .add_lines(ctx, &move_.id, vec![line_to_rec, counterpart], ValidityCheck::Deferred)
            .await?;
        let line_to_rec = saved.into_iter().next().ok_or_else(|| {
            LedgerError::InvariantViolation("Exchange entry has no journal item".to_string())
        })?;

        let mut partials = Vec::with_capacity(to_fix.len());
        for line in to_fix {
            let line_is_debit = if !line.amount_residual.is_zero() {
                line.amount_residual > zero
            } else {
                line.amount_residual_currency > zero
            };
            let (debit_move_id, credit_move_id, amount_currency) = if line_is_debit {
                (line.id.clone(), line_to_rec.id.clone(), line.amount_residual_currency.clone())
            } else {
                (line_to_rec.id.clone(), line.id.clone(), -line.amount_residual_currency.clone())
            };
            let partial = PartialReconcile {
                id: new_id(),
                debit_move_id,
                credit_move_id,
                amount: line.amount_residual.abs(),
                amount_currency,
                currency_id: Some(currency.id.clone()),
                company_id: company.id.clone(),
                max_date: line.date.max(date),
                full_reconcile_id: None,
            };
            self.storage_mut().save_partial(&partial).await?;
            refresh_line(self.storage_mut(), &line.id).await?;
            partials.push(partial);
        }
        let line_to_rec = refresh_line(self.storage_mut(), &line_to_rec.id).await?;
        let entry = self.moves.post(ctx, &move_.id).await?;

        info!(
            move_id = %entry.id,
            amount = %amount_diff,
            amount_currency = %diff_currency,
            "exchange difference booked"
        );
        Ok(ExchangeEntry {
            entry,
            line: line_to_rec,
            partials,
        })
    }
}
