//! Reconciliation entry points: matching, write-off and unreconcile

use bigdecimal::{BigDecimal, Zero};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

use crate::config::{EngineConfig, RequestContext};
use crate::currency::{load_currency, Currency};
use crate::ledger::moves::MoveManager;
use crate::reconciliation::matcher::{get_pair_to_reconcile, reconcile_field};
use crate::reconciliation::residual::refresh_line;
use crate::reconciliation::writeoff::{WriteoffCurrency, WriteoffParams};
use crate::reconciliation::{commercial_partner_id, MatchingField, ReconcileOptions};
use crate::traits::AccountingStorage;
use crate::types::*;

/// Reconciliation engine working on top of a move manager
pub struct ReconciliationEngine<S: AccountingStorage> {
    pub(crate) moves: MoveManager<S>,
}

impl<S: AccountingStorage> ReconciliationEngine<S> {
    /// Create a new engine
    pub fn new(moves: MoveManager<S>) -> Self {
        Self { moves }
    }

    pub fn moves(&self) -> &MoveManager<S> {
        &self.moves
    }

    pub fn moves_mut(&mut self) -> &mut MoveManager<S> {
        &mut self.moves
    }

    pub fn config(&self) -> &EngineConfig {
        &self.moves.config
    }

    pub(crate) fn storage(&self) -> &S {
        &self.moves.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut S {
        &mut self.moves.storage
    }

    pub(crate) async fn load_lines(&self, line_ids: &[String]) -> LedgerResult<Vec<MoveLine>> {
        let mut lines = Vec::with_capacity(line_ids.len());
        for line_id in line_ids {
            lines.push(self.moves.get_line_required(line_id).await?);
        }
        Ok(lines)
    }

    pub(crate) async fn account_required(&self, account_id: &str) -> LedgerResult<Account> {
        self.storage()
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Account", account_id))
    }

    pub(crate) async fn company_and_currency(
        &self,
        company_id: &str,
    ) -> LedgerResult<(Company, Currency)> {
        let company = self.moves.company_required(company_id).await?;
        let currency = load_currency(self.storage(), &company.currency_id).await?;
        Ok((company, currency))
    }

    async fn currencies_for(
        &self,
        lines: &[MoveLine],
        account: &Account,
    ) -> LedgerResult<HashMap<String, Currency>> {
        let mut currencies = HashMap::new();
        let ids = lines
            .iter()
            .filter_map(|line| line.currency_id.as_ref())
            .chain(account.currency_id.as_ref());
        for currency_id in ids {
            if !currencies.contains_key(currency_id) {
                let currency = load_currency(self.storage(), currency_id).await?;
                currencies.insert(currency_id.clone(), currency);
            }
        }
        Ok(currencies)
    }

    /// Reconcile journal items together, optionally writing off what remains
    ///
    /// Returns the write-off item on the reconciled account when one was
    /// created.
    #[instrument(
        skip(self, ctx, line_ids, writeoff, options),
        fields(company = %ctx.company_id, lines = line_ids.len())
    )]
    pub async fn reconcile(
        &mut self,
        ctx: &RequestContext,
        line_ids: &[String],
        writeoff: Option<&WriteoffParams>,
        options: &ReconcileOptions,
    ) -> LedgerResult<Option<MoveLine>> {
        if line_ids.is_empty() {
            return Ok(None);
        }

        let lines = self.load_lines(line_ids).await?;
        if lines.iter().any(|line| line.reconciled) {
            return Err(LedgerError::AlreadyReconciled(
                "You are trying to reconcile some entries that are already reconciled!".to_string(),
            ));
        }

        let companies: HashSet<&str> = lines.iter().map(|l| l.company_id.as_str()).collect();
        if companies.len() > 1 {
            return Err(LedgerError::InvariantViolation(
                "To reconcile the entries company should be the same for all entries!".to_string(),
            ));
        }

        let accounts: HashSet<&str> = lines.iter().map(|l| l.account_id.as_str()).collect();
        if accounts.len() > 1 {
            return Err(LedgerError::InvariantViolation(
                "Entries are not of the same account!".to_string(),
            ));
        }

        let account = self.account_required(&lines[0].account_id).await?;
        if !(account.reconcile || account.internal_type == InternalType::Liquidity) {
            return Err(LedgerError::InvariantViolation(format!(
                "The account {} ({}) is not marked as reconciliable !",
                account.name, account.code
            )));
        }

        let remaining = self.auto_reconcile_lines(lines.clone(), options).await?;

        let mut involved = line_ids.to_vec();
        let mut writeoff_line = None;
        if let Some(params) = writeoff {
            if !remaining.is_empty() {
                let mut params = params.clone();
                let first_currency = &lines[0].currency_id;
                if !lines.iter().all(|l| &l.currency_id == first_currency) {
                    params.currency = WriteoffCurrency::Excluded;
                }

                let line = self.create_writeoff(ctx, &remaining, &params).await?;
                involved.push(line.id.clone());

                let mut to_match = remaining;
                to_match.push(line.clone());
                self.auto_reconcile_lines(to_match, options).await?;
                writeoff_line = Some(line.id);
            }
        }

        self.compute_full_after_batch_reconcile(ctx, &involved).await?;

        match writeoff_line {
            Some(line_id) => Ok(Some(self.moves.get_line_required(&line_id).await?)),
            None => Ok(None),
        }
    }

    /// Match pairs of debit and credit items until no pair is left
    ///
    /// Every iteration persists one partial reconciliation and drops at least
    /// one fully matched item from the working set. Returns the items left
    /// open, with refreshed residuals.
    pub async fn auto_reconcile_lines(
        &mut self,
        mut lines: Vec<MoveLine>,
        options: &ReconcileOptions,
    ) -> LedgerResult<Vec<MoveLine>> {
        let Some(first) = lines.first() else {
            return Ok(lines);
        };
        let account = self.account_required(&first.account_id).await?;
        let (_, company_currency) = self.company_and_currency(&first.company_id).await?;
        let currencies = self.currencies_for(&lines, &account).await?;
        let order = self.config().match_order;
        let zero = BigDecimal::zero();

        while let Some(pair) = get_pair_to_reconcile(
            &lines,
            &account,
            &company_currency,
            &currencies,
            options,
            order,
        ) {
            let debit = lines[pair.debit].clone();
            let credit = lines[pair.credit].clone();

            let field = reconcile_field(&lines, &debit, &account, &company_currency, options);
            let debit_value = field.value(&debit).clone();
            let credit_value = -field.value(&credit).clone();
            let amount_reconcile = debit_value.clone().min(credit_value.clone());
            let drop_debit = amount_reconcile == debit_value;
            let drop_credit = amount_reconcile == credit_value;

            let (currency_id, amount_currency) = match (&debit.currency_id, &credit.currency_id) {
                (Some(d), Some(c)) if d == c => {
                    let amount_currency = if options.matching == MatchingField::CompanyCurrencyOnly {
                        BigDecimal::zero()
                    } else {
                        debit
                            .amount_residual_currency
                            .clone()
                            .min(-credit.amount_residual_currency.clone())
                            .max(zero.clone())
                    };
                    (Some(d.clone()), amount_currency)
                }
                _ => (None, BigDecimal::zero()),
            };
            let amount = debit
                .amount_residual
                .clone()
                .min(-credit.amount_residual.clone())
                .max(zero.clone());

            let partial = PartialReconcile {
                id: new_id(),
                debit_move_id: debit.id.clone(),
                credit_move_id: credit.id.clone(),
                amount,
                amount_currency,
                currency_id,
                company_id: debit.company_id.clone(),
                max_date: debit.date.max(credit.date),
                full_reconcile_id: None,
            };
            self.storage_mut().save_partial(&partial).await?;
            info!(
                partial = %partial.id,
                amount = %partial.amount,
                amount_currency = %partial.amount_currency,
                "partial reconcile created"
            );

            let debit_line = refresh_line(self.storage_mut(), &debit.id).await?;
            let credit_line = refresh_line(self.storage_mut(), &credit.id).await?;

            lines = lines
                .into_iter()
                .filter_map(|line| {
                    if line.id == debit.id {
                        (!drop_debit).then(|| debit_line.clone())
                    } else if line.id == credit.id {
                        (!drop_credit).then(|| credit_line.clone())
                    } else {
                        Some(line)
                    }
                })
                .collect();
        }

        debug!(remaining = lines.len(), "auto reconcile finished");
        Ok(lines)
    }

    /// Undo the reconciliations of journal items
    ///
    /// Partials touching the items are deleted and their full reconciliations
    /// dissolved. The exchange difference entry of a dissolved full
    /// reconciliation is reversed, and each of its items is matched with its
    /// reversal.
    #[instrument(skip(self, ctx, line_ids), fields(company = %ctx.company_id, lines = line_ids.len()))]
    pub async fn remove_move_reconcile(
        &mut self,
        ctx: &RequestContext,
        line_ids: &[String],
    ) -> LedgerResult<()> {
        let mut pending: Vec<String> = line_ids.to_vec();
        let mut touched: Vec<String> = Vec::new();
        let mut exchange_moves: Vec<String> = Vec::new();

        while let Some(line_id) = pending.pop() {
            for partial in self.storage().get_line_partials(&line_id).await? {
                touched.push(partial.debit_move_id.clone());
                touched.push(partial.credit_move_id.clone());

                if let Some(full_id) = &partial.full_reconcile_id {
                    if let Some(full) = self.storage().get_full_reconcile(full_id).await? {
                        let exchange_lines = self.dissolve_full_reconcile(&full).await?;
                        touched.extend(full.reconciled_line_ids.iter().cloned());
                        pending.extend(exchange_lines);
                        if let Some(move_id) = full.exchange_move_id {
                            exchange_moves.push(move_id);
                        }
                    }
                }

                if self.storage().get_partial(&partial.id).await?.is_some() {
                    self.storage_mut().delete_partial(&partial.id).await?;
                }
            }
        }

        let mut seen = HashSet::new();
        for line_id in touched {
            if seen.insert(line_id.clone()) {
                refresh_line(self.storage_mut(), &line_id).await?;
            }
        }

        for move_id in exchange_moves {
            self.reverse_exchange_move(ctx, &move_id).await?;
        }

        info!("reconciliation removed");
        Ok(())
    }

    /// Delete a full reconciliation, returning the matchable items of its exchange entry
    async fn dissolve_full_reconcile(&mut self, full: &FullReconcile) -> LedgerResult<Vec<String>> {
        for partial_id in &full.partial_reconcile_ids {
            if let Some(mut partial) = self.storage().get_partial(partial_id).await? {
                partial.full_reconcile_id = None;
                self.storage_mut().save_partial(&partial).await?;
            }
        }
        for line_id in &full.reconciled_line_ids {
            if let Some(mut line) = self.storage().get_line(line_id).await? {
                line.full_reconcile_id = None;
                self.storage_mut().save_line(&line).await?;
            }
        }
        self.storage_mut().delete_full_reconcile(&full.id).await?;
        debug!(full = %full.name, "full reconcile dissolved");

        let mut exchange_lines = Vec::new();
        if let Some(move_id) = &full.exchange_move_id {
            for line in self.storage().get_move_lines(move_id).await? {
                if self.account_required(&line.account_id).await?.tracks_residual() {
                    exchange_lines.push(line.id);
                }
            }
        }
        Ok(exchange_lines)
    }

    async fn reverse_exchange_move(&mut self, ctx: &RequestContext, move_id: &str) -> LedgerResult<()> {
        let original = self.moves.get_lines(move_id).await?;
        let reversal = self.moves.reverse_move(ctx, move_id, ctx.today, None).await?;
        info!(move_id, reversal = %reversal.entry.id, "exchange difference reversed");

        let mut accounts: Vec<String> = Vec::new();
        for line in &original {
            if !accounts.contains(&line.account_id)
                && self.account_required(&line.account_id).await?.tracks_residual()
            {
                accounts.push(line.account_id.clone());
            }
        }

        for account_id in accounts {
            let to_match: Vec<String> = original
                .iter()
                .chain(reversal.lines.iter())
                .filter(|line| line.account_id == account_id)
                .map(|line| line.id.clone())
                .collect();
            self.reconcile(ctx, &to_match, None, &ReconcileOptions::default())
                .await?;
        }
        Ok(())
    }

    /// Reconcile the open items of an account, partner by partner
    ///
    /// Returns the items still open afterwards.
    #[instrument(skip(self, ctx), fields(company = %ctx.company_id))]
    pub async fn reconcile_open_items(
        &mut self,
        ctx: &RequestContext,
        account_id: &str,
    ) -> LedgerResult<Vec<MoveLine>> {
        let open = self.storage().find_unreconciled_by_account(account_id).await?;

        let mut groups: Vec<(Option<String>, Vec<String>)> = Vec::new();
        for line in open {
            let partner = commercial_partner_id(self.storage(), line.partner_id.as_deref()).await?;
            match groups.iter_mut().find(|(key, _)| *key == partner) {
                Some((_, ids)) => ids.push(line.id),
                None => groups.push((partner, vec![line.id])),
            }
        }

        for (partner, ids) in groups {
            if ids.len() < 2 {
                continue;
            }
            debug!(partner = ?partner, lines = ids.len(), "reconciling partner items");
            self.reconcile(ctx, &ids, None, &ReconcileOptions::default())
                .await?;
        }

        self.storage().find_unreconciled_by_account(account_id).await
    }
}
