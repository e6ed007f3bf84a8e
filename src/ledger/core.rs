//! Main ledger orchestrator that coordinates accounts, moves and reconciliation

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::{EngineConfig, RequestContext};
use crate::currency::{convert_amount, load_currency, Currency, CurrencyRate};
use crate::ledger::account::{utils::create_standard_chart, AccountManager, StandardChart};
use crate::ledger::moves::{MoveDraft, MoveManager, RecordedMove, ValidityCheck};
use crate::reconciliation::{
    compute_residual, ReconcileOptions, ReconciliationEngine, WriteoffParams,
};
use crate::tax::{compute_all, ComputeAllParams, Tax, TaxComputation};
use crate::traits::*;
use crate::types::*;

/// Main ledger system that orchestrates all accounting operations
pub struct Ledger<S: AccountingStorage> {
    account_manager: AccountManager<S>,
    engine: ReconciliationEngine<S>,
}

impl<S: AccountingStorage + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self {
            account_manager: AccountManager::new(storage.clone()),
            engine: ReconciliationEngine::new(MoveManager::new(storage, config)),
        }
    }

    /// Create a new ledger with custom validators
    pub fn with_validators(
        storage: S,
        config: EngineConfig,
        account_validator: Box<dyn AccountValidator>,
        move_validator: Box<dyn MoveValidator>,
    ) -> Self {
        Self {
            account_manager: AccountManager::with_validator(storage.clone(), account_validator),
            engine: ReconciliationEngine::new(MoveManager::with_validator(
                storage,
                config,
                move_validator,
            )),
        }
    }

    pub fn engine(&self) -> &ReconciliationEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ReconciliationEngine<S> {
        &mut self.engine
    }

    fn storage(&self) -> &S {
        self.engine.storage()
    }

    fn storage_mut(&mut self) -> &mut S {
        self.engine.storage_mut()
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(&mut self, operation: &'static str, result: LedgerResult<T>) -> LedgerResult<T> {
        match result {
            Ok(value) => {
                self.storage_mut().commit().await?;
                Ok(value)
            }
            Err(err) => {
                warn!(operation, error = %err, "rolling back");
                self.storage_mut().rollback().await?;
                Err(err)
            }
        }
    }

    // Company and reference data
    /// Register a company and its currency
    pub async fn setup_company(&mut self, company: &Company, currency: &Currency) -> LedgerResult<()> {
        if company.currency_id != currency.id {
            return Err(LedgerError::Validation(format!(
                "Company {} is expressed in {}, not {}",
                company.name, company.currency_id, currency.id
            )));
        }
        self.storage_mut().save_currency(currency).await?;
        self.storage_mut().save_company(company).await?;
        info!(company = %company.id, currency = %currency.id, "company registered");
        Ok(())
    }

    pub async fn get_company(&self, company_id: &str) -> LedgerResult<Company> {
        self.engine.moves().company_required(company_id).await
    }

    /// Save lock dates, rounding policy or exchange settings of a company
    pub async fn update_company(&mut self, company: &Company) -> LedgerResult<()> {
        self.get_company(&company.id).await?;
        self.storage_mut().save_company(company).await
    }

    pub async fn add_currency(&mut self, currency: &Currency) -> LedgerResult<()> {
        self.storage_mut().save_currency(currency).await
    }

    /// Record the rate of a currency from a date on
    pub async fn set_rate(&mut self, currency_id: &str, date: NaiveDate, rate: BigDecimal) -> LedgerResult<()> {
        load_currency(self.storage(), currency_id).await?;
        if rate <= BigDecimal::zero() {
            return Err(LedgerError::Validation(format!(
                "Rate of {} must be positive",
                currency_id
            )));
        }
        self.storage_mut()
            .save_rate(&CurrencyRate {
                currency_id: currency_id.to_string(),
                date,
                rate,
            })
            .await
    }

    /// Convert an amount between currencies at the rates of `date`
    pub async fn convert(
        &self,
        amount: &BigDecimal,
        from_currency_id: &str,
        to_currency_id: &str,
        date: NaiveDate,
    ) -> LedgerResult<BigDecimal> {
        let from = load_currency(self.storage(), from_currency_id).await?;
        let to = load_currency(self.storage(), to_currency_id).await?;
        convert_amount(self.storage(), amount, &from, &to, true, date).await
    }

    pub async fn add_partner(&mut self, partner: &Partner) -> LedgerResult<()> {
        if let Some(parent_id) = &partner.parent_id {
            if self.storage().get_partner(parent_id).await?.is_none() {
                return Err(LedgerError::not_found("Partner", parent_id.clone()));
            }
        }
        self.storage_mut().save_partner(partner).await
    }

    pub async fn add_tax(&mut self, tax: &Tax) -> LedgerResult<()> {
        self.get_company(&tax.company_id).await?;
        self.storage_mut().save_tax(tax).await
    }

    /// Setup a standard chart of accounts and journals for a company
    pub async fn setup_standard_chart(&mut self, company: &mut Company) -> LedgerResult<StandardChart> {
        create_standard_chart(&mut self.account_manager, company).await
    }

    // Account operations
    /// Create a new account
    pub async fn create_account(
        &mut self,
        company_id: &str,
        code: &str,
        name: &str,
        internal_type: InternalType,
    ) -> LedgerResult<Account> {
        self.account_manager
            .create_account(company_id, code, name, internal_type)
            .await
    }

    /// Save a fully configured account
    pub async fn add_account(&mut self, account: Account) -> LedgerResult<Account> {
        self.account_manager.add_account(account).await
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.account_manager.get_account(account_id).await
    }

    /// List the accounts of a company
    pub async fn list_accounts(&self, company_id: &str) -> LedgerResult<Vec<Account>> {
        self.account_manager.list_accounts(company_id).await
    }

    pub async fn create_journal(
        &mut self,
        company_id: &str,
        code: &str,
        name: &str,
        journal_type: JournalType,
    ) -> LedgerResult<Journal> {
        self.account_manager
            .create_journal(company_id, code, name, journal_type)
            .await
    }

    // Move operations
    pub async fn create_move(
        &mut self,
        ctx: &RequestContext,
        journal_id: &str,
        date: NaiveDate,
        reference: Option<String>,
    ) -> LedgerResult<Move> {
        self.engine
            .moves_mut()
            .create_move(ctx, journal_id, date, reference)
            .await
    }

    pub async fn add_lines(
        &mut self,
        ctx: &RequestContext,
        move_id: &str,
        lines: Vec<MoveLine>,
        check: ValidityCheck,
    ) -> LedgerResult<Vec<MoveLine>> {
        self.engine
            .moves_mut()
            .add_lines(ctx, move_id, lines, check)
            .await
    }

    pub async fn assert_balanced(&self, move_id: &str) -> LedgerResult<()> {
        self.engine.moves().assert_balanced(move_id).await
    }

    pub async fn post(&mut self, ctx: &RequestContext, move_id: &str) -> LedgerResult<Move> {
        self.engine.moves_mut().post(ctx, move_id).await
    }

    /// Create, fill and post a move as one unit
    pub async fn record(&mut self, ctx: &RequestContext, draft: MoveDraft) -> LedgerResult<RecordedMove> {
        self.storage_mut().begin().await?;
        let result = self.engine.moves_mut().record(ctx, draft).await;
        self.finish("record", result).await
    }

    pub async fn reverse_move(
        &mut self,
        ctx: &RequestContext,
        move_id: &str,
        date: NaiveDate,
        journal_id: Option<&str>,
    ) -> LedgerResult<RecordedMove> {
        self.storage_mut().begin().await?;
        let result = self
            .engine
            .moves_mut()
            .reverse_move(ctx, move_id, date, journal_id)
            .await;
        self.finish("reverse_move", result).await
    }

    pub async fn button_draft(&mut self, ctx: &RequestContext, move_id: &str) -> LedgerResult<Move> {
        self.engine.moves_mut().button_draft(ctx, move_id).await
    }

    pub async fn delete_move(&mut self, ctx: &RequestContext, move_id: &str) -> LedgerResult<()> {
        self.engine.moves_mut().delete_move(ctx, move_id).await
    }

    pub async fn get_move(&self, move_id: &str) -> LedgerResult<Move> {
        self.engine.moves().get_move_required(move_id).await
    }

    pub async fn get_lines(&self, move_id: &str) -> LedgerResult<Vec<MoveLine>> {
        self.engine.moves().get_lines(move_id).await
    }

    pub async fn get_line(&self, line_id: &str) -> LedgerResult<MoveLine> {
        self.engine.moves().get_line_required(line_id).await
    }

    /// Compute taxes with the rounding policy of the requesting company
    pub async fn compute_taxes(
        &self,
        ctx: &RequestContext,
        tax_ids: &[String],
        price_unit: BigDecimal,
        quantity: BigDecimal,
        currency_id: &str,
    ) -> LedgerResult<TaxComputation> {
        let company = self.get_company(&ctx.company_id).await?;
        let currency = load_currency(self.storage(), currency_id).await?;

        let mut taxes = Vec::with_capacity(tax_ids.len());
        for tax_id in tax_ids {
            let tax = self
                .storage()
                .get_tax(tax_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("Tax", tax_id.clone()))?;
            taxes.push(tax);
        }

        let params = ComputeAllParams::new(price_unit, quantity, &currency)
            .rounding(ctx.tax_rounding.unwrap_or(company.tax_rounding_method));
        Ok(compute_all(&taxes, &params)?)
    }

    // Reconciliation operations, each one storage transaction
    /// Reconcile journal items, rolling back everything on failure
    #[instrument(skip(self, ctx, line_ids, writeoff, options), fields(company = %ctx.company_id))]
    pub async fn reconcile(
        &mut self,
        ctx: &RequestContext,
        line_ids: &[String],
        writeoff: Option<&WriteoffParams>,
        options: &ReconcileOptions,
    ) -> LedgerResult<Option<MoveLine>> {
        self.storage_mut().begin().await?;
        let result = self.engine.reconcile(ctx, line_ids, writeoff, options).await;
        self.finish("reconcile", result).await
    }

    /// Undo the reconciliations of journal items
    pub async fn remove_move_reconcile(&mut self, ctx: &RequestContext, line_ids: &[String]) -> LedgerResult<()> {
        self.storage_mut().begin().await?;
        let result = self.engine.remove_move_reconcile(ctx, line_ids).await;
        self.finish("remove_move_reconcile", result).await
    }

    /// Reconcile the open items of an account partner by partner
    pub async fn reconcile_open_items(
        &mut self,
        ctx: &RequestContext,
        account_id: &str,
    ) -> LedgerResult<Vec<MoveLine>> {
        self.storage_mut().begin().await?;
        let result = self.engine.reconcile_open_items(ctx, account_id).await;
        self.finish("reconcile_open_items", result).await
    }

    /// Check that posted moves balance and stored residuals match the partials
    pub async fn validate_integrity(&self, company_id: &str) -> LedgerResult<LedgerIntegrityReport> {
        let company = self.get_company(company_id).await?;
        let company_currency = load_currency(self.storage(), &company.currency_id).await?;
        let digits = self.engine.config().balance_digits();

        let mut issues = Vec::new();
        let mut moves_checked = 0;
        let mut total_debit = BigDecimal::zero();
        let mut total_credit = BigDecimal::zero();

        for move_ in self.storage().list_moves(company_id).await? {
            if !move_.is_posted() {
                continue;
            }
            moves_checked += 1;
            let lines = self.storage().get_move_lines(&move_.id).await?;
            if let Err(err) = check_balanced(&move_.id, &lines, digits) {
                issues.push(format!("{}: {}", move_.display_name(), err));
            }

            for line in &lines {
                total_debit += &line.debit;
                total_credit += &line.credit;

                let account = self.account_manager.get_account_required(&line.account_id).await?;
                let partials = self.storage().get_line_partials(&line.id).await?;
                let expected =
                    compute_residual(self.storage(), line, &account, &company_currency, &partials).await?;
                if expected.amount_residual != line.amount_residual
                    || expected.amount_residual_currency != line.amount_residual_currency
                {
                    issues.push(format!(
                        "{}: residual of '{}' is {} but the partials give {}",
                        move_.display_name(),
                        line.name,
                        line.amount_residual,
                        expected.amount_residual
                    ));
                }
            }
        }

        Ok(LedgerIntegrityReport {
            company_id: company_id.to_string(),
            is_valid: issues.is_empty(),
            issues,
            moves_checked,
            total_debit,
            total_credit,
        })
    }
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub company_id: String,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub moves_checked: usize,
    pub total_debit: BigDecimal,
    pub total_credit: BigDecimal,
}
