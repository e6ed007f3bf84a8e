//! Journal entry processing: line insertion, balance checks, posting

use bigdecimal::{BigDecimal, Zero};
use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, instrument};

use crate::config::{ActorRole, EngineConfig, RequestContext};
use crate::reconciliation::residual::LineResidual;
use crate::traits::*;
use crate::types::*;

/// When the balance of a move is checked after inserting lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityCheck {
    /// Right after the insert
    Immediate,
    /// Later, by [`MoveManager::assert_balanced`] or [`MoveManager::post`]
    Deferred,
}

/// Unsaved journal entry produced by [`MoveBuilder`] and the patterns
#[derive(Debug, Clone)]
pub struct MoveDraft {
    pub journal_id: String,
    pub date: NaiveDate,
    pub reference: Option<String>,
    pub lines: Vec<MoveLine>,
}

/// A saved journal entry with its items
#[derive(Debug, Clone)]
pub struct RecordedMove {
    pub entry: Move,
    pub lines: Vec<MoveLine>,
}

/// Fail with [`LedgerError::LockDate`] if `date` falls in a locked period for the role
pub fn check_lock_date(company: &Company, role: ActorRole, date: NaiveDate) -> LedgerResult<()> {
    let lock_date = match role {
        ActorRole::Adviser => company.fiscalyear_lock_date,
        ActorRole::Accountant => company.period_lock_date.max(company.fiscalyear_lock_date),
    };

    match lock_date {
        Some(lock_date) if date <= lock_date => {
            let message = match role {
                ActorRole::Adviser => format!(
                    "You cannot add/modify entries prior to and inclusive of the lock date {}",
                    lock_date
                ),
                ActorRole::Accountant => format!(
                    "You cannot add/modify entries prior to and inclusive of the lock date {}. Check the company settings or ask someone with the 'Adviser' role",
                    lock_date
                ),
            };
            Err(LedgerError::LockDate(message))
        }
        _ => Ok(()),
    }
}

/// Move manager for handling journal entry operations
pub struct MoveManager<S: AccountingStorage> {
    pub(crate) storage: S,
    validator: Box<dyn MoveValidator>,
    pub(crate) config: EngineConfig,
}

impl<S: AccountingStorage> MoveManager<S> {
    /// Create a new move manager
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultMoveValidator),
            config,
        }
    }

    /// Create a new move manager with custom validator
    pub fn with_validator(
        storage: S,
        config: EngineConfig,
        validator: Box<dyn MoveValidator>,
    ) -> Self {
        Self {
            storage,
            validator,
            config,
        }
    }

    pub async fn get_move_required(&self, move_id: &str) -> LedgerResult<Move> {
        self.storage
            .get_move(move_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Move", move_id))
    }

    pub async fn get_lines(&self, move_id: &str) -> LedgerResult<Vec<MoveLine>> {
        self.storage.get_move_lines(move_id).await
    }

    pub async fn get_line_required(&self, line_id: &str) -> LedgerResult<MoveLine> {
        self.storage
            .get_line(line_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Journal item", line_id))
    }

    pub(crate) async fn company_required(&self, company_id: &str) -> LedgerResult<Company> {
        self.storage
            .get_company(company_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Company", company_id))
    }

    pub(crate) async fn journal_required(&self, journal_id: &str) -> LedgerResult<Journal> {
        self.storage
            .get_journal(journal_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Journal", journal_id))
    }

    /// Create an empty draft move in a journal
    pub async fn create_move(
        &mut self,
        ctx: &RequestContext,
        journal_id: &str,
        date: NaiveDate,
        reference: Option<String>,
    ) -> LedgerResult<Move> {
        let journal = self.journal_required(journal_id).await?;
        let company = self.company_required(&journal.company_id).await?;
        check_lock_date(&company, ctx.role, date)?;

        let mut move_ = Move::new(journal.id, company.id, date);
        move_.reference = reference;
        self.storage.save_move(&move_).await?;
        debug!(move_id = %move_.id, "draft move created");
        Ok(move_)
    }

    /// Insert lines into a draft move
    ///
    /// Lines inherit the move, company and date of the entry. With
    /// [`ValidityCheck::Deferred`] the entry may stay unbalanced until posted.
    #[instrument(skip(self, ctx, lines), fields(lines = lines.len()))]
    pub async fn add_lines(
        &mut self,
        ctx: &RequestContext,
        move_id: &str,
        lines: Vec<MoveLine>,
        check: ValidityCheck,
    ) -> LedgerResult<Vec<MoveLine>> {
        let move_ = self.get_move_required(move_id).await?;
        if move_.is_posted() {
            return Err(LedgerError::Validation(format!(
                "Cannot add journal items to the posted entry {}",
                move_.display_name()
            )));
        }
        let company = self.company_required(&move_.company_id).await?;
        check_lock_date(&company, ctx.role, move_.date)?;

        let mut saved = Vec::with_capacity(lines.len());
        for mut line in lines {
            line.move_id = move_.id.clone();
            line.company_id = move_.company_id.clone();
            line.date = move_.date;

            let account = self
                .storage
                .get_account(&line.account_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("Account", line.account_id.clone()))?;
            if line.currency_id.is_none() {
                if let Some(currency_id) = &account.currency_id {
                    if *currency_id != company.currency_id && !line.balance().is_zero() {
                        return Err(LedgerError::Validation(format!(
                            "Journal item '{}' on account {} must be expressed in {}",
                            line.name, account.code, currency_id
                        )));
                    }
                }
            }
            self.validator.validate_line(&line, &account, &move_)?;

            LineResidual::opening(&line, &account).apply(&mut line);
            self.storage.save_line(&line).await?;
            saved.push(line);
        }

        if check == ValidityCheck::Immediate {
            self.assert_balanced(move_id).await?;
        }

        Ok(saved)
    }

    /// Fail with [`LedgerError::Unbalanced`] if the move does not balance
    pub async fn assert_balanced(&self, move_id: &str) -> LedgerResult<()> {
        let move_ = self.get_move_required(move_id).await?;
        let lines = self.storage.get_move_lines(move_id).await?;
        self.validator
            .validate_balance(&move_, &lines, self.config.balance_digits())
    }

    /// Validate and post a draft move, numbering it from its journal sequence
    #[instrument(skip(self, ctx))]
    pub async fn post(&mut self, ctx: &RequestContext, move_id: &str) -> LedgerResult<Move> {
        let mut move_ = self.get_move_required(move_id).await?;
        if move_.is_posted() {
            return Err(LedgerError::Validation(format!(
                "Entry {} is already posted",
                move_.display_name()
            )));
        }

        let lines = self.storage.get_move_lines(move_id).await?;
        if lines.is_empty() {
            return Err(LedgerError::Validation(
                "Cannot post an entry without journal items".to_string(),
            ));
        }

        let company = self.company_required(&move_.company_id).await?;
        check_lock_date(&company, ctx.role, move_.date)?;
        self.validator
            .validate_balance(&move_, &lines, self.config.balance_digits())?;

        if move_.name.is_none() {
            let journal = self.journal_required(&move_.journal_id).await?;
            let year = move_.date.year();
            let number = self.storage.next_sequence_number(&journal.id, year).await?;
            move_.name = Some(format!("{}/{}/{:04}", journal.code, year, number));
        }
        move_.state = MoveState::Posted;
        move_.updated_at = chrono::Utc::now().naive_utc();
        self.storage.save_move(&move_).await?;

        info!(move_id = %move_.id, name = move_.display_name(), "move posted");
        Ok(move_)
    }

    /// Create, fill and post a move in one step
    pub async fn record(&mut self, ctx: &RequestContext, draft: MoveDraft) -> LedgerResult<RecordedMove> {
        let move_ = self
            .create_move(ctx, &draft.journal_id, draft.date, draft.reference)
            .await?;
        let lines = self
            .add_lines(ctx, &move_.id, draft.lines, ValidityCheck::Deferred)
            .await?;
        let entry = self.post(ctx, &move_.id).await?;
        Ok(RecordedMove { entry, lines })
    }

    /// Reset a posted move to draft
    pub async fn button_draft(&mut self, ctx: &RequestContext, move_id: &str) -> LedgerResult<Move> {
        let mut move_ = self.get_move_required(move_id).await?;
        let journal = self.journal_required(&move_.journal_id).await?;
        if !journal.update_posted {
            return Err(LedgerError::Validation(
                "You cannot modify a posted entry of this journal. First you should set the journal to allow cancelling entries.".to_string(),
            ));
        }

        let company = self.company_required(&move_.company_id).await?;
        check_lock_date(&company, ctx.role, move_.date)?;

        let lines = self.storage.get_move_lines(move_id).await?;
        if lines.iter().any(|line| line.reconciled) {
            return Err(LedgerError::Validation(format!(
                "Entry {} has reconciled items, unreconcile them first",
                move_.display_name()
            )));
        }

        move_.state = MoveState::Draft;
        move_.updated_at = chrono::Utc::now().naive_utc();
        self.storage.save_move(&move_).await?;
        Ok(move_)
    }

    /// Delete a draft move whose items are not matched
    pub async fn delete_move(&mut self, ctx: &RequestContext, move_id: &str) -> LedgerResult<()> {
        let move_ = self.get_move_required(move_id).await?;
        if move_.is_posted() {
            return Err(LedgerError::Validation(format!(
                "You cannot delete the posted entry {}",
                move_.display_name()
            )));
        }

        let company = self.company_required(&move_.company_id).await?;
        check_lock_date(&company, ctx.role, move_.date)?;

        for line in self.storage.get_move_lines(move_id).await? {
            if !self.storage.get_line_partials(&line.id).await?.is_empty() {
                return Err(LedgerError::Validation(format!(
                    "Journal item '{}' is matched, unreconcile it before deleting the entry",
                    line.name
                )));
            }
        }

        self.storage.delete_move(move_id).await
    }

    /// Post a mirror of a move, debit and credit swapped
    #[instrument(skip(self, ctx))]
    pub async fn reverse_move(
        &mut self,
        ctx: &RequestContext,
        move_id: &str,
        date: NaiveDate,
        journal_id: Option<&str>,
    ) -> LedgerResult<RecordedMove> {
        let original = self.get_move_required(move_id).await?;
        let lines = self.storage.get_move_lines(move_id).await?;

        let reversed_lines = lines
            .iter()
            .map(|line| {
                let mut mirror = MoveLine::new(
                    line.account_id.clone(),
                    line.credit.clone(),
                    line.debit.clone(),
                    line.name.clone(),
                )
                .with_partner(line.partner_id.clone())
                .with_taxes(line.tax_ids.clone());
                if let Some(currency_id) = &line.currency_id {
                    mirror = mirror.with_currency(currency_id.clone(), -line.amount_currency.clone());
                }
                mirror.date_maturity = line.date_maturity;
                mirror.tax_line_id = line.tax_line_id.clone();
                mirror
            })
            .collect();

        let draft = MoveDraft {
            journal_id: journal_id.unwrap_or(&original.journal_id).to_string(),
            date,
            reference: Some(format!("reversal of: {}", original.display_name())),
            lines: reversed_lines,
        };

        let mut move_ = self
            .create_move(ctx, &draft.journal_id, draft.date, draft.reference)
            .await?;
        move_.reversed_move_id = Some(original.id.clone());
        self.storage.save_move(&move_).await?;

        let lines = self
            .add_lines(ctx, &move_.id, draft.lines, ValidityCheck::Deferred)
            .await?;
        let entry = self.post(ctx, &move_.id).await?;
        Ok(RecordedMove { entry, lines })
    }
}

/// Move builder for creating journal entries
#[derive(Debug)]
pub struct MoveBuilder {
    draft: MoveDraft,
    partner_id: Option<String>,
}

impl MoveBuilder {
    /// Create a new move builder
    pub fn new(journal_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            draft: MoveDraft {
                journal_id: journal_id.into(),
                date,
                reference: None,
                lines: Vec::new(),
            },
            partner_id: None,
        }
    }

    /// Set the reference for the move
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.draft.reference = Some(reference.into());
        self
    }

    /// Partner applied to lines added afterwards
    pub fn partner(mut self, partner_id: impl Into<String>) -> Self {
        self.partner_id = Some(partner_id.into());
        self
    }

    /// Add a debit line
    pub fn debit(self, account_id: &str, amount: BigDecimal, label: &str) -> Self {
        self.line(MoveLine::debit(account_id.to_string(), amount, label.to_string()))
    }

    /// Add a credit line
    pub fn credit(self, account_id: &str, amount: BigDecimal, label: &str) -> Self {
        self.line(MoveLine::credit(account_id.to_string(), amount, label.to_string()))
    }

    /// Add a custom line
    pub fn line(mut self, mut line: MoveLine) -> Self {
        if line.partner_id.is_none() {
            line.partner_id = self.partner_id.clone();
        }
        self.draft.lines.push(line);
        self
    }

    /// Build the draft, checking the amounts of every line
    pub fn build(self) -> LedgerResult<MoveDraft> {
        for line in &self.draft.lines {
            check_line_amounts(line)?;
        }
        Ok(self.draft)
    }
}

/// Common journal entry patterns
pub mod patterns {
    use super::*;
    use crate::currency::Currency;
    use crate::tax::{compute_all, ComputeAllParams, Tax};
    use crate::types::TaxRoundingMethod;

    /// Kind of invoicing document
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum InvoiceKind {
        CustomerInvoice,
        CustomerRefund,
        VendorBill,
        VendorRefund,
    }

    impl InvoiceKind {
        /// Sign of the balance of income/expense lines
        fn base_sign(self) -> i32 {
            match self {
                InvoiceKind::CustomerInvoice | InvoiceKind::VendorRefund => -1,
                InvoiceKind::VendorBill | InvoiceKind::CustomerRefund => 1,
            }
        }

        fn is_refund(self) -> bool {
            matches!(self, InvoiceKind::CustomerRefund | InvoiceKind::VendorRefund)
        }
    }

    /// Priced line of an invoice
    #[derive(Debug, Clone)]
    pub struct InvoiceLine {
        pub product_id: Option<String>,
        pub account_id: String,
        pub label: String,
        pub price_unit: BigDecimal,
        pub quantity: BigDecimal,
        pub taxes: Vec<Tax>,
    }

    /// Parameters for building an invoice move
    #[derive(Debug, Clone)]
    pub struct InvoiceParams<'a> {
        pub kind: InvoiceKind,
        pub journal_id: String,
        pub date: NaiveDate,
        pub date_maturity: Option<NaiveDate>,
        pub reference: Option<String>,
        pub partner_id: Option<String>,
        /// Receivable or payable account
        pub counterpart_account_id: String,
        pub lines: Vec<InvoiceLine>,
        /// Document currency
        pub currency: &'a Currency,
        pub company_currency: &'a Currency,
        /// Units of the document currency for one unit of company currency
        pub rate: BigDecimal,
        pub rounding_method: TaxRoundingMethod,
    }

    /// Direction of a payment
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PaymentDirection {
        /// Money received from a customer
        Inbound,
        /// Money sent to a supplier
        Outbound,
    }

    /// Parameters for building a payment move
    #[derive(Debug, Clone)]
    pub struct PaymentParams<'a> {
        pub direction: PaymentDirection,
        pub journal_id: String,
        pub date: NaiveDate,
        pub reference: Option<String>,
        pub partner_id: Option<String>,
        /// Bank or cash account
        pub liquidity_account_id: String,
        /// Receivable or payable account
        pub counterpart_account_id: String,
        /// Amount in the payment currency
        pub amount: BigDecimal,
        pub currency: &'a Currency,
        pub company_currency: &'a Currency,
        /// Units of the payment currency for one unit of company currency
        pub rate: BigDecimal,
    }

    /// Company-currency balance and secondary amount for a signed document amount
    fn convert_line(
        amount: &BigDecimal,
        currency: &Currency,
        company_currency: &Currency,
        rate: &BigDecimal,
    ) -> LedgerResult<(BigDecimal, Option<BigDecimal>)> {
        if currency.id == company_currency.id {
            return Ok((company_currency.round(amount), None));
        }
        if rate.is_zero() {
            return Err(LedgerError::Configuration(format!(
                "No usable rate for currency {}",
                currency.id
            )));
        }
        Ok((
            company_currency.round(&(amount / rate)),
            Some(currency.round(amount)),
        ))
    }

    fn priced_line(
        account_id: &str,
        label: &str,
        amount: &BigDecimal,
        params_currency: (&Currency, &Currency, &BigDecimal),
    ) -> LedgerResult<MoveLine> {
        let (currency, company_currency, rate) = params_currency;
        let (balance, amount_currency) = convert_line(amount, currency, company_currency, rate)?;
        let mut line = MoveLine::from_balance(account_id.to_string(), &balance, label.to_string());
        if let Some(amount_currency) = amount_currency {
            line = line.with_currency(currency.id.clone(), amount_currency);
        }
        Ok(line)
    }

    /// Build an invoice, refund or vendor bill from priced lines and their taxes
    ///
    /// One base line per priced line, one tax line per applied tax and
    /// account, and a receivable/payable counterpart absorbing the
    /// conversion rounding.
    pub fn invoice_move(params: InvoiceParams<'_>) -> LedgerResult<MoveDraft> {
        let sign = BigDecimal::from(params.kind.base_sign());
        let conversion = (params.currency, params.company_currency, &params.rate);
        let mut builder = MoveBuilder::new(params.journal_id.clone(), params.date);
        if let Some(reference) = &params.reference {
            builder = builder.reference(reference.clone());
        }
        if let Some(partner_id) = &params.partner_id {
            builder = builder.partner(partner_id.clone());
        }

        // (tax id, account, label, amount)
        let mut tax_totals: Vec<(String, String, String, BigDecimal)> = Vec::new();

        for invoice_line in &params.lines {
            let mut compute = ComputeAllParams::new(
                invoice_line.price_unit.clone(),
                invoice_line.quantity.clone(),
                params.currency,
            )
            .rounding(params.rounding_method);
            if let Some(product_id) = &invoice_line.product_id {
                compute = compute.for_product(product_id);
            }
            if let Some(partner_id) = &params.partner_id {
                compute = compute.for_partner(partner_id);
            }
            let result = compute_all(&invoice_line.taxes, &compute)?;

            let base = priced_line(
                &invoice_line.account_id,
                &invoice_line.label,
                &(&sign * &result.total_excluded),
                conversion,
            )?
            .with_taxes(invoice_line.taxes.iter().map(|t| t.id.clone()).collect());
            builder = builder.line(base);

            for applied in result.taxes {
                let account_id = if params.kind.is_refund() {
                    applied.refund_account_id.or(applied.account_id)
                } else {
                    applied.account_id
                }
                .unwrap_or_else(|| invoice_line.account_id.clone());

                match tax_totals
                    .iter_mut()
                    .find(|(tax_id, account, _, _)| *tax_id == applied.tax_id && *account == account_id)
                {
                    Some(total) => total.3 += &applied.amount,
                    None => tax_totals.push((applied.tax_id, account_id, applied.name, applied.amount)),
                }
            }
        }

        for (tax_id, account_id, label, amount) in tax_totals {
            let amount = params.currency.round(&amount);
            if amount.is_zero() {
                continue;
            }
            let mut line = priced_line(&account_id, &label, &(&sign * &amount), conversion)?;
            line.tax_line_id = Some(tax_id);
            builder = builder.line(line);
        }

        let balance: BigDecimal = builder.draft.lines.iter().map(|l| l.balance()).sum();
        let amount_currency: BigDecimal =
            builder.draft.lines.iter().map(|l| &l.amount_currency).sum();
        let mut counterpart = MoveLine::from_balance(
            params.counterpart_account_id.clone(),
            &(-balance),
            params.reference.clone().unwrap_or_else(|| "/".to_string()),
        );
        if params.currency.id != params.company_currency.id {
            counterpart = counterpart.with_currency(params.currency.id.clone(), -amount_currency);
        }
        if let Some(date_maturity) = params.date_maturity {
            counterpart = counterpart.with_maturity(date_maturity);
        }

        builder.line(counterpart).build()
    }

    /// Build an inbound or outbound payment
    pub fn payment_move(params: PaymentParams<'_>) -> LedgerResult<MoveDraft> {
        let sign = match params.direction {
            PaymentDirection::Inbound => BigDecimal::from(1),
            PaymentDirection::Outbound => BigDecimal::from(-1),
        };
        let conversion = (params.currency, params.company_currency, &params.rate);
        let label = params
            .reference
            .clone()
            .unwrap_or_else(|| "Payment".to_string());

        let liquidity = priced_line(
            &params.liquidity_account_id,
            &label,
            &(&sign * &params.amount),
            conversion,
        )?;
        let mut counterpart = MoveLine::from_balance(
            params.counterpart_account_id.clone(),
            &(-liquidity.balance()),
            label.clone(),
        );
        if let Some(currency_id) = &liquidity.currency_id {
            counterpart =
                counterpart.with_currency(currency_id.clone(), -liquidity.amount_currency.clone());
        }

        let mut builder = MoveBuilder::new(params.journal_id.clone(), params.date);
        if let Some(reference) = &params.reference {
            builder = builder.reference(reference.clone());
        }
        if let Some(partner_id) = &params.partner_id {
            builder = builder.partner(partner_id.clone());
        }
        builder.line(liquidity).line(counterpart).build()
    }
}
