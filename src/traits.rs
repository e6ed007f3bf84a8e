//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;

use crate::currency::{tolerance, Currency, CurrencyRate};
use crate::tax::Tax;
use crate::types::*;

/// Storage abstraction for the accounting engine
///
/// The engine only talks to this trait, so any backend (SQL database,
/// key-value store, in-memory maps) can hold the books. Writes between
/// `begin` and `commit` form one request and must be undone by `rollback`.
#[async_trait]
pub trait AccountingStorage: Send + Sync {
    /// Start a unit of work
    async fn begin(&mut self) -> LedgerResult<()>;

    /// Make the writes of the current unit of work durable
    async fn commit(&mut self) -> LedgerResult<()>;

    /// Discard the writes of the current unit of work
    async fn rollback(&mut self) -> LedgerResult<()>;

    async fn save_company(&mut self, company: &Company) -> LedgerResult<()>;

    async fn get_company(&self, company_id: &str) -> LedgerResult<Option<Company>>;

    async fn save_currency(&mut self, currency: &Currency) -> LedgerResult<()>;

    async fn get_currency(&self, currency_id: &str) -> LedgerResult<Option<Currency>>;

    async fn save_rate(&mut self, rate: &CurrencyRate) -> LedgerResult<()>;

    /// Latest rate of the currency on or before `date`, 1 when none is recorded
    async fn get_rate(&self, currency_id: &str, date: NaiveDate) -> LedgerResult<BigDecimal>;

    async fn save_partner(&mut self, partner: &Partner) -> LedgerResult<()>;

    async fn get_partner(&self, partner_id: &str) -> LedgerResult<Option<Partner>>;

    async fn save_account(&mut self, account: &Account) -> LedgerResult<()>;

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>>;

    /// List the accounts of a company
    async fn list_accounts(&self, company_id: &str) -> LedgerResult<Vec<Account>>;

    async fn save_journal(&mut self, journal: &Journal) -> LedgerResult<()>;

    async fn get_journal(&self, journal_id: &str) -> LedgerResult<Option<Journal>>;

    /// Next number of the journal sequence for a fiscal year, starting at 1
    async fn next_sequence_number(&mut self, journal_id: &str, year: i32) -> LedgerResult<u32>;

    async fn save_tax(&mut self, tax: &Tax) -> LedgerResult<()>;

    async fn get_tax(&self, tax_id: &str) -> LedgerResult<Option<Tax>>;

    /// Insert or replace a move header
    async fn save_move(&mut self, move_: &Move) -> LedgerResult<()>;

    async fn get_move(&self, move_id: &str) -> LedgerResult<Option<Move>>;

    /// Delete a move and its lines
    async fn delete_move(&mut self, move_id: &str) -> LedgerResult<()>;

    /// List the moves of a company in creation order
    async fn list_moves(&self, company_id: &str) -> LedgerResult<Vec<Move>>;

    /// Insert or replace a journal item
    async fn save_line(&mut self, line: &MoveLine) -> LedgerResult<()>;

    async fn get_line(&self, line_id: &str) -> LedgerResult<Option<MoveLine>>;

    /// Lines of a move in insertion order
    async fn get_move_lines(&self, move_id: &str) -> LedgerResult<Vec<MoveLine>>;

    async fn delete_line(&mut self, line_id: &str) -> LedgerResult<()>;

    /// Lines of an account that are not reconciled yet, in insertion order
    async fn find_unreconciled_by_account(&self, account_id: &str) -> LedgerResult<Vec<MoveLine>>;

    async fn save_partial(&mut self, partial: &PartialReconcile) -> LedgerResult<()>;

    async fn get_partial(&self, partial_id: &str) -> LedgerResult<Option<PartialReconcile>>;

    async fn delete_partial(&mut self, partial_id: &str) -> LedgerResult<()>;

    /// Partial reconciliations where the line is the debit or the credit side
    async fn get_line_partials(&self, line_id: &str) -> LedgerResult<Vec<PartialReconcile>>;

    async fn save_full_reconcile(&mut self, full: &FullReconcile) -> LedgerResult<()>;

    async fn get_full_reconcile(&self, full_id: &str) -> LedgerResult<Option<FullReconcile>>;

    async fn delete_full_reconcile(&mut self, full_id: &str) -> LedgerResult<()>;
}

/// Trait for implementing custom account and journal validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before saving
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;

    /// Validate a journal before saving
    fn validate_journal(&self, journal: &Journal) -> LedgerResult<()>;
}

/// Trait for implementing custom journal entry validation rules
pub trait MoveValidator: Send + Sync {
    /// Validate a line against its account and move
    fn validate_line(&self, line: &MoveLine, account: &Account, move_: &Move) -> LedgerResult<()>;

    /// Validate that the lines of a move balance within `10^-digits`
    fn validate_balance(&self, move_: &Move, lines: &[MoveLine], digits: u32) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        if account.id.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account ID cannot be empty".to_string(),
            ));
        }

        if account.code.trim().is_empty() || account.name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account code and name cannot be empty".to_string(),
            ));
        }

        if matches!(
            account.internal_type,
            InternalType::Receivable | InternalType::Payable
        ) && !account.reconcile
        {
            return Err(LedgerError::Validation(format!(
                "Account {} must allow reconciliation as it is receivable or payable",
                account.code
            )));
        }

        Ok(())
    }

    fn validate_journal(&self, journal: &Journal) -> LedgerResult<()> {
        if journal.code.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Journal code cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default move validator with the double-entry rules
pub struct DefaultMoveValidator;

impl MoveValidator for DefaultMoveValidator {
    fn validate_line(&self, line: &MoveLine, account: &Account, move_: &Move) -> LedgerResult<()> {
        check_line_amounts(line)?;

        if account.company_id != move_.company_id {
            return Err(LedgerError::Validation(format!(
                "Account {} does not belong to the company of the entry",
                account.code
            )));
        }

        if account.deprecated {
            return Err(LedgerError::Validation(format!(
                "Account {} is deprecated",
                account.code
            )));
        }

        Ok(())
    }

    fn validate_balance(&self, move_: &Move, lines: &[MoveLine], digits: u32) -> LedgerResult<()> {
        check_balanced(&move_.id, lines, digits)
    }
}

/// Debit and credit exclusivity and the secondary currency constraints
pub fn check_line_amounts(line: &MoveLine) -> LedgerResult<()> {
    let zero = BigDecimal::zero();

    if line.debit < zero || line.credit < zero {
        return Err(LedgerError::Validation(format!(
            "Wrong credit or debit value in accounting entry '{}'",
            line.name
        )));
    }

    if !line.debit.is_zero() && !line.credit.is_zero() {
        return Err(LedgerError::Validation(format!(
            "Line '{}' cannot have both a debit and a credit",
            line.name
        )));
    }

    if !line.amount_currency.is_zero() {
        if line.currency_id.is_none() {
            return Err(LedgerError::Validation(format!(
                "Line '{}' has an amount in currency but no currency",
                line.name
            )));
        }

        let balance = line.balance();
        let opposite = (balance > zero && line.amount_currency < zero)
            || (balance < zero && line.amount_currency > zero);
        if opposite {
            return Err(LedgerError::Validation(format!(
                "The amount expressed in the secondary currency of line '{}' must have the same sign as its balance",
                line.name
            )));
        }
    }

    Ok(())
}

/// Fail with [`LedgerError::Unbalanced`] when debits and credits differ by more than `10^-digits`
pub fn check_balanced(move_id: &str, lines: &[MoveLine], digits: u32) -> LedgerResult<()> {
    let debit: BigDecimal = lines.iter().map(|l| &l.debit).sum();
    let credit: BigDecimal = lines.iter().map(|l| &l.credit).sum();

    if (&debit - &credit).abs() > tolerance(digits) {
        return Err(LedgerError::Unbalanced {
            move_id: move_id.to_string(),
            debit,
            credit,
        });
    }
    Ok(())
}
