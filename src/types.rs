//! Core types and data structures for the accounting system

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh record identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accounting role of an account, driving reconciliation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalType {
    /// Customer balances, always reconcilable
    Receivable,
    /// Supplier balances, always reconcilable
    Payable,
    /// Bank and cash accounts
    Liquidity,
    /// Everything else (income, expense, tax, equity...)
    Other,
}

/// Ledger account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for the account
    pub id: String,
    /// Chart of accounts code (e.g. "1200")
    pub code: String,
    /// Human-readable account name
    pub name: String,
    /// Owning company
    pub company_id: String,
    /// Role of the account
    pub internal_type: InternalType,
    /// Whether journal items of this account can be matched together
    pub reconcile: bool,
    /// Secondary currency forced on every line of the account
    pub currency_id: Option<String>,
    /// Deprecated accounts refuse new journal items
    pub deprecated: bool,
}

impl Account {
    /// Create a new account; receivable and payable accounts are reconcilable
    pub fn new(
        id: String,
        code: String,
        name: String,
        company_id: String,
        internal_type: InternalType,
    ) -> Self {
        let reconcile = matches!(
            internal_type,
            InternalType::Receivable | InternalType::Payable
        );
        Self {
            id,
            code,
            name,
            company_id,
            internal_type,
            reconcile,
            currency_id: None,
            deprecated: false,
        }
    }

    /// Allow matching on this account
    pub fn reconcilable(mut self) -> Self {
        self.reconcile = true;
        self
    }

    /// Force a secondary currency on this account
    pub fn with_currency(mut self, currency_id: impl Into<String>) -> Self {
        self.currency_id = Some(currency_id.into());
        self
    }

    /// Whether lines of this account carry residual amounts
    pub fn tracks_residual(&self) -> bool {
        self.reconcile || self.internal_type == InternalType::Liquidity
    }
}

/// Kind of journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalType {
    Sale,
    Purchase,
    Cash,
    Bank,
    General,
}

/// Journal grouping moves and numbering them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub id: String,
    /// Short code used as the move name prefix
    pub code: String,
    pub name: String,
    pub company_id: String,
    pub journal_type: JournalType,
    pub default_debit_account_id: Option<String>,
    pub default_credit_account_id: Option<String>,
    /// Posted moves of this journal may be reset to draft
    pub update_posted: bool,
}

impl Journal {
    /// Create a new journal
    pub fn new(
        id: String,
        code: String,
        name: String,
        company_id: String,
        journal_type: JournalType,
    ) -> Self {
        Self {
            id,
            code,
            name,
            company_id,
            journal_type,
            default_debit_account_id: None,
            default_credit_account_id: None,
            update_posted: false,
        }
    }
}

/// Company policy for rounding computed taxes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxRoundingMethod {
    /// Round every tax amount as soon as it is computed
    #[default]
    RoundPerLine,
    /// Keep extra digits while cascading, round the totals once
    RoundGlobally,
}

/// Company owning accounts, journals and moves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    /// Company (local) currency
    pub currency_id: String,
    pub tax_rounding_method: TaxRoundingMethod,
    /// Entries on or before this date are locked for non-advisers
    pub period_lock_date: Option<NaiveDate>,
    /// Entries on or before this date are locked for everyone
    pub fiscalyear_lock_date: Option<NaiveDate>,
    /// Journal receiving exchange difference entries
    pub currency_exchange_journal_id: Option<String>,
    /// Exchange gain account
    pub income_currency_exchange_account_id: Option<String>,
    /// Exchange loss account
    pub expense_currency_exchange_account_id: Option<String>,
}

impl Company {
    /// Create a company with default policies and no exchange configuration
    pub fn new(id: String, name: String, currency_id: String) -> Self {
        Self {
            id,
            name,
            currency_id,
            tax_rounding_method: TaxRoundingMethod::default(),
            period_lock_date: None,
            fiscalyear_lock_date: None,
            currency_exchange_journal_id: None,
            income_currency_exchange_account_id: None,
            expense_currency_exchange_account_id: None,
        }
    }
}

/// Customer or supplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: String,
    pub name: String,
    /// Parent company of a contact
    pub parent_id: Option<String>,
}

/// Lifecycle state of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    Draft,
    Posted,
}

/// Journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    /// Unique identifier for the move
    pub id: String,
    /// Sequence number, assigned when posted
    pub name: Option<String>,
    /// Optional external reference (invoice number, payment reference...)
    pub reference: Option<String>,
    /// Accounting date
    pub date: NaiveDate,
    pub journal_id: String,
    pub company_id: String,
    pub state: MoveState,
    /// Move this one reverses
    pub reversed_move_id: Option<String>,
    /// When the move was created
    pub created_at: NaiveDateTime,
    /// When the move was last updated
    pub updated_at: NaiveDateTime,
}

impl Move {
    /// Create a new draft move
    pub fn new(journal_id: String, company_id: String, date: NaiveDate) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: new_id(),
            name: None,
            reference: None,
            date,
            journal_id,
            company_id,
            state: MoveState::Draft,
            reversed_move_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name, "/" while the move is not numbered
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("/")
    }

    pub fn is_posted(&self) -> bool {
        self.state == MoveState::Posted
    }
}

/// Journal item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveLine {
    pub id: String,
    pub move_id: String,
    /// Label
    pub name: String,
    pub account_id: String,
    pub partner_id: Option<String>,
    pub company_id: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    /// Amount in the secondary currency, signed like the balance
    pub amount_currency: BigDecimal,
    /// Secondary currency
    pub currency_id: Option<String>,
    /// Accounting date, copied from the move
    pub date: NaiveDate,
    pub date_maturity: Option<NaiveDate>,
    /// Taxes applied on this line
    pub tax_ids: Vec<String>,
    /// Tax booked by this line
    pub tax_line_id: Option<String>,
    /// Derived: fully matched
    pub reconciled: bool,
    /// Derived: open balance in company currency
    pub amount_residual: BigDecimal,
    /// Derived: open balance in the secondary currency
    pub amount_residual_currency: BigDecimal,
    pub full_reconcile_id: Option<String>,
}

impl MoveLine {
    /// Create a line; move, company and date are filled when the line is added to a move
    pub fn new(account_id: String, debit: BigDecimal, credit: BigDecimal, name: String) -> Self {
        Self {
            id: new_id(),
            move_id: String::new(),
            name,
            account_id,
            partner_id: None,
            company_id: String::new(),
            debit,
            credit,
            amount_currency: BigDecimal::zero(),
            currency_id: None,
            date: NaiveDate::MIN,
            date_maturity: None,
            tax_ids: Vec::new(),
            tax_line_id: None,
            reconciled: false,
            amount_residual: BigDecimal::zero(),
            amount_residual_currency: BigDecimal::zero(),
            full_reconcile_id: None,
        }
    }

    /// Create a debit line
    pub fn debit(account_id: String, amount: BigDecimal, name: String) -> Self {
        Self::new(account_id, amount, BigDecimal::zero(), name)
    }

    /// Create a credit line
    pub fn credit(account_id: String, amount: BigDecimal, name: String) -> Self {
        Self::new(account_id, BigDecimal::zero(), amount, name)
    }

    /// Create a line from a signed balance (positive = debit)
    pub fn from_balance(account_id: String, balance: &BigDecimal, name: String) -> Self {
        if *balance >= BigDecimal::zero() {
            Self::debit(account_id, balance.clone(), name)
        } else {
            Self::credit(account_id, balance.abs(), name)
        }
    }

    pub fn with_partner(mut self, partner_id: Option<String>) -> Self {
        self.partner_id = partner_id;
        self
    }

    /// Attach a secondary currency amount
    pub fn with_currency(mut self, currency_id: String, amount_currency: BigDecimal) -> Self {
        self.currency_id = Some(currency_id);
        self.amount_currency = amount_currency;
        self
    }

    pub fn with_maturity(mut self, date_maturity: NaiveDate) -> Self {
        self.date_maturity = Some(date_maturity);
        self
    }

    pub fn with_taxes(mut self, tax_ids: Vec<String>) -> Self {
        self.tax_ids = tax_ids;
        self
    }

    /// Signed balance (debit - credit)
    pub fn balance(&self) -> BigDecimal {
        &self.debit - &self.credit
    }

    /// Date used to order lines when matching
    pub fn maturity_or_date(&self) -> NaiveDate {
        self.date_maturity.unwrap_or(self.date)
    }
}

/// Match between one debit and one credit line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialReconcile {
    pub id: String,
    pub debit_move_id: String,
    pub credit_move_id: String,
    /// Matched amount in company currency, never negative
    pub amount: BigDecimal,
    /// Matched amount in the shared secondary currency
    pub amount_currency: BigDecimal,
    pub currency_id: Option<String>,
    pub company_id: String,
    /// Latest date of the two matched lines
    pub max_date: NaiveDate,
    pub full_reconcile_id: Option<String>,
}

/// Set of partial matches settling a group of lines to zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullReconcile {
    pub id: String,
    /// Matching number shown on the reconciled lines
    pub name: String,
    pub partial_reconcile_ids: Vec<String>,
    pub reconciled_line_ids: Vec<String>,
    /// Entry booking the exchange difference, if one was needed
    pub exchange_move_id: Option<String>,
    /// Partial folding the exchange entry into the set
    pub exchange_partial_rec_id: Option<String>,
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Already reconciled: {0}")]
    AlreadyReconciled(String),
    #[error("Cannot create unbalanced journal entry. Move {move_id}: debit = {debit}, credit = {credit}")]
    Unbalanced {
        move_id: String,
        debit: BigDecimal,
        credit: BigDecimal,
    },
    #[error("{0}")]
    LockDate(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl LedgerError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
