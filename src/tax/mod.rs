//! Tax definitions and the cascading tax computation engine

pub mod compute;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::LedgerError;

pub use compute::*;

/// How a tax amount is derived from its base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxAmountType {
    /// Fixed amount per unit
    Fixed,
    /// Percentage of the price
    Percent,
    /// Percentage of the price tax included
    Division,
    /// Ordered set of child taxes
    Group,
}

/// Tax definition; read-only during computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tax {
    pub id: String,
    pub name: String,
    pub company_id: String,
    pub amount_type: TaxAmountType,
    /// Rate in percent, or fixed amount per unit
    pub amount: BigDecimal,
    /// Evaluation order, ascending
    pub sequence: i32,
    /// The price already contains this tax
    pub price_include: bool,
    /// Later taxes are computed on the base plus this tax
    pub include_base_amount: bool,
    /// Account receiving the tax amount
    pub account_id: Option<String>,
    /// Account receiving the tax amount on refunds
    pub refund_account_id: Option<String>,
    /// Children of a group tax
    pub children: Vec<Tax>,
}

impl Tax {
    /// Create a leaf tax
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        company_id: impl Into<String>,
        amount_type: TaxAmountType,
        amount: BigDecimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            company_id: company_id.into(),
            amount_type,
            amount,
            sequence: 1,
            price_include: false,
            include_base_amount: false,
            account_id: None,
            refund_account_id: None,
            children: Vec::new(),
        }
    }

    /// Create a group tax from its children
    pub fn group(
        id: impl Into<String>,
        name: impl Into<String>,
        company_id: impl Into<String>,
        children: Vec<Tax>,
    ) -> Self {
        let mut tax = Self::new(
            id,
            name,
            company_id,
            TaxAmountType::Group,
            BigDecimal::from(0),
        );
        tax.children = children;
        tax
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn price_included(mut self) -> Self {
        self.price_include = true;
        self
    }

    pub fn affecting_base(mut self) -> Self {
        self.include_base_amount = true;
        self
    }

    pub fn with_accounts(mut self, account_id: Option<String>, refund_account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self.refund_account_id = refund_account_id;
        self
    }
}

/// One leaf tax applied by a computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedTax {
    pub tax_id: String,
    pub name: String,
    pub amount: BigDecimal,
    /// Base the tax was computed on
    pub base: BigDecimal,
    pub sequence: i32,
    pub account_id: Option<String>,
    pub refund_account_id: Option<String>,
}

/// Tax configuration errors
#[derive(Debug, thiserror::Error)]
pub enum TaxError {
    #[error("Nested group of taxes are not allowed: {0}")]
    NestedGroup(String),
    #[error("Tax {tax} cannot be computed as {amount_type:?} (price included: {price_include})")]
    UnsupportedCombination {
        tax: String,
        amount_type: TaxAmountType,
        price_include: bool,
    },
    #[error("Division tax {0} of 100% excluded from price has no finite amount")]
    DivisionByZero(String),
}

impl From<TaxError> for LedgerError {
    fn from(err: TaxError) -> Self {
        LedgerError::Configuration(err.to_string())
    }
}
