//! Cascading tax computation
//!
//! Taxes are evaluated in ascending sequence. Each tax sees the base left by
//! the previous ones, so price-included taxes shrink the base and
//! `include_base_amount` taxes grow it. Group taxes splice their children in
//! place, threading the running totals through [`TaxBaseValues`].

use bigdecimal::{BigDecimal, One, Zero};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::currency::{round_digits, Currency};
use crate::tax::{AppliedTax, Tax, TaxAmountType, TaxError};
use crate::types::TaxRoundingMethod;

/// Running totals threaded through a cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBaseValues {
    pub total_excluded: BigDecimal,
    pub total_included: BigDecimal,
    pub base: BigDecimal,
}

impl TaxBaseValues {
    fn starting_at(amount: BigDecimal) -> Self {
        Self {
            total_excluded: amount.clone(),
            total_included: amount.clone(),
            base: amount,
        }
    }
}

/// Inputs of a tax computation
#[derive(Debug, Clone)]
pub struct ComputeAllParams<'a> {
    pub price_unit: BigDecimal,
    pub quantity: BigDecimal,
    pub currency: &'a Currency,
    pub rounding_method: TaxRoundingMethod,
    pub product_id: Option<&'a str>,
    pub partner_id: Option<&'a str>,
    /// Overrides both per-tax and total rounding when set
    pub force_round: Option<bool>,
}

impl<'a> ComputeAllParams<'a> {
    pub fn new(price_unit: BigDecimal, quantity: BigDecimal, currency: &'a Currency) -> Self {
        Self {
            price_unit,
            quantity,
            currency,
            rounding_method: TaxRoundingMethod::default(),
            product_id: None,
            partner_id: None,
            force_round: None,
        }
    }

    pub fn rounding(mut self, rounding_method: TaxRoundingMethod) -> Self {
        self.rounding_method = rounding_method;
        self
    }

    pub fn for_product(mut self, product_id: &'a str) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn for_partner(mut self, partner_id: &'a str) -> Self {
        self.partner_id = Some(partner_id);
        self
    }

    pub fn force_round(mut self, round: bool) -> Self {
        self.force_round = Some(round);
        self
    }
}

/// Result of a tax computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxComputation {
    pub base: BigDecimal,
    pub total_excluded: BigDecimal,
    pub total_included: BigDecimal,
    /// Applied leaf taxes, ordered by sequence
    pub taxes: Vec<AppliedTax>,
}

impl TaxComputation {
    /// Sum of all applied tax amounts
    pub fn total_tax(&self) -> BigDecimal {
        self.taxes.iter().map(|t| &t.amount).sum()
    }
}

/// Compute the taxes of `taxes` applied on `price_unit * quantity`
pub fn compute_all(taxes: &[Tax], params: &ComputeAllParams<'_>) -> Result<TaxComputation, TaxError> {
    debug!(
        taxes = taxes.len(),
        product = params.product_id.unwrap_or("-"),
        partner = params.partner_id.unwrap_or("-"),
        "computing taxes"
    );
    compute_with_base(taxes, params, None)
}

fn compute_with_base(
    taxes: &[Tax],
    params: &ComputeAllParams<'_>,
    base_values: Option<TaxBaseValues>,
) -> Result<TaxComputation, TaxError> {
    let currency = params.currency;
    let round_tax = params
        .force_round
        .unwrap_or(params.rounding_method == TaxRoundingMethod::RoundPerLine);
    let round_total = params.force_round.unwrap_or(true);
    let top_level = base_values.is_none();

    let mut prec = currency.decimal_places as i64;
    if !round_tax {
        prec += 5;
    }

    let TaxBaseValues {
        mut total_excluded,
        mut total_included,
        mut base,
    } = match base_values {
        Some(values) => values,
        None => TaxBaseValues::starting_at(round_digits(
            &(&params.price_unit * &params.quantity),
            prec,
        )),
    };

    let mut ordered: Vec<&Tax> = taxes.iter().collect();
    ordered.sort_by_key(|tax| tax.sequence);

    let mut applied = Vec::new();
    for tax in ordered {
        if tax.amount_type == TaxAmountType::Group {
            if let Some(nested) = tax
                .children
                .iter()
                .find(|child| child.amount_type == TaxAmountType::Group)
            {
                return Err(TaxError::NestedGroup(nested.name.clone()));
            }

            let ret = compute_with_base(
                &tax.children,
                params,
                Some(TaxBaseValues {
                    total_excluded: total_excluded.clone(),
                    total_included: total_included.clone(),
                    base: base.clone(),
                }),
            )?;
            total_excluded = ret.total_excluded;
            total_included = ret.total_included;
            if tax.include_base_amount {
                base = ret.base;
            }
            applied.extend(ret.taxes);
            continue;
        }

        let raw = tax_amount(tax, &base, &params.quantity)?;
        let amount = if round_tax {
            currency.round(&raw)
        } else {
            round_digits(&raw, prec)
        };
        trace!(tax = %tax.name, base = %base, amount = %amount, "tax applied");

        if tax.price_include {
            total_excluded -= &amount;
            base -= &amount;
        } else {
            total_included += &amount;
        }

        let tax_base = base.clone();
        if tax.include_base_amount {
            base += &amount;
        }

        applied.push(AppliedTax {
            tax_id: tax.id.clone(),
            name: tax.name.clone(),
            amount,
            base: tax_base,
            sequence: tax.sequence,
            account_id: tax.account_id.clone(),
            refund_account_id: tax.refund_account_id.clone(),
        });
    }

    applied.sort_by_key(|tax| tax.sequence);

    if top_level && round_total {
        total_excluded = currency.round(&total_excluded);
        total_included = currency.round(&total_included);
    }

    Ok(TaxComputation {
        base,
        total_excluded,
        total_included,
        taxes: applied,
    })
}

/// Amount of a single leaf tax on `base`
fn tax_amount(tax: &Tax, base: &BigDecimal, quantity: &BigDecimal) -> Result<BigDecimal, TaxError> {
    let hundred = BigDecimal::from(100);
    let rate = &tax.amount / &hundred;

    match (tax.amount_type, tax.price_include) {
        (TaxAmountType::Fixed, _) => {
            // The sign of a return lives in either the quantity or the unit price.
            if base.is_zero() {
                Ok(quantity * &tax.amount)
            } else if *base < BigDecimal::zero() {
                Ok(-(quantity.abs() * &tax.amount))
            } else {
                Ok(quantity.abs() * &tax.amount)
            }
        }
        (TaxAmountType::Percent, false) | (TaxAmountType::Division, true) => Ok(base * &rate),
        (TaxAmountType::Percent, true) => {
            let factor = BigDecimal::one() + &rate;
            if factor.is_zero() {
                return Err(TaxError::DivisionByZero(tax.name.clone()));
            }
            Ok(base - &(base / &factor))
        }
        (TaxAmountType::Division, false) => {
            let factor = BigDecimal::one() - &rate;
            if factor.is_zero() {
                return Err(TaxError::DivisionByZero(tax.name.clone()));
            }
            Ok(&(base / &factor) - base)
        }
        (TaxAmountType::Group, price_include) => Err(TaxError::UnsupportedCombination {
            tax: tax.name.clone(),
            amount_type: TaxAmountType::Group,
            price_include,
        }),
    }
}
