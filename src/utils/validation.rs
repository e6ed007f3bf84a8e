//! Validation utilities

use crate::traits::*;
use crate::types::*;
use bigdecimal::BigDecimal;

/// Validate that an amount is not negative
pub fn validate_non_negative_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount < BigDecimal::from(0) {
        Err(LedgerError::Validation(
            "Amount cannot be negative".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that an account code is valid
pub fn validate_account_code(code: &str) -> LedgerResult<()> {
    if code.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account code cannot be empty".to_string(),
        ));
    }

    if code.len() > 64 {
        return Err(LedgerError::Validation(
            "Account code cannot exceed 64 characters".to_string(),
        ));
    }

    // Codes are alphanumeric, dots and dashes allowed as separators
    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '.')
    {
        return Err(LedgerError::Validation(
            "Account code can only contain alphanumeric characters, dashes, and dots".to_string(),
        ));
    }

    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a journal item label is valid
pub fn validate_line_label(label: &str) -> LedgerResult<()> {
    if label.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Journal item label cannot be empty".to_string(),
        ));
    }

    if label.len() > 500 {
        return Err(LedgerError::Validation(
            "Journal item label cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Stricter move validator: labels are mandatory and receivable/payable
/// items must name a partner
pub struct EnhancedMoveValidator;

impl MoveValidator for EnhancedMoveValidator {
    fn validate_line(&self, line: &MoveLine, account: &Account, move_: &Move) -> LedgerResult<()> {
        DefaultMoveValidator.validate_line(line, account, move_)?;

        validate_line_label(&line.name)?;
        validate_non_negative_amount(&line.debit)?;
        validate_non_negative_amount(&line.credit)?;

        if matches!(
            account.internal_type,
            InternalType::Receivable | InternalType::Payable
        ) && line.partner_id.is_none()
        {
            return Err(LedgerError::Validation(format!(
                "Journal item '{}' on account {} needs a partner",
                line.name, account.code
            )));
        }

        Ok(())
    }

    fn validate_balance(&self, move_: &Move, lines: &[MoveLine], digits: u32) -> LedgerResult<()> {
        if lines.is_empty() {
            return Err(LedgerError::Validation(format!(
                "Journal entry {} has no items",
                move_.id
            )));
        }
        DefaultMoveValidator.validate_balance(move_, lines, digits)
    }
}

/// Enhanced account validator with detailed checks
pub struct EnhancedAccountValidator;

impl AccountValidator for EnhancedAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        validate_account_code(&account.code)?;
        validate_account_name(&account.name)?;
        DefaultAccountValidator.validate_account(account)
    }

    fn validate_journal(&self, journal: &Journal) -> LedgerResult<()> {
        DefaultAccountValidator.validate_journal(journal)?;
        if journal.code.len() > 5 {
            return Err(LedgerError::Validation(format!(
                "Journal code {} cannot exceed 5 characters",
                journal.code
            )));
        }
        Ok(())
    }
}
