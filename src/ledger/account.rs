//! Account and journal management

use std::collections::HashMap;
use tracing::debug;

use crate::traits::*;
use crate::types::*;

/// Account manager for handling chart of accounts and journal operations
pub struct AccountManager<S: AccountingStorage> {
    pub(crate) storage: S,
    validator: Box<dyn AccountValidator>,
}

impl<S: AccountingStorage> AccountManager<S> {
    /// Create a new account manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultAccountValidator),
        }
    }

    /// Create a new account manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn AccountValidator>) -> Self {
        Self { storage, validator }
    }

    /// Create a new account
    pub async fn create_account(
        &mut self,
        company_id: &str,
        code: &str,
        name: &str,
        internal_type: InternalType,
    ) -> LedgerResult<Account> {
        let account = Account::new(
            new_id(),
            code.to_string(),
            name.to_string(),
            company_id.to_string(),
            internal_type,
        );
        self.add_account(account).await
    }

    /// Save a fully configured account
    pub async fn add_account(&mut self, account: Account) -> LedgerResult<Account> {
        self.validator.validate_account(&account)?;

        if self.storage.get_company(&account.company_id).await?.is_none() {
            return Err(LedgerError::not_found("Company", account.company_id.clone()));
        }

        let existing = self.storage.list_accounts(&account.company_id).await?;
        if existing
            .iter()
            .any(|other| other.code == account.code && other.id != account.id)
        {
            return Err(LedgerError::Validation(format!(
                "Account with code '{}' already exists",
                account.code
            )));
        }

        self.storage.save_account(&account).await?;
        debug!(account = %account.code, "account saved");

        Ok(account)
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.storage.get_account(account_id).await
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, account_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Account", account_id))
    }

    /// List the accounts of a company, ordered by code
    pub async fn list_accounts(&self, company_id: &str) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(company_id).await
    }

    /// Refuse new journal items on an account
    pub async fn deprecate_account(&mut self, account_id: &str) -> LedgerResult<()> {
        let mut account = self.get_account_required(account_id).await?;
        account.deprecated = true;
        self.storage.save_account(&account).await
    }

    /// Create a new journal
    pub async fn create_journal(
        &mut self,
        company_id: &str,
        code: &str,
        name: &str,
        journal_type: JournalType,
    ) -> LedgerResult<Journal> {
        let journal = Journal::new(
            new_id(),
            code.to_string(),
            name.to_string(),
            company_id.to_string(),
            journal_type,
        );
        self.add_journal(journal).await
    }

    /// Save a fully configured journal
    pub async fn add_journal(&mut self, journal: Journal) -> LedgerResult<Journal> {
        self.validator.validate_journal(&journal)?;

        for account_id in [
            &journal.default_debit_account_id,
            &journal.default_credit_account_id,
        ]
        .into_iter()
        .flatten()
        {
            self.get_account_required(account_id).await?;
        }

        self.storage.save_journal(&journal).await?;
        Ok(journal)
    }

    /// Get a journal by ID, returning an error if not found
    pub async fn get_journal_required(&self, journal_id: &str) -> LedgerResult<Journal> {
        self.storage
            .get_journal(journal_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Journal", journal_id))
    }
}

/// Accounts and journals of a freshly configured company, keyed by role
#[derive(Debug, Clone)]
pub struct StandardChart {
    pub accounts: HashMap<String, Account>,
    pub journals: HashMap<String, Journal>,
}

impl StandardChart {
    /// Account by role, returning an error if the chart lacks it
    pub fn account(&self, key: &str) -> LedgerResult<&Account> {
        self.accounts
            .get(key)
            .ok_or_else(|| LedgerError::not_found("Account", key))
    }

    /// Journal by role, returning an error if the chart lacks it
    pub fn journal(&self, key: &str) -> LedgerResult<&Journal> {
        self.journals
            .get(key)
            .ok_or_else(|| LedgerError::not_found("Journal", key))
    }
}

/// Utility functions for working with accounts
pub mod utils {
    use super::*;

    const ACCOUNTS: [(&str, &str, &str, InternalType); 10] = [
        ("bank", "1000", "Bank", InternalType::Liquidity),
        ("receivable", "1200", "Accounts Receivable", InternalType::Receivable),
        ("tax_receivable", "1400", "Tax Receivable", InternalType::Other),
        ("payable", "2000", "Accounts Payable", InternalType::Payable),
        ("tax_payable", "2100", "Tax Payable", InternalType::Other),
        ("sales", "4000", "Product Sales", InternalType::Other),
        ("expenses", "6000", "Expenses", InternalType::Other),
        ("exchange_loss", "6700", "Foreign Exchange Loss", InternalType::Other),
        ("writeoff", "6900", "Write-Off", InternalType::Other),
        ("exchange_gain", "7700", "Foreign Exchange Gain", InternalType::Other),
    ];

    /// Create a standard chart of accounts and journals for a company
    ///
    /// The company is updated with the exchange journal and the gain and loss
    /// accounts so currency differences can be booked.
    pub async fn create_standard_chart<S: AccountingStorage>(
        account_manager: &mut AccountManager<S>,
        company: &mut Company,
    ) -> LedgerResult<StandardChart> {
        let mut accounts = HashMap::new();
        for (key, code, name, internal_type) in ACCOUNTS {
            let account = account_manager
                .create_account(&company.id, code, name, internal_type)
                .await?;
            accounts.insert(key.to_string(), account);
        }

        let default_account = |key: &str| accounts.get(key).map(|a| a.id.clone());
        let journal_specs = [
            ("sale", "SAL", "Customer Invoices", JournalType::Sale, "sales"),
            ("purchase", "PUR", "Vendor Bills", JournalType::Purchase, "expenses"),
            ("bank", "BNK", "Bank", JournalType::Bank, "bank"),
            ("misc", "MISC", "Miscellaneous Operations", JournalType::General, ""),
            ("exchange", "EXCH", "Exchange Difference", JournalType::General, ""),
        ];

        let mut journals = HashMap::new();
        for (key, code, name, journal_type, account_key) in journal_specs {
            let mut journal = Journal::new(
                new_id(),
                code.to_string(),
                name.to_string(),
                company.id.clone(),
                journal_type,
            );
            journal.default_debit_account_id = default_account(account_key);
            journal.default_credit_account_id = default_account(account_key);
            let journal = account_manager.add_journal(journal).await?;
            journals.insert(key.to_string(), journal);
        }

        company.currency_exchange_journal_id = journals.get("exchange").map(|j| j.id.clone());
        company.income_currency_exchange_account_id = default_account("exchange_gain");
        company.expense_currency_exchange_account_id = default_account("exchange_loss");
        account_manager.storage.save_company(company).await?;

        Ok(StandardChart { accounts, journals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;

    async fn manager_with_company() -> (AccountManager<MemoryStorage>, Company) {
        let mut storage = MemoryStorage::new();
        let company = Company::new("c1".to_string(), "Acme".to_string(), "EUR".to_string());
        storage.save_company(&company).await.unwrap();
        (AccountManager::new(storage), company)
    }

    #[tokio::test]
    async fn test_duplicate_code_is_rejected() {
        let (mut manager, _) = manager_with_company().await;
        manager
            .create_account("c1", "1200", "Receivable", InternalType::Receivable)
            .await
            .unwrap();
        let result = manager
            .create_account("c1", "1200", "Other receivable", InternalType::Receivable)
            .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deprecated_account_refuses_items() {
        let (mut manager, _) = manager_with_company().await;
        let account = manager
            .create_account("c1", "6000", "Old expenses", InternalType::Other)
            .await
            .unwrap();
        manager.deprecate_account(&account.id).await.unwrap();

        let stored = manager.get_account_required(&account.id).await.unwrap();
        assert!(stored.deprecated);

        let entry = Move::new("j1".to_string(), "c1".to_string(), chrono::NaiveDate::MIN);
        let line = MoveLine::debit(stored.id.clone(), bigdecimal::BigDecimal::from(5), "x".to_string());
        let result = DefaultMoveValidator.validate_line(&line, &stored, &entry);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_standard_chart_configures_exchange() {
        let (mut manager, mut company) = manager_with_company().await;
        let chart = utils::create_standard_chart(&mut manager, &mut company)
            .await
            .unwrap();

        assert_eq!(chart.accounts.len(), 10);
        assert!(chart.account("receivable").unwrap().reconcile);
        assert_eq!(
            company.currency_exchange_journal_id.as_deref(),
            Some(chart.journal("exchange").unwrap().id.as_str())
        );

        let stored = manager.storage.get_company("c1").await.unwrap().unwrap();
        assert_eq!(
            stored.income_currency_exchange_account_id,
            Some(chart.account("exchange_gain").unwrap().id.clone())
        );
    }
}
