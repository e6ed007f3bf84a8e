//! In-memory storage implementation for testing

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::currency::{Currency, CurrencyRate};
use crate::tax::Tax;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct Tables {
    companies: HashMap<String, Company>,
    currencies: HashMap<String, Currency>,
    rates: Vec<CurrencyRate>,
    partners: HashMap<String, Partner>,
    accounts: HashMap<String, Account>,
    journals: HashMap<String, Journal>,
    sequences: HashMap<(String, i32), u32>,
    taxes: HashMap<String, Tax>,
    moves: HashMap<String, Move>,
    move_order: Vec<String>,
    lines: HashMap<String, MoveLine>,
    line_order: Vec<String>,
    partials: HashMap<String, PartialReconcile>,
    partial_order: Vec<String>,
    full_reconciles: HashMap<String, FullReconcile>,
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same tables. `begin` snapshots the tables and
/// `rollback` restores the snapshot; units of work nest.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    snapshots: Arc<RwLock<Vec<Tables>>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partial reconciliations stored
    pub fn partial_count(&self) -> LedgerResult<usize> {
        Ok(self.read()?.partials.len())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(poisoned)
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(poisoned)
    }
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Storage("memory storage lock poisoned".to_string())
}

fn upsert_ordered<T: Clone>(
    map: &mut HashMap<String, T>,
    order: &mut Vec<String>,
    id: &str,
    value: &T,
) {
    if map.insert(id.to_string(), value.clone()).is_none() {
        order.push(id.to_string());
    }
}

#[async_trait]
impl AccountingStorage for MemoryStorage {
    async fn begin(&mut self) -> LedgerResult<()> {
        let snapshot = self.read()?.clone();
        self.snapshots.write().map_err(poisoned)?.push(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> LedgerResult<()> {
        self.snapshots
            .write()
            .map_err(poisoned)?
            .pop()
            .map(|_| ())
            .ok_or_else(|| LedgerError::Storage("commit without begin".to_string()))
    }

    async fn rollback(&mut self) -> LedgerResult<()> {
        let snapshot = self
            .snapshots
            .write()
            .map_err(poisoned)?
            .pop()
            .ok_or_else(|| LedgerError::Storage("rollback without begin".to_string()))?;
        *self.write()? = snapshot;
        Ok(())
    }

    async fn save_company(&mut self, company: &Company) -> LedgerResult<()> {
        self.write()?
            .companies
            .insert(company.id.clone(), company.clone());
        Ok(())
    }

    async fn get_company(&self, company_id: &str) -> LedgerResult<Option<Company>> {
        Ok(self.read()?.companies.get(company_id).cloned())
    }

    async fn save_currency(&mut self, currency: &Currency) -> LedgerResult<()> {
        self.write()?
            .currencies
            .insert(currency.id.clone(), currency.clone());
        Ok(())
    }

    async fn get_currency(&self, currency_id: &str) -> LedgerResult<Option<Currency>> {
        Ok(self.read()?.currencies.get(currency_id).cloned())
    }

    async fn save_rate(&mut self, rate: &CurrencyRate) -> LedgerResult<()> {
        let mut tables = self.write()?;
        tables
            .rates
            .retain(|r| !(r.currency_id == rate.currency_id && r.date == rate.date));
        tables.rates.push(rate.clone());
        Ok(())
    }

    async fn get_rate(&self, currency_id: &str, date: NaiveDate) -> LedgerResult<BigDecimal> {
        let tables = self.read()?;
        Ok(tables
            .rates
            .iter()
            .filter(|r| r.currency_id == currency_id && r.date <= date)
            .max_by_key(|r| r.date)
            .map(|r| r.rate.clone())
            .unwrap_or_else(|| BigDecimal::from(1)))
    }

    async fn save_partner(&mut self, partner: &Partner) -> LedgerResult<()> {
        self.write()?
            .partners
            .insert(partner.id.clone(), partner.clone());
        Ok(())
    }

    async fn get_partner(&self, partner_id: &str) -> LedgerResult<Option<Partner>> {
        Ok(self.read()?.partners.get(partner_id).cloned())
    }

    async fn save_account(&mut self, account: &Account) -> LedgerResult<()> {
        self.write()?
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
    }

    async fn list_accounts(&self, company_id: &str) -> LedgerResult<Vec<Account>> {
        let tables = self.read()?;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|account| account.company_id == company_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    async fn save_journal(&mut self, journal: &Journal) -> LedgerResult<()> {
        self.write()?
            .journals
            .insert(journal.id.clone(), journal.clone());
        Ok(())
    }

    async fn get_journal(&self, journal_id: &str) -> LedgerResult<Option<Journal>> {
        Ok(self.read()?.journals.get(journal_id).cloned())
    }

    async fn next_sequence_number(&mut self, journal_id: &str, year: i32) -> LedgerResult<u32> {
        let mut tables = self.write()?;
        let counter = tables
            .sequences
            .entry((journal_id.to_string(), year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn save_tax(&mut self, tax: &Tax) -> LedgerResult<()> {
        self.write()?.taxes.insert(tax.id.clone(), tax.clone());
        Ok(())
    }

    async fn get_tax(&self, tax_id: &str) -> LedgerResult<Option<Tax>> {
        Ok(self.read()?.taxes.get(tax_id).cloned())
    }

    async fn save_move(&mut self, move_: &Move) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let Tables {
            moves, move_order, ..
        } = &mut *tables;
        upsert_ordered(moves, move_order, &move_.id, move_);
        Ok(())
    }

    async fn get_move(&self, move_id: &str) -> LedgerResult<Option<Move>> {
        Ok(self.read()?.moves.get(move_id).cloned())
    }

    async fn delete_move(&mut self, move_id: &str) -> LedgerResult<()> {
        let mut tables = self.write()?;
        if tables.moves.remove(move_id).is_none() {
            return Err(LedgerError::not_found("Move", move_id));
        }
        tables.move_order.retain(|id| id != move_id);

        let Tables {
            lines, line_order, ..
        } = &mut *tables;
        lines.retain(|_, line| line.move_id != move_id);
        line_order.retain(|id| lines.contains_key(id));
        Ok(())
    }

    async fn list_moves(&self, company_id: &str) -> LedgerResult<Vec<Move>> {
        let tables = self.read()?;
        Ok(tables
            .move_order
            .iter()
            .filter_map(|id| tables.moves.get(id))
            .filter(|move_| move_.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn save_line(&mut self, line: &MoveLine) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let Tables {
            lines, line_order, ..
        } = &mut *tables;
        upsert_ordered(lines, line_order, &line.id, line);
        Ok(())
    }

    async fn get_line(&self, line_id: &str) -> LedgerResult<Option<MoveLine>> {
        Ok(self.read()?.lines.get(line_id).cloned())
    }

    async fn get_move_lines(&self, move_id: &str) -> LedgerResult<Vec<MoveLine>> {
        let tables = self.read()?;
        Ok(tables
            .line_order
            .iter()
            .filter_map(|id| tables.lines.get(id))
            .filter(|line| line.move_id == move_id)
            .cloned()
            .collect())
    }

    async fn delete_line(&mut self, line_id: &str) -> LedgerResult<()> {
        let mut tables = self.write()?;
        if tables.lines.remove(line_id).is_none() {
            return Err(LedgerError::not_found("Journal item", line_id));
        }
        tables.line_order.retain(|id| id != line_id);
        Ok(())
    }

    async fn find_unreconciled_by_account(&self, account_id: &str) -> LedgerResult<Vec<MoveLine>> {
        let tables = self.read()?;
        Ok(tables
            .line_order
            .iter()
            .filter_map(|id| tables.lines.get(id))
            .filter(|line| line.account_id == account_id && !line.reconciled)
            .cloned()
            .collect())
    }

    async fn save_partial(&mut self, partial: &PartialReconcile) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let Tables {
            partials,
            partial_order,
            ..
        } = &mut *tables;
        upsert_ordered(partials, partial_order, &partial.id, partial);
        Ok(())
    }

    async fn get_partial(&self, partial_id: &str) -> LedgerResult<Option<PartialReconcile>> {
        Ok(self.read()?.partials.get(partial_id).cloned())
    }

    async fn delete_partial(&mut self, partial_id: &str) -> LedgerResult<()> {
        let mut tables = self.write()?;
        if tables.partials.remove(partial_id).is_none() {
            return Err(LedgerError::not_found("Partial reconcile", partial_id));
        }
        tables.partial_order.retain(|id| id != partial_id);
        Ok(())
    }

    async fn get_line_partials(&self, line_id: &str) -> LedgerResult<Vec<PartialReconcile>> {
        let tables = self.read()?;
        Ok(tables
            .partial_order
            .iter()
            .filter_map(|id| tables.partials.get(id))
            .filter(|p| p.debit_move_id == line_id || p.credit_move_id == line_id)
            .cloned()
            .collect())
    }

    async fn save_full_reconcile(&mut self, full: &FullReconcile) -> LedgerResult<()> {
        self.write()?
            .full_reconciles
            .insert(full.id.clone(), full.clone());
        Ok(())
    }

    async fn get_full_reconcile(&self, full_id: &str) -> LedgerResult<Option<FullReconcile>> {
        Ok(self.read()?.full_reconciles.get(full_id).cloned())
    }

    async fn delete_full_reconcile(&mut self, full_id: &str) -> LedgerResult<()> {
        if self.write()?.full_reconciles.remove(full_id).is_none() {
            return Err(LedgerError::not_found("Full reconcile", full_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let mut storage = MemoryStorage::new();
        let company = Company::new("c1".to_string(), "Acme".to_string(), "EUR".to_string());
        storage.save_company(&company).await.unwrap();

        storage.begin().await.unwrap();
        let move_ = Move::new("j1".to_string(), "c1".to_string(), date(2024, 1, 1));
        storage.save_move(&move_).await.unwrap();
        assert!(storage.get_move(&move_.id).await.unwrap().is_some());
        storage.rollback().await.unwrap();

        assert!(storage.get_move(&move_.id).await.unwrap().is_none());
        assert!(storage.get_company("c1").await.unwrap().is_some());
        assert!(storage.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_latest_rate_on_or_before_date() {
        let mut storage = MemoryStorage::new();
        for (day, rate) in [(1, "1.2"), (15, "1.1")] {
            storage
                .save_rate(&CurrencyRate {
                    currency_id: "USD".to_string(),
                    date: date(2024, 1, day),
                    rate: BigDecimal::from_str(rate).unwrap(),
                })
                .await
                .unwrap();
        }

        let early = storage.get_rate("USD", date(2024, 1, 10)).await.unwrap();
        let late = storage.get_rate("USD", date(2024, 2, 1)).await.unwrap();
        let none = storage.get_rate("GBP", date(2024, 2, 1)).await.unwrap();

        assert_eq!(early, BigDecimal::from_str("1.2").unwrap());
        assert_eq!(late, BigDecimal::from_str("1.1").unwrap());
        assert_eq!(none, BigDecimal::from(1));
    }

    #[tokio::test]
    async fn test_sequences_per_journal_and_year() {
        let mut storage = MemoryStorage::new();
        assert_eq!(storage.next_sequence_number("j1", 2024).await.unwrap(), 1);
        assert_eq!(storage.next_sequence_number("j1", 2024).await.unwrap(), 2);
        assert_eq!(storage.next_sequence_number("j1", 2025).await.unwrap(), 1);
        assert_eq!(storage.next_sequence_number("j2", 2024).await.unwrap(), 1);
    }
}
