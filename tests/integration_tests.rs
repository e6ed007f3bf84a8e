//! Integration tests for accounting-reconcile

use accounting_reconcile::{
    patterns::{invoice_move, InvoiceKind, InvoiceLine, InvoiceParams},
    utils::{EnhancedAccountValidator, EnhancedMoveValidator},
    AccountingStorage, Company, ComputeAllParams, Currency, EngineConfig, Ledger, LedgerError,
    MatchingField, MemoryStorage, MoveBuilder, MoveDraft, MoveLine, Partner, ReconcileOptions,
    RequestContext, StandardChart, Tax, TaxAmountType, TaxRoundingMethod, ValidityCheck,
    WriteoffParams,
};
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use std::str::FromStr;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

struct Books {
    ledger: Ledger<MemoryStorage>,
    storage: MemoryStorage,
    chart: StandardChart,
    ctx: RequestContext,
}

impl Books {
    async fn new() -> Self {
        let storage = MemoryStorage::new();
        let mut ledger = Ledger::new(storage.clone(), EngineConfig::default());
        let mut company = Company::new("c1".to_string(), "Acme".to_string(), "EUR".to_string());
        ledger
            .setup_company(&company, &Currency::new("EUR", "Euro", 2))
            .await
            .unwrap();
        ledger
            .add_currency(&Currency::new("USD", "US Dollar", 2))
            .await
            .unwrap();
        let chart = ledger.setup_standard_chart(&mut company).await.unwrap();
        for (id, parent) in [("acme-corp", None), ("acme-billing", Some("acme-corp"))] {
            ledger
                .add_partner(&Partner {
                    id: id.to_string(),
                    name: id.to_string(),
                    parent_id: parent.map(str::to_string),
                })
                .await
                .unwrap();
        }

        Self {
            ledger,
            storage,
            chart,
            ctx: RequestContext::new("c1", date(2024, 3, 31)),
        }
    }

    fn account(&self, key: &str) -> String {
        self.chart.account(key).unwrap().id.clone()
    }

    fn journal(&self, key: &str) -> String {
        self.chart.journal(key).unwrap().id.clone()
    }

    /// Post a two-line entry and return its first item
    async fn entry(
        &mut self,
        journal: &str,
        on: NaiveDate,
        accounts: (&str, &str),
        balance: &str,
        usd: Option<&str>,
        partner: &str,
    ) -> MoveLine {
        let balance = dec(balance);
        let mut first = MoveLine::from_balance(self.account(accounts.0), &balance, "item".to_string());
        let mut second = MoveLine::from_balance(self.account(accounts.1), &-balance.clone(), "item".to_string());
        if let Some(usd) = usd {
            first = first.with_currency("USD".to_string(), dec(usd));
            second = second.with_currency("USD".to_string(), -dec(usd));
        }
        let draft = MoveBuilder::new(self.journal(journal), on)
            .partner(partner)
            .line(first)
            .line(second)
            .build()
            .unwrap();
        self.ledger.record(&self.ctx, draft).await.unwrap().lines[0].clone()
    }

    async fn invoice(&mut self, amount: &str, usd: Option<&str>, on: NaiveDate) -> MoveLine {
        self.entry("sale", on, ("receivable", "sales"), amount, usd, "acme-corp")
            .await
    }

    async fn payment(&mut self, amount: &str, usd: Option<&str>, on: NaiveDate) -> MoveLine {
        let amount = format!("-{}", amount);
        let usd = usd.map(|value| format!("-{}", value));
        self.entry("bank", on, ("receivable", "bank"), &amount, usd.as_deref(), "acme-billing")
            .await
    }

    async fn line(&self, line_id: &str) -> MoveLine {
        self.ledger.get_line(line_id).await.unwrap()
    }

    async fn reconcile(&mut self, lines: &[&MoveLine]) -> Result<Option<MoveLine>, LedgerError> {
        let ids: Vec<String> = lines.iter().map(|l| l.id.clone()).collect();
        self.ledger
            .reconcile(&self.ctx, &ids, None, &ReconcileOptions::default())
            .await
    }
}

#[tokio::test]
async fn test_invoice_settled_by_exact_payment() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", None, date(2024, 1, 10)).await;
    let payment = books.payment("100", None, date(2024, 1, 20)).await;

    books.reconcile(&[&invoice, &payment]).await.unwrap();

    let invoice = books.line(&invoice.id).await;
    let payment = books.line(&payment.id).await;
    assert!(invoice.reconciled && payment.reconciled);
    assert!(invoice.full_reconcile_id.is_some());
    assert_eq!(invoice.full_reconcile_id, payment.full_reconcile_id);

    let report = books.ledger.validate_integrity("c1").await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}

#[tokio::test]
async fn test_underpayment_written_off() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", None, date(2024, 1, 10)).await;
    let payment = books.payment("95", None, date(2024, 1, 20)).await;
    let params = WriteoffParams::new(books.account("writeoff"), books.journal("misc"))
        .labelled("Bank fees");

    let writeoff = books
        .ledger
        .reconcile(
            &books.ctx,
            &[invoice.id.clone(), payment.id.clone()],
            Some(&params),
            &ReconcileOptions::default(),
        )
        .await
        .unwrap()
        .expect("a write-off item");

    assert_eq!(writeoff.credit, dec("5"));
    assert_eq!(writeoff.name, "Bank fees");
    // The write-off goes to the commercial partner of the first item
    assert_eq!(writeoff.partner_id.as_deref(), Some("acme-corp"));

    let entry = books.ledger.get_lines(&writeoff.move_id).await.unwrap();
    let expense = entry
        .iter()
        .find(|l| l.account_id == books.account("writeoff"))
        .unwrap();
    assert_eq!(expense.debit, dec("5"));

    let invoice = books.line(&invoice.id).await;
    assert!(invoice.reconciled);
    assert_eq!(invoice.full_reconcile_id, writeoff.full_reconcile_id);
}

#[tokio::test]
async fn test_currency_overpayment_absorbed_by_writeoff() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", Some("110"), date(2024, 1, 10)).await;
    let payment = books.payment("100", Some("120"), date(2024, 1, 20)).await;
    let params = WriteoffParams::new(books.account("writeoff"), books.journal("misc"));

    let writeoff = books
        .ledger
        .reconcile(
            &books.ctx,
            &[invoice.id.clone(), payment.id.clone()],
            Some(&params),
            &ReconcileOptions::default(),
        )
        .await
        .unwrap()
        .expect("a write-off item");

    assert_eq!(writeoff.amount_currency, dec("10"));
    assert!(writeoff.reconciled);
    assert!(writeoff.amount_residual_currency.is_zero());

    let payment = books.line(&payment.id).await;
    assert!(payment.reconciled);
    assert_eq!(payment.full_reconcile_id, writeoff.full_reconcile_id);

    // The write-off settles the set, so no exchange difference is booked
    let full = books
        .storage
        .get_full_reconcile(payment.full_reconcile_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(full.exchange_move_id.is_none());
    assert_eq!(full.reconciled_line_ids.len(), 3);

    let report = books.ledger.validate_integrity("c1").await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}

#[tokio::test]
async fn test_two_payments_complete_a_full_reconcile() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", None, date(2024, 1, 10)).await;
    let first = books.payment("60", None, date(2024, 1, 20)).await;
    let second = books.payment("40", None, date(2024, 2, 20)).await;

    books.reconcile(&[&invoice, &first]).await.unwrap();
    let open = books.line(&invoice.id).await;
    assert_eq!(open.amount_residual, dec("40"));
    assert!(!open.reconciled);

    books.reconcile(&[&open, &second]).await.unwrap();
    let ids = [&invoice.id, &first.id, &second.id];
    let mut full_ids = Vec::new();
    for id in ids {
        let line = books.line(id).await;
        assert!(line.reconciled);
        assert!(line.amount_residual.is_zero());
        full_ids.push(line.full_reconcile_id.unwrap());
    }
    assert!(full_ids.iter().all(|id| *id == full_ids[0]));
}

#[tokio::test]
async fn test_currency_residual_booked_as_exchange_difference() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", Some("120"), date(2024, 1, 10)).await;
    let payment = books.payment("100", Some("110"), date(2024, 1, 20)).await;

    books.reconcile(&[&invoice, &payment]).await.unwrap();

    let invoice = books.line(&invoice.id).await;
    assert!(invoice.reconciled);
    assert!(invoice.amount_residual_currency.is_zero());

    let full = books
        .storage
        .get_full_reconcile(invoice.full_reconcile_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    let exchange = books
        .ledger
        .get_move(full.exchange_move_id.as_deref().unwrap())
        .await
        .unwrap();
    assert!(exchange.is_posted());
    assert_eq!(exchange.journal_id, books.journal("exchange"));

    let lines = books.ledger.get_lines(&exchange.id).await.unwrap();
    let on_receivable = lines
        .iter()
        .find(|l| l.account_id == books.account("receivable"))
        .unwrap();
    assert!(on_receivable.balance().is_zero());
    assert_eq!(on_receivable.amount_currency, dec("-10"));
    assert!(lines
        .iter()
        .any(|l| l.account_id == books.account("exchange_loss") && l.amount_currency == dec("10")));
    assert_eq!(full.reconciled_line_ids.len(), 3);
}

#[tokio::test]
async fn test_company_residual_booked_as_exchange_difference() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", Some("120"), date(2024, 1, 10)).await;
    let payment = books.payment("110", Some("120"), date(2024, 2, 10)).await;

    books.reconcile(&[&invoice, &payment]).await.unwrap();

    let payment = books.line(&payment.id).await;
    assert!(payment.reconciled);
    let full = books
        .storage
        .get_full_reconcile(payment.full_reconcile_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    let lines = books
        .ledger
        .get_lines(full.exchange_move_id.as_deref().unwrap())
        .await
        .unwrap();
    let gain = lines
        .iter()
        .find(|l| l.account_id == books.account("exchange_gain"))
        .unwrap();
    assert_eq!(gain.credit, dec("10"));

    let report = books.ledger.validate_integrity("c1").await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}

#[tokio::test]
async fn test_unreconcile_is_the_inverse_of_reconcile() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", Some("120"), date(2024, 1, 10)).await;
    let payment = books.payment("100", Some("110"), date(2024, 1, 20)).await;
    books.reconcile(&[&invoice, &payment]).await.unwrap();

    books
        .ledger
        .remove_move_reconcile(&books.ctx, &[payment.id.clone()])
        .await
        .unwrap();

    let invoice = books.line(&invoice.id).await;
    let payment = books.line(&payment.id).await;
    assert_eq!(invoice.amount_residual, dec("100"));
    assert_eq!(invoice.amount_residual_currency, dec("120"));
    assert_eq!(payment.amount_residual, dec("-100"));
    assert_eq!(payment.amount_residual_currency, dec("-110"));
    assert!(!invoice.reconciled && !payment.reconciled);

    // Matching again gives the same outcome
    books.reconcile(&[&invoice, &payment]).await.unwrap();
    assert!(books.line(&invoice.id).await.reconciled);
}

#[tokio::test]
async fn test_missing_exchange_configuration_rolls_back() {
    let mut books = Books::new().await;
    let mut company = books.ledger.get_company("c1").await.unwrap();
    company.income_currency_exchange_account_id = None;
    books.ledger.update_company(&company).await.unwrap();

    let invoice = books.invoice("100", Some("120"), date(2024, 1, 10)).await;
    let payment = books.payment("110", Some("120"), date(2024, 2, 10)).await;
    let result = books.reconcile(&[&invoice, &payment]).await;

    match result {
        Err(LedgerError::Configuration(message)) => {
            assert!(message.contains("'Gain Exchange Rate Account'"))
        }
        other => panic!("expected a configuration error, got {:?}", other),
    }
    assert_eq!(books.storage.partial_count().unwrap(), 0);
    assert_eq!(books.line(&invoice.id).await.amount_residual, dec("100"));
    assert_eq!(books.line(&payment.id).await.amount_residual, dec("-110"));
}

#[tokio::test]
async fn test_lock_dates_depend_on_role() {
    let mut books = Books::new().await;
    let mut company = books.ledger.get_company("c1").await.unwrap();
    company.period_lock_date = Some(date(2024, 1, 31));
    books.ledger.update_company(&company).await.unwrap();

    let draft = MoveBuilder::new(books.journal("misc"), date(2024, 1, 15))
        .debit(&books.account("expenses"), dec("10"), "fee")
        .credit(&books.account("bank"), dec("10"), "fee")
        .build()
        .unwrap();

    let result = books.ledger.record(&books.ctx, draft.clone()).await;
    assert!(matches!(result, Err(LedgerError::LockDate(_))));

    let adviser = books.ctx.clone().as_adviser();
    let recorded = books.ledger.record(&adviser, draft).await.unwrap();
    assert!(recorded.entry.is_posted());
}

#[tokio::test]
async fn test_balance_checked_now_or_at_posting() {
    let mut books = Books::new().await;
    let ctx = books.ctx.clone();
    let journal = books.journal("misc");
    let expenses = books.account("expenses");
    let bank = books.account("bank");
    let unbalanced = || vec![MoveLine::debit(expenses.clone(), dec("10"), "fee".to_string())];

    let entry = books
        .ledger
        .create_move(&ctx, &journal, date(2024, 1, 15), None)
        .await
        .unwrap();
    let result = books
        .ledger
        .add_lines(&ctx, &entry.id, unbalanced(), ValidityCheck::Immediate)
        .await;
    assert!(matches!(result, Err(LedgerError::Unbalanced { .. })));

    let deferred = books
        .ledger
        .create_move(&ctx, &journal, date(2024, 1, 15), None)
        .await
        .unwrap();
    books
        .ledger
        .add_lines(&ctx, &deferred.id, unbalanced(), ValidityCheck::Deferred)
        .await
        .unwrap();
    assert!(books.ledger.assert_balanced(&deferred.id).await.is_err());
    assert!(matches!(
        books.ledger.post(&ctx, &deferred.id).await,
        Err(LedgerError::Unbalanced { .. })
    ));

    books
        .ledger
        .add_lines(
            &ctx,
            &deferred.id,
            vec![MoveLine::credit(bank, dec("10"), "fee".to_string())],
            ValidityCheck::Immediate,
        )
        .await
        .unwrap();
    assert!(books.ledger.post(&ctx, &deferred.id).await.unwrap().is_posted());
}

#[tokio::test]
async fn test_open_items_matched_newest_first() {
    let mut books = Books::new().await;
    let early = books.invoice("70", None, date(2024, 1, 5)).await;
    let late = books.invoice("30", None, date(2024, 1, 25)).await;
    books.payment("50", None, date(2024, 2, 1)).await;

    let open = books
        .ledger
        .reconcile_open_items(&books.ctx, &books.account("receivable"))
        .await
        .unwrap();

    assert!(books.line(&late.id).await.reconciled);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, early.id);
    assert_eq!(open[0].amount_residual, dec("50"));
}

#[tokio::test]
async fn test_company_currency_only_matching() {
    let mut books = Books::new().await;
    let invoice = books.invoice("100", Some("120"), date(2024, 1, 10)).await;
    let payment = books.payment("100", Some("110"), date(2024, 1, 20)).await;
    let options = ReconcileOptions {
        matching: MatchingField::CompanyCurrencyOnly,
    };

    books
        .ledger
        .reconcile(&books.ctx, &[invoice.id.clone(), payment.id.clone()], None, &options)
        .await
        .unwrap();

    let partials = books.storage.get_line_partials(&invoice.id).await.unwrap();
    let matched = partials
        .iter()
        .find(|p| p.credit_move_id == payment.id)
        .unwrap();
    assert_eq!(matched.amount, dec("100"));
    assert!(matched.amount_currency.is_zero());
    assert_eq!(matched.currency_id.as_deref(), Some("USD"));
}

#[test]
fn test_tax_cascade_fixtures() {
    let eur = Currency::new("EUR", "Euro", 2);
    let price = |value: i32| ComputeAllParams::new(BigDecimal::from(value), BigDecimal::from(1), &eur);

    let vat = Tax::new("vat", "VAT 10%", "c1", TaxAmountType::Percent, BigDecimal::from(10));
    let result = accounting_reconcile::compute_all(&[vat], &price(200)).unwrap();
    assert_eq!(result.total_included, dec("220"));

    let division = Tax::new("div", "Division 10%", "c1", TaxAmountType::Division, BigDecimal::from(10));
    let result = accounting_reconcile::compute_all(&[division], &price(200)).unwrap();
    assert_eq!(result.taxes[0].amount, dec("22.22"));

    let ecotax = Tax::new("eco", "Ecotax", "c1", TaxAmountType::Fixed, BigDecimal::from(10))
        .affecting_base()
        .with_sequence(1);
    let vat = Tax::new("vat", "VAT 10%", "c1", TaxAmountType::Percent, BigDecimal::from(10))
        .with_sequence(2);
    let group = Tax::group("grp", "Eco + VAT", "c1", vec![ecotax, vat]);
    let result = accounting_reconcile::compute_all(&[group], &price(200)).unwrap();
    assert_eq!(result.total_included, dec("231"));
    assert_eq!(result.taxes.len(), 2);
}

#[tokio::test]
async fn test_foreign_invoice_with_taxes_is_balanced() {
    let mut books = Books::new().await;
    let eur = Currency::new("EUR", "Euro", 2);
    let usd = Currency::new("USD", "US Dollar", 2);
    let vat = Tax::new("vat", "VAT 20%", "c1", TaxAmountType::Percent, BigDecimal::from(20))
        .with_accounts(Some(books.account("tax_payable")), None);
    books.ledger.add_tax(&vat).await.unwrap();

    let draft = invoice_move(InvoiceParams {
        kind: InvoiceKind::CustomerInvoice,
        journal_id: books.journal("sale"),
        date: date(2024, 1, 10),
        date_maturity: Some(date(2024, 2, 10)),
        reference: Some("INV/2024/1".to_string()),
        partner_id: Some("acme-corp".to_string()),
        counterpart_account_id: books.account("receivable"),
        lines: vec![InvoiceLine {
            product_id: Some("licence".to_string()),
            account_id: books.account("sales"),
            label: "Licence".to_string(),
            price_unit: dec("33.33"),
            quantity: BigDecimal::from(3),
            taxes: vec![vat],
        }],
        currency: &usd,
        company_currency: &eur,
        rate: dec("1.1"),
        rounding_method: TaxRoundingMethod::RoundPerLine,
    })
    .unwrap();
    let recorded = books.ledger.record(&books.ctx, draft).await.unwrap();

    let receivable = recorded.lines.last().unwrap();
    // 99.99 + 20.00 tax in USD
    assert_eq!(receivable.amount_currency, dec("119.99"));
    let total: BigDecimal = recorded.lines.iter().map(|l| l.balance()).sum();
    assert!(total.is_zero());
}

#[tokio::test]
async fn test_enhanced_validators_require_partner() {
    let storage = MemoryStorage::new();
    let mut ledger = Ledger::with_validators(
        storage,
        EngineConfig::default(),
        Box::new(EnhancedAccountValidator),
        Box::new(EnhancedMoveValidator),
    );
    let mut company = Company::new("c1".to_string(), "Acme".to_string(), "EUR".to_string());
    ledger
        .setup_company(&company, &Currency::new("EUR", "Euro", 2))
        .await
        .unwrap();
    let chart = ledger.setup_standard_chart(&mut company).await.unwrap();
    let ctx = RequestContext::new("c1", date(2024, 3, 31));

    let draft = MoveDraft {
        journal_id: chart.journal("sale").unwrap().id.clone(),
        date: date(2024, 1, 10),
        reference: None,
        lines: vec![
            MoveLine::debit(chart.account("receivable").unwrap().id.clone(), dec("10"), "x".to_string()),
            MoveLine::credit(chart.account("sales").unwrap().id.clone(), dec("10"), "x".to_string()),
        ],
    };
    let result = ledger.record(&ctx, draft).await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
}
