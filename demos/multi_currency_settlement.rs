//! Multi-currency settlement example

use accounting_reconcile::{
    init_tracing, AccountingStorage, Company, Currency, EngineConfig, Ledger, MemoryStorage,
    MoveBuilder, MoveLine, Partner, ReconcileOptions, RequestContext,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    println!("💱 Accounting Reconcile - Multi-Currency Settlement Example\n");

    let storage = MemoryStorage::new();
    let mut ledger = Ledger::new(storage.clone(), EngineConfig::default());

    // 1. Company in EUR, customers billed in USD
    let mut company = Company::new("acme".to_string(), "Acme SA".to_string(), "EUR".to_string());
    ledger
        .setup_company(&company, &Currency::new("EUR", "Euro", 2))
        .await?;
    ledger.add_currency(&Currency::new("USD", "US Dollar", 2)).await?;
    let jan = NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("invalid date")?;
    ledger.set_rate("USD", jan, BigDecimal::from(12) / BigDecimal::from(10)).await?;

    let chart = ledger.setup_standard_chart(&mut company).await?;
    ledger
        .add_partner(&Partner {
            id: "globex".to_string(),
            name: "Globex Inc.".to_string(),
            parent_id: None,
        })
        .await?;

    let account = |key: &str| chart.account(key).map(|a| a.id.clone());
    let journal = |key: &str| chart.journal(key).map(|j| j.id.clone());
    let receivable = account("receivable")?;

    let ctx = RequestContext::new(
        "acme",
        NaiveDate::from_ymd_opt(2024, 3, 31).ok_or("invalid date")?,
    );
    println!(
        "  ✓ 1 EUR = {} USD",
        ledger.convert(&BigDecimal::from(1), "EUR", "USD", jan).await?
    );

    // 2. Invoice of 120 USD booked at 100 EUR
    let invoice = MoveBuilder::new(journal("sale")?, NaiveDate::from_ymd_opt(2024, 1, 10).ok_or("invalid date")?)
        .partner("globex")
        .line(
            MoveLine::from_balance(receivable.clone(), &BigDecimal::from(100), "INV/001".to_string())
                .with_currency("USD".to_string(), BigDecimal::from(120)),
        )
        .line(
            MoveLine::from_balance(account("sales")?, &BigDecimal::from(-100), "INV/001".to_string())
                .with_currency("USD".to_string(), BigDecimal::from(-120)),
        )
        .build()?;
    let invoice = ledger.record(&ctx, invoice).await?;
    println!("  ✓ Posted invoice {}", invoice.entry.name.as_deref().unwrap_or("/"));

    // 3. The customer pays 120 USD, now worth 110 EUR
    let payment = MoveBuilder::new(journal("bank")?, NaiveDate::from_ymd_opt(2024, 2, 15).ok_or("invalid date")?)
        .partner("globex")
        .line(
            MoveLine::from_balance(receivable.clone(), &BigDecimal::from(-110), "PAY/001".to_string())
                .with_currency("USD".to_string(), BigDecimal::from(-120)),
        )
        .line(
            MoveLine::from_balance(account("bank")?, &BigDecimal::from(110), "PAY/001".to_string())
                .with_currency("USD".to_string(), BigDecimal::from(120)),
        )
        .build()?;
    let payment = ledger.record(&ctx, payment).await?;
    println!("  ✓ Posted payment {}\n", payment.entry.name.as_deref().unwrap_or("/"));

    // 4. Match both receivable items
    let line_ids: Vec<String> = invoice
        .lines
        .iter()
        .chain(payment.lines.iter())
        .filter(|line| line.account_id == receivable)
        .map(|line| line.id.clone())
        .collect();
    ledger
        .reconcile(&ctx, &line_ids, None, &ReconcileOptions::default())
        .await?;

    println!("🔗 Reconciliation:");
    for line_id in &line_ids {
        let line = ledger.get_line(line_id).await?;
        println!(
            "  {} residual {} EUR / {} USD, matching {:?}",
            line.name, line.amount_residual, line.amount_residual_currency, line.full_reconcile_id
        );
    }

    // 5. The 10 EUR gain is booked on the exchange journal
    let full_id = ledger
        .get_line(&line_ids[0])
        .await?
        .full_reconcile_id
        .ok_or("items were not fully reconciled")?;
    if let Some(full) = storage.get_full_reconcile(&full_id).await? {
        println!("\n📒 Full reconcile {}:", full.name);
        if let Some(exchange_id) = full.exchange_move_id {
            let exchange = ledger.get_move(&exchange_id).await?;
            println!("  Exchange entry {}", exchange.name.as_deref().unwrap_or("/"));
            for line in ledger.get_lines(&exchange_id).await? {
                println!(
                    "    {:<10} debit {:>8} credit {:>8} ({} {})",
                    line.account_id,
                    line.debit,
                    line.credit,
                    line.amount_currency,
                    line.currency_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    let report = ledger.validate_integrity("acme").await?;
    println!(
        "\n✅ Integrity: {} ({} entries checked)",
        if report.is_valid { "valid" } else { "issues found" },
        report.moves_checked
    );

    Ok(())
}
