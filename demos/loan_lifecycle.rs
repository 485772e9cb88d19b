/// loan lifecycle - application through payoff with controlled time
use chrono::{Duration, TimeZone, Utc};
use loan_ledger_rs::{
    EventStore, InMemoryStore, LedgerConfig, LoanEngine, LoanTerms, Money, PaymentMethod, Rate,
    SafeTimeProvider, TimeSource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOAN_LEDGER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== loan lifecycle example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let engine = LoanEngine::new(InMemoryStore::new(), EventStore::new(), LedgerConfig::default())?;
    let admin = "admin-1".to_string();
    let borrower = "borrower-42".to_string();

    // origination
    let terms = LoanTerms::monthly_emi(Money::from_major(100_000), Rate::from_percentage(12), 12);
    let loan = engine.submit_application(borrower.clone(), terms, &time)?;
    engine.request_additional_info(loan.id, "please upload the last three payslips", &time)?;
    engine.resubmit_application(loan.id, &time)?;
    engine.approve_application(loan.id, Money::from_major(100_000), &admin, &time)?;
    let loan = engine
        .disburse(loan.id, Money::from_major(100_000), PaymentMethod::BankTransfer, &admin, &time)?
        .loan;

    println!("schedule:");
    for entry in &loan.schedule {
        println!(
            "  #{:>2} {}  payment {:>9}  interest {:>8}  principal {:>9}  balance {:>10}",
            entry.period,
            entry.due_date.format("%Y-%m-%d"),
            entry.payment_amount,
            entry.interest_component,
            entry.principal_component,
            entry.ending_balance,
        );
    }

    // first installment on time
    let first = loan.schedule[0].clone();
    controller.advance(first.due_date - time.now());
    engine.record_payment(loan.id, first.payment_amount, time.now(), PaymentMethod::BankTransfer, &admin, &time)?;
    println!("\npaid installment 1 on {}", time.now().format("%Y-%m-%d"));

    // second installment is missed; the nightly scan notices
    let second = loan.schedule[1].clone();
    controller.advance(second.due_date + Duration::days(10) - time.now());
    let report = engine.run_overdue_scan(&time);
    println!(
        "scan on {}: {} overdue, {} alerts",
        time.now().format("%Y-%m-%d"),
        report.marked_overdue,
        report.reminders_sent
    );

    // borrower uploads proof, admin verifies it
    let summary = engine.summary(loan.id, &time)?;
    let owed = summary.next_payment_amount.unwrap_or(Money::ZERO) + summary.assessed_penalty;
    let claim = engine.submit_payment_proof(
        loan.id,
        owed,
        time.now(),
        PaymentMethod::MobileWallet,
        Some("receipts/2024-03-11.png".to_string()),
        &borrower,
        &time,
    )?;
    let outcome = engine.verify_transaction(claim.id, true, None, &admin, &time)?;
    println!(
        "late payment {} verified: penalty {}, interest {}, principal {}",
        owed,
        outcome.transaction.penalty_applied,
        outcome.transaction.interest_applied,
        outcome.transaction.principal_applied
    );

    // settle the rest early; scheduled interest is still owed
    let remaining = engine.loan(loan.id)?.payoff_amount();
    engine.record_payment(loan.id, remaining, time.now(), PaymentMethod::BankTransfer, &admin, &time)?;

    let summary = engine.summary(loan.id, &time)?;
    println!("\nfinal state:\n{}", summary.to_json_pretty()?);

    println!("\nnotifications sent:");
    for notification in engine.notifier().notifications() {
        println!("  {} <- {}", notification.recipient, notification.event.kind());
    }

    Ok(())
}
