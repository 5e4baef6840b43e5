/// payment and void - overdue bills, advance consumption and a partial reversal
use condo_billing_rs::{
    AllocationStrategy, BillRequest, BillingLedger, BillingPeriod, InMemoryStore, Money,
    PaymentIntent, RateSchedule, SafeTimeProvider, TimeSource, Unit, UnitType, Uuid,
};
use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== payment and void ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();

    let ledger = BillingLedger::new(InMemoryStore::new(), RateSchedule::standard())?;
    let unit = Unit::new(Uuid::new_v4(), "T2-1203", dec!(28), dec!(12.5), UnitType::Residential)?;
    let unit_id = ledger.register_unit(unit)?;

    // march and april bills, dues and parking only
    for month in 3..=4 {
        let period = BillingPeriod::new(2024, month)?;
        ledger.generate_bill(&BillRequest::new(unit_id, period), &time)?;
    }

    // past the march due date
    controller.advance(Duration::days(20));
    let swept = ledger.sweep_overdue(unit_id, &time)?;
    println!("{} bill(s) overdue on {}", swept.len(), time.now().format("%Y-%m-%d"));

    // newest first, with the surplus parked as advance dues
    let payment_id = Uuid::new_v4();
    let intent = PaymentIntent::new(unit_id, time.now().date_naive(), Money::from_major(5000))
        .payment_id(payment_id)
        .strategy(AllocationStrategy::NewestFirst);
    let result = ledger.apply_payment(&intent, &time)?;
    for bp in &result.bill_payments {
        println!("  bill {} received ₱{}", bp.bill_id, bp.amount);
    }
    println!("advance created: ₱{}", result.advance_created);

    // re-submitting the same payment changes nothing
    let replay = ledger.apply_payment(&intent, &time)?;
    assert_eq!(replay, result);

    // may's bill draws the advance
    let may = ledger.generate_bill(&BillRequest::new(unit_id, BillingPeriod::new(2024, 5)?), &time)?;
    println!("\nmay bill: advance applied ₱{}, total ₱{}", may.advance_applied(), may.total_amount());

    // voiding now cannot recover the advance already spent
    let report = ledger.void_payment(unit_id, payment_id, &time)?;
    println!("\nvoid partial: {}, shortfall ₱{}", report.is_partial(), report.total_shortfall());
    println!("{}", report.to_json_pretty()?);

    for bill in ledger.bills(unit_id)? {
        println!("{}  {:?}  balance ₱{}", bill.period(), bill.status(), bill.balance());
    }
    println!("\n{} events recorded", ledger.take_events().len());

    ledger.verify_unit(unit_id)?;
    Ok(())
}
