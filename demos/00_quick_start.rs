/// quick start - bill one unit for one month and pay it
use condo_billing_rs::{
    BillRequest, BillingLedger, InMemoryStore, MeterReading, Money, PaymentIntent, RateSchedule,
    SafeTimeProvider, TimeSource, Unit, UnitType, UtilityType,
};
use condo_billing_rs::{BillingPeriod, Uuid};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .init();

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
    let ledger = BillingLedger::new(InMemoryStore::new(), RateSchedule::standard())?;

    // a 34.5 m² residential unit without parking
    let unit = Unit::new(Uuid::new_v4(), "T1-0507", dec!(34.5), dec!(0), UnitType::Residential)?;
    let unit_id = ledger.register_unit(unit)?;

    let may = BillingPeriod::new(2024, 5)?;
    let request = BillRequest::new(unit_id, may)
        .electric(MeterReading::new(unit_id, may, UtilityType::Electric, dec!(4000), dec!(4115))?)
        .water(MeterReading::new(unit_id, may, UtilityType::Water, dec!(310), dec!(312))?);

    let bill = ledger.generate_bill(&request, &time)?;
    println!("bill for {}: ₱{} due {}", bill.period(), bill.total_amount(), bill.due_date());
    for (component, amount) in bill.charges().entries() {
        println!("  {:<14} ₱{}", component.name(), amount);
    }

    // pay slightly more than the bill; the rest becomes advance dues
    let intent = PaymentIntent::new(unit_id, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(), Money::from_major(3500))
        .reference("OR-1001");
    let result = ledger.apply_payment(&intent, &time)?;
    println!("\napplied ₱{}, advance created ₱{}", result.total_applied(), result.advance_created);

    let bill = ledger.bill(unit_id, bill.id())?;
    println!("bill status: {:?}, balance ₱{}", bill.status(), bill.balance());

    ledger.verify_unit(unit_id)?;
    Ok(())
}
