/// billing run - a tenant's monthly batch with a custom rate schedule
use condo_billing_rs::{
    BillRequest, BillingAdjustment, BillingLedger, BillingPeriod, InMemoryStore, MeterReading,
    Money, RateSchedule, SafeTimeProvider, TimeSource, Unit, UnitType, UtilityType, Uuid,
};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .init();

    println!("=== billing run ===\n");

    // start from the standard schedule, round-tripped through json
    let mut schedule = RateSchedule::from_json(&RateSchedule::standard().to_json_pretty()?)?;
    schedule.due_day_of_month = 10;

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).unwrap()));
    let ledger = BillingLedger::new(InMemoryStore::new(), schedule)?;

    let tenant_id = Uuid::new_v4();
    let units = [
        Unit::new(tenant_id, "A-101", dec!(34.5), dec!(0), UnitType::Residential)?,
        Unit::new(tenant_id, "A-102", dec!(52), dec!(12.5), UnitType::Residential)?,
        Unit::new(tenant_id, "G-001", dec!(80), dec!(0), UnitType::Commercial)?,
    ];
    let ids: Vec<Uuid> = units.iter().map(|u| u.id).collect();
    for unit in units {
        ledger.register_unit(unit)?;
    }

    let june = BillingPeriod::new(2024, 6)?;
    let requests = vec![
        BillRequest::new(ids[0], june)
            .electric(MeterReading::new(ids[0], june, UtilityType::Electric, dec!(4115), dec!(4290))?)
            .water(MeterReading::new(ids[0], june, UtilityType::Water, dec!(312), dec!(318))?),
        BillRequest::new(ids[1], june)
            .water(MeterReading::new(ids[1], june, UtilityType::Water, dec!(90), dec!(114))?)
            .adjustment(BillingAdjustment::SpAssessment)
            .adjustment(BillingAdjustment::Discount {
                description: "board member".to_string(),
                amount: Money::from_major(200),
            }),
        // the commercial unit's reading was keyed to the wrong unit
        BillRequest::new(ids[2], june)
            .water(MeterReading::new(ids[1], june, UtilityType::Water, dec!(0), dec!(40))?),
    ];

    let run = ledger.run_billing(tenant_id, june, &requests, &time);
    for outcome in &run.outcomes {
        match &outcome.result {
            Ok(bill) => println!("{:<6} ₱{:>10} due {}", outcome.label, bill.total_amount(), bill.due_date()),
            Err(e) => println!("{:<6} failed ({:?}): {}", outcome.label, e.kind(), e),
        }
    }
    println!("\ntotal billed: ₱{}", run.total_billed());

    Ok(())
}
