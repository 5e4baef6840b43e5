/// penalty chain - seven unpaid months compounding at 10%
use condo_billing_rs::{
    Bill, BillingPeriod, ComponentAmounts, Money, PenaltyEngine, Rate, Uuid,
};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== penalty chain ===\n");

    let unit_id = Uuid::new_v4();
    let principal = Money::from(dec!(1717.65));

    let mut bills = Vec::new();
    let mut period = BillingPeriod::new(2024, 1)?;
    for _ in 0..7 {
        let charges = ComponentAmounts {
            dues: principal,
            ..Default::default()
        };
        let mut bill = Bill::assemble(unit_id, period, charges, Money::ZERO, Money::ZERO, period.due_date(15)?)?;
        bill.issue()?;
        bills.push(bill);
        period = period.next();
    }

    // the newest bill is two months overdue when October is billed
    let engine = PenaltyEngine::new(Rate::from_percentage(10));
    let october = BillingPeriod::new(2024, 10)?;
    let calculation = engine.calculate(&bills, october);

    for step in &calculation.contributions {
        println!(
            "{}  overdue {} months  principal ₱{}  running ₱{}",
            step.period, step.months_overdue, step.unpaid_principal, step.running_total
        );
    }
    for skipped in &calculation.skipped {
        println!("{}  skipped: {:?}", skipped.period, skipped.reason);
    }

    println!("\npenalty on the {} bill: ₱{}", october, calculation.bill_amount());
    Ok(())
}
