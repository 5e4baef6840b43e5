use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::assembler::{BillAssembler, BillInputs, BillingAdjustment};
use crate::bill::{Bill, ComponentAmounts};
use crate::config::RateSchedule;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::events::{BillingEvent, EventStore};
use crate::lifecycle::BillLifecycle;
use crate::payments::{
    AllocationResult, Payment, PaymentAllocator, PaymentIntent, ReversalReport, UnitAdvanceBalance,
    VoidReversal,
};
use crate::repository::{BillRepository, BillingStore, PaymentRepository, UnitTransaction};
use crate::types::{
    AdvanceTarget, BillId, BillStatus, BillingPeriod, MeterReading, PaymentId, TenantId, Unit, UnitId,
};

/// what to bill one unit for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRequest {
    pub unit_id: UnitId,
    pub period: BillingPeriod,
    pub electric: Option<MeterReading>,
    pub water: Option<MeterReading>,
    pub adjustments: Vec<BillingAdjustment>,
}

impl BillRequest {
    pub fn new(unit_id: UnitId, period: BillingPeriod) -> Self {
        Self {
            unit_id,
            period,
            electric: None,
            water: None,
            adjustments: Vec::new(),
        }
    }

    pub fn electric(mut self, reading: MeterReading) -> Self {
        self.electric = Some(reading);
        self
    }

    pub fn water(mut self, reading: MeterReading) -> Self {
        self.water = Some(reading);
        self
    }

    pub fn adjustment(mut self, adjustment: BillingAdjustment) -> Self {
        self.adjustments.push(adjustment);
        self
    }
}

/// result of billing one unit in a batch run
#[derive(Debug)]
pub struct UnitBillingOutcome {
    pub unit_id: UnitId,
    pub label: String,
    pub result: Result<Bill>,
}

/// a tenant's monthly billing run
#[derive(Debug)]
pub struct BillingRun {
    pub tenant_id: TenantId,
    pub period: BillingPeriod,
    pub outcomes: Vec<UnitBillingOutcome>,
}

impl BillingRun {
    pub fn generated(&self) -> impl Iterator<Item = &Bill> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&UnitBillingOutcome, &BillingError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o, e)))
    }

    pub fn total_billed(&self) -> Money {
        self.generated().map(|b| b.total_amount()).sum()
    }
}

/// the billing service: every operation is one atomic unit transaction
pub struct BillingLedger<S: BillingStore> {
    store: S,
    schedule: RateSchedule,
    events: Mutex<EventStore>,
}

impl<S: BillingStore> BillingLedger<S> {
    pub fn new(store: S, schedule: RateSchedule) -> Result<Self> {
        schedule.validate()?;
        Ok(Self {
            store,
            schedule,
            events: Mutex::new(EventStore::new()),
        })
    }

    pub fn schedule(&self) -> &RateSchedule {
        &self.schedule
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn register_unit(&self, unit: Unit) -> Result<UnitId> {
        let unit_id = unit.id;
        self.store.register_unit(unit)?;
        Ok(unit_id)
    }

    /// assemble, issue and store the regular bill for a period
    pub fn generate_bill(&self, request: &BillRequest, time: &SafeTimeProvider) -> Result<Bill> {
        let now = time.now();
        let assembler = BillAssembler::new(&self.schedule)?;

        let (bill, events) = self.store.transaction(request.unit_id, |tx| {
            if tx.bill_for_period(request.period).is_some() {
                return Err(BillingError::DuplicateBill {
                    unit_id: request.unit_id,
                    period: request.period,
                });
            }

            let unit = tx.unit().clone();
            let assembled = {
                let (bills, advance) = tx.working_set();
                assembler.assemble(
                    BillInputs {
                        unit: &unit,
                        period: request.period,
                        electric: request.electric.as_ref(),
                        water: request.water.as_ref(),
                        adjustments: &request.adjustments,
                        prior_bills: &*bills,
                    },
                    advance,
                )?
            };

            let mut bill = assembled.bill;
            bill.issue()?;
            tx.insert_bill(bill.clone())?;

            let mut events = vec![BillingEvent::BillGenerated {
                bill_id: bill.id(),
                unit_id: unit.id,
                period: bill.period(),
                bill_type: bill.bill_type(),
                total_amount: bill.total_amount(),
                timestamp: now,
            }];
            if bill.penalty().is_positive() {
                events.push(BillingEvent::PenaltyAssessed {
                    bill_id: bill.id(),
                    unit_id: unit.id,
                    amount: bill.penalty(),
                    contributing_bills: assembled.penalty.contributions.len(),
                    timestamp: now,
                });
            }
            if assembled.advance_consumed.total().is_positive() {
                events.push(BillingEvent::AdvanceConsumed {
                    unit_id: unit.id,
                    bill_id: bill.id(),
                    amount: assembled.advance_consumed.total(),
                    timestamp: now,
                });
            }
            events.push(BillingEvent::BillStatusChanged {
                bill_id: bill.id(),
                old_status: BillStatus::Draft,
                new_status: bill.status(),
                timestamp: now,
            });

            Ok((bill, events))
        })?;

        info!(
            bill_id = %bill.id(),
            unit_id = %bill.unit_id(),
            period = %bill.period(),
            total = %bill.total_amount(),
            penalty = %bill.penalty(),
            status = ?bill.status(),
            "bill generated"
        );
        self.publish(events);
        Ok(bill)
    }

    /// record migrated debt as an issued opening-balance bill
    pub fn add_opening_balance(
        &self,
        unit_id: UnitId,
        period: BillingPeriod,
        amount: Money,
        time: &SafeTimeProvider,
    ) -> Result<Bill> {
        let now = time.now();
        let due_date = period.due_date(self.schedule.due_day_of_month)?;
        let bill = Bill::opening_balance(unit_id, period, amount, due_date)?;

        self.store.transaction(unit_id, |tx| tx.insert_bill(bill.clone()))?;

        info!(bill_id = %bill.id(), %unit_id, %period, amount = %bill.total_amount(), "opening balance recorded");
        self.publish(vec![BillingEvent::BillGenerated {
            bill_id: bill.id(),
            unit_id,
            period,
            bill_type: bill.bill_type(),
            total_amount: bill.total_amount(),
            timestamp: now,
        }]);
        Ok(bill)
    }

    /// replace the components of an unlocked bill
    pub fn edit_bill(
        &self,
        unit_id: UnitId,
        bill_id: BillId,
        charges: ComponentAmounts,
        discounts: Money,
        time: &SafeTimeProvider,
    ) -> Result<Bill> {
        let now = time.now();
        let (bill, events) = self.store.transaction(unit_id, |tx| {
            let bill = tx.find_bill_mut(bill_id)?;
            let old_total = bill.total_amount();
            let old_status = bill.status();
            bill.edit_components(charges, discounts)?;

            let mut events = vec![BillingEvent::BillAdjusted {
                bill_id,
                old_total,
                new_total: bill.total_amount(),
                timestamp: now,
            }];
            if bill.status() != old_status {
                events.push(BillingEvent::BillStatusChanged {
                    bill_id,
                    old_status,
                    new_status: bill.status(),
                    timestamp: now,
                });
            }
            Ok((bill.clone(), events))
        })?;

        info!(%bill_id, %unit_id, total = %bill.total_amount(), "bill components edited");
        self.publish(events);
        Ok(bill)
    }

    /// freeze a bill once its statement has gone out
    pub fn lock_bill(&self, unit_id: UnitId, bill_id: BillId, time: &SafeTimeProvider) -> Result<()> {
        let now = time.now();
        self.store
            .transaction(unit_id, |tx| tx.find_bill_mut(bill_id)?.lock())?;

        info!(%bill_id, %unit_id, "bill locked");
        self.publish(vec![BillingEvent::BillLocked {
            bill_id,
            timestamp: now,
        }]);
        Ok(())
    }

    /// record a payment and allocate it
    ///
    /// An intent carrying the id of a payment that was already applied gets
    /// the stored allocation back and changes nothing. Payment ids are unique
    /// across units, and a replay must match the recorded payment.
    pub fn apply_payment(&self, intent: &PaymentIntent, time: &SafeTimeProvider) -> Result<AllocationResult> {
        let now = time.now();

        if let Some(id) = intent.payment_id {
            if let Some(owner) = self.store.payment_owner(id).filter(|owner| *owner != intent.unit_id) {
                return Err(BillingError::PaymentIdConflict {
                    id,
                    message: format!("already recorded for unit {}", owner),
                });
            }
        }

        let (result, events) = self.store.transaction(intent.unit_id, |tx| {
            if let Some(id) = intent.payment_id {
                if let Some(existing) = tx.payment(id) {
                    if !existing.is_confirmed() {
                        return Err(BillingError::PaymentNotConfirmed {
                            id,
                            status: existing.status,
                        });
                    }
                    existing.check_replay(intent)?;
                    let stored = tx.allocation(id).cloned().ok_or_else(|| BillingError::InconsistentState {
                        message: format!("payment {} has no stored allocation", id),
                    })?;
                    return Ok((stored, Vec::new()));
                }
            }

            let payment = Payment::from_intent(intent, now)?;
            let result = {
                let (bills, advance) = tx.working_set();
                PaymentAllocator::allocate(&payment, &intent.strategy, bills, advance, now)?
            };

            let events = payment_events(&payment, &result, now);
            tx.insert_payment(payment, result.clone())?;
            Ok((result, events))
        })?;

        if events.is_empty() {
            info!(payment_id = %result.payment_id, unit_id = %intent.unit_id, "payment already applied; returning stored allocation");
        } else {
            info!(
                payment_id = %result.payment_id,
                unit_id = %intent.unit_id,
                applied = %result.total_applied(),
                advance_created = %result.advance_created,
                bills = result.bill_payments.len(),
                "payment applied"
            );
        }
        self.publish(events);
        Ok(result)
    }

    /// cancel a confirmed payment and undo its effects
    pub fn void_payment(
        &self,
        unit_id: UnitId,
        payment_id: PaymentId,
        time: &SafeTimeProvider,
    ) -> Result<ReversalReport> {
        let now = time.now();

        let (report, events) = self.store.transaction(unit_id, |tx| {
            let mut payment = tx.find_payment(payment_id)?.clone();
            let bill_payments = tx.bill_payments_of(payment_id);
            let report = {
                let (bills, advance) = tx.working_set();
                VoidReversal::reverse(&mut payment, &bill_payments, bills, advance, now)?
            };

            let mut events = vec![BillingEvent::PaymentVoided {
                payment_id,
                unit_id,
                amount: payment.amount,
                timestamp: now,
            }];
            for restored in &report.restored {
                if restored.status_before != restored.status_after {
                    events.push(BillingEvent::BillStatusChanged {
                        bill_id: restored.bill_id,
                        old_status: restored.status_before,
                        new_status: restored.status_after,
                        timestamp: now,
                    });
                }
            }
            for clawback in report.clawbacks.iter().filter(|c| c.shortfall.is_positive()) {
                events.push(BillingEvent::AdvanceClawbackShortfall {
                    unit_id,
                    payment_id,
                    bucket: clawback.bucket,
                    shortfall: clawback.shortfall,
                    timestamp: now,
                });
            }

            tx.update_payment(payment)?;
            Ok((report, events))
        })?;

        if report.is_partial() {
            warn!(
                %payment_id,
                %unit_id,
                shortfall = %report.total_shortfall(),
                "payment voided with advance shortfall"
            );
        } else {
            info!(%payment_id, %unit_id, bills = report.restored.len(), "payment voided");
        }
        self.publish(events);
        Ok(report)
    }

    /// mark a unit's bills past their due date as overdue
    pub fn sweep_overdue(&self, unit_id: UnitId, time: &SafeTimeProvider) -> Result<Vec<BillId>> {
        let now = time.now();
        let today = now.date_naive();

        let (swept, events) = self.store.transaction(unit_id, |tx| {
            let before: HashMap<BillId, BillStatus> = tx.bills().iter().map(|b| (b.id(), b.status())).collect();
            let (bills, _) = tx.working_set();
            let swept = BillLifecycle::sweep_overdue(bills.iter_mut(), today);

            let events = swept
                .iter()
                .filter_map(|id| {
                    let old_status = *before.get(id)?;
                    Some(BillingEvent::BillStatusChanged {
                        bill_id: *id,
                        old_status,
                        new_status: BillStatus::Overdue,
                        timestamp: now,
                    })
                })
                .collect::<Vec<_>>();
            Ok((swept, events))
        })?;

        if !swept.is_empty() {
            info!(%unit_id, %today, count = swept.len(), "overdue sweep");
        }
        self.publish(events);
        Ok(swept)
    }

    /// overdue sweep over every unit of a tenant; one unit failing does not stop the rest
    pub fn sweep_tenant_overdue(
        &self,
        tenant_id: TenantId,
        time: &SafeTimeProvider,
    ) -> Vec<(UnitId, Result<Vec<BillId>>)> {
        self.store
            .units_of_tenant(tenant_id)
            .into_iter()
            .map(|unit| {
                let result = self.sweep_overdue(unit.id, time);
                if let Err(e) = &result {
                    error!(unit_id = %unit.id, error = %e, "overdue sweep failed");
                }
                (unit.id, result)
            })
            .collect()
    }

    /// check every stored invariant of a unit's records
    ///
    /// Violations are reported, never repaired.
    pub fn verify_unit(&self, unit_id: UnitId) -> Result<()> {
        let records = self.store.snapshot(unit_id)?;

        let outcome = check_records(&records, unit_id);

        if let Err(e) = &outcome {
            error!(%unit_id, error = %e, "unit failed verification");
        }
        outcome
    }

    /// generate one period's bills for every unit of a tenant
    ///
    /// Each unit is billed in its own transaction. Units without a request
    /// are billed for area-based charges only.
    pub fn run_billing(
        &self,
        tenant_id: TenantId,
        period: BillingPeriod,
        requests: &[BillRequest],
        time: &SafeTimeProvider,
    ) -> BillingRun {
        let units = self.store.units_of_tenant(tenant_id);
        let mut outcomes = Vec::with_capacity(units.len());

        for unit in &units {
            let request = requests
                .iter()
                .find(|r| r.unit_id == unit.id)
                .cloned()
                .unwrap_or_else(|| BillRequest::new(unit.id, period));

            let result = if request.period != period {
                Err(BillingError::InvalidPeriod {
                    message: format!("request for {} in the {} run", request.period, period),
                })
            } else {
                self.generate_bill(&request, time)
            };

            if let Err(e) = &result {
                error!(unit_id = %unit.id, label = %unit.label, %period, error = %e, "unit billing failed");
            }
            outcomes.push(UnitBillingOutcome {
                unit_id: unit.id,
                label: unit.label.clone(),
                result,
            });
        }

        for stray in requests.iter().filter(|r| !units.iter().any(|u| u.id == r.unit_id)) {
            error!(unit_id = %stray.unit_id, %tenant_id, "billing request for a unit outside the tenant");
            outcomes.push(UnitBillingOutcome {
                unit_id: stray.unit_id,
                label: String::new(),
                result: Err(BillingError::UnitNotFound { id: stray.unit_id }),
            });
        }

        let run = BillingRun {
            tenant_id,
            period,
            outcomes,
        };
        info!(
            %tenant_id,
            %period,
            generated = run.generated().count(),
            failed = run.failures().count(),
            total = %run.total_billed(),
            "billing run finished"
        );
        run
    }

    pub fn bills(&self, unit_id: UnitId) -> Result<Vec<Bill>> {
        Ok(self.store.snapshot(unit_id)?.bills().to_vec())
    }

    pub fn bill(&self, unit_id: UnitId, bill_id: BillId) -> Result<Bill> {
        Ok(self.store.snapshot(unit_id)?.find_bill(bill_id)?.clone())
    }

    pub fn payment(&self, unit_id: UnitId, payment_id: PaymentId) -> Result<Payment> {
        Ok(self.store.snapshot(unit_id)?.find_payment(payment_id)?.clone())
    }

    pub fn advance_balance(&self, unit_id: UnitId) -> Result<UnitAdvanceBalance> {
        Ok(self.store.snapshot(unit_id)?.advance().clone())
    }

    pub fn take_events(&self) -> Vec<BillingEvent> {
        self.event_store().take_events()
    }

    fn publish(&self, events: Vec<BillingEvent>) {
        if !events.is_empty() {
            self.event_store().extend(events);
        }
    }

    fn event_store(&self) -> MutexGuard<'_, EventStore> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn check_records<T: UnitTransaction>(records: &T, unit_id: UnitId) -> Result<()> {
    for bill in records.bills() {
        bill.check_invariants()?;
        let active: Money = records
            .active_bill_payments(bill.id())
            .iter()
            .map(|bp| bp.amount)
            .sum();
        if active != bill.paid_amount() {
            return Err(BillingError::InconsistentState {
                message: format!(
                    "bill {} paid amount {} differs from its bill payments {}",
                    bill.id(),
                    bill.paid_amount(),
                    active
                ),
            });
        }
    }
    let advance = records.advance();
    if advance.advance_dues.is_negative() || advance.advance_utilities.is_negative() {
        return Err(BillingError::InconsistentState {
            message: format!("unit {} has a negative advance balance", unit_id),
        });
    }
    Ok(())
}

fn payment_events(payment: &Payment, result: &AllocationResult, now: DateTime<Utc>) -> Vec<BillingEvent> {
    let mut events = vec![BillingEvent::PaymentApplied {
        payment_id: payment.id,
        unit_id: payment.unit_id,
        amount: payment.amount,
        bills_touched: result.bill_payments.len(),
        timestamp: now,
    }];

    events.extend(result.status_changes.iter().map(|change| BillingEvent::BillStatusChanged {
        bill_id: change.bill_id,
        old_status: change.from,
        new_status: change.to,
        timestamp: now,
    }));

    let mut dues = payment.advance_dues;
    let mut utilities = payment.advance_utilities;
    match payment.advance_target {
        AdvanceTarget::Dues => dues += result.advance_created,
        AdvanceTarget::Utilities => utilities += result.advance_created,
    }
    for (bucket, amount) in [(AdvanceTarget::Dues, dues), (AdvanceTarget::Utilities, utilities)] {
        if amount.is_positive() {
            events.push(BillingEvent::AdvanceCredited {
                unit_id: payment.unit_id,
                bucket,
                amount,
                timestamp: now,
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::Component;
    use crate::errors::ErrorKind;
    use crate::payments::{AllocationStrategy, ManualAllocation};
    use crate::repository::InMemoryStore;
    use crate::types::{PaymentStatus, UnitType, UtilityType};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;
    use std::thread;
    use uuid::Uuid;

    struct Fixture {
        ledger: BillingLedger<InMemoryStore>,
        tenant_id: TenantId,
        unit_id: UnitId,
        time: SafeTimeProvider,
    }

    fn fixture() -> Fixture {
        let ledger = BillingLedger::new(InMemoryStore::new(), RateSchedule::standard()).unwrap();
        let tenant_id = Uuid::new_v4();
        let unit = Unit::new(tenant_id, "T1-0507", dec!(34.5), dec!(0), UnitType::Residential).unwrap();
        let unit_id = ledger.register_unit(unit).unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
        Fixture {
            ledger,
            tenant_id,
            unit_id,
            time,
        }
    }

    fn period(month: u32) -> BillingPeriod {
        BillingPeriod::new(2024, month).unwrap()
    }

    fn may_request(unit_id: UnitId) -> BillRequest {
        let may = period(5);
        BillRequest::new(unit_id, may)
            .electric(MeterReading::new(unit_id, may, UtilityType::Electric, dec!(4000), dec!(4115)).unwrap())
            .water(MeterReading::new(unit_id, may, UtilityType::Water, dec!(310), dec!(312)).unwrap())
    }

    fn pay(f: &Fixture, amount: Money) -> PaymentIntent {
        PaymentIntent::new(f.unit_id, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(), amount)
    }

    #[test]
    fn test_generate_bill_end_to_end() {
        let f = fixture();
        let bill = f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        assert_eq!(bill.total_amount(), Money::from(dec!(3234.85)));
        assert_eq!(bill.status(), BillStatus::Unpaid);

        let duplicate = f.ledger.generate_bill(&may_request(f.unit_id), &f.time);
        assert!(matches!(duplicate, Err(BillingError::DuplicateBill { .. })));
        assert_eq!(f.ledger.bills(f.unit_id).unwrap().len(), 1);

        let events = f.ledger.take_events();
        assert!(events.iter().any(|e| matches!(e, BillingEvent::BillGenerated { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            BillingEvent::BillStatusChanged { new_status: BillStatus::Unpaid, .. }
        )));
        assert!(f.ledger.verify_unit(f.unit_id).is_ok());
    }

    #[test]
    fn test_penalty_builds_up_across_generated_bills() {
        let f = fixture();
        for month in 3..=5 {
            let bill = f.ledger.generate_bill(&BillRequest::new(f.unit_id, period(month)), &f.time).unwrap();
            assert_eq!(bill.penalty(), Money::ZERO);
        }

        let june = f.ledger.generate_bill(&BillRequest::new(f.unit_id, period(6)), &f.time).unwrap();
        assert_eq!(june.penalty(), Money::from_major(207));
        assert_eq!(june.total_amount(), Money::from_major(2277));

        let events = f.ledger.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            BillingEvent::PenaltyAssessed { contributing_bills: 1, .. }
        )));
    }

    #[test]
    fn test_opening_balance_is_never_penalised() {
        let f = fixture();
        f.ledger
            .add_opening_balance(f.unit_id, period(1), Money::from_major(15_000), &f.time)
            .unwrap();

        let june = f.ledger.generate_bill(&BillRequest::new(f.unit_id, period(6)), &f.time).unwrap();
        assert_eq!(june.penalty(), Money::ZERO);
        assert_eq!(f.ledger.bills(f.unit_id).unwrap().len(), 2);
    }

    #[test]
    fn test_reapplying_a_payment_is_idempotent() {
        let f = fixture();
        f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        let payment_id = Uuid::new_v4();
        let intent = pay(&f, Money::from_major(1000)).payment_id(payment_id);
        let first = f.ledger.apply_payment(&intent, &f.time).unwrap();
        f.ledger.take_events();

        let second = f.ledger.apply_payment(&intent, &f.time).unwrap();
        assert_eq!(first, second);
        assert!(f.ledger.take_events().is_empty());

        let bill = &f.ledger.bills(f.unit_id).unwrap()[0];
        assert_eq!(bill.paid_amount(), Money::from_major(1000));
        assert_eq!(bill.status(), BillStatus::Partial);
        assert!(f.ledger.verify_unit(f.unit_id).is_ok());
    }

    #[test]
    fn test_reused_payment_id_with_different_terms_is_rejected() {
        let f = fixture();
        f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        let payment_id = Uuid::new_v4();
        f.ledger
            .apply_payment(&pay(&f, Money::from_major(100)).payment_id(payment_id), &f.time)
            .unwrap();
        f.ledger.take_events();

        let larger = pay(&f, Money::from_major(9_999)).payment_id(payment_id);
        let err = f.ledger.apply_payment(&larger, &f.time).unwrap_err();
        assert!(matches!(err, BillingError::PaymentIdConflict { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let newest = pay(&f, Money::from_major(100))
            .payment_id(payment_id)
            .strategy(AllocationStrategy::NewestFirst);
        assert!(matches!(
            f.ledger.apply_payment(&newest, &f.time),
            Err(BillingError::PaymentIdConflict { .. })
        ));

        // centavo rounding alone is not a difference
        let same = pay(&f, Money::from(dec!(100.001))).payment_id(payment_id);
        assert_eq!(f.ledger.apply_payment(&same, &f.time).unwrap().total_applied(), Money::from_major(100));

        assert!(f.ledger.take_events().is_empty());
        assert_eq!(f.ledger.bills(f.unit_id).unwrap()[0].paid_amount(), Money::from_major(100));
    }

    #[test]
    fn test_payment_id_cannot_be_reused_on_another_unit() {
        let f = fixture();
        let neighbour = Unit::new(f.tenant_id, "T1-0508", dec!(40), dec!(0), UnitType::Residential).unwrap();
        let neighbour_id = f.ledger.register_unit(neighbour).unwrap();

        let payment_id = Uuid::new_v4();
        f.ledger
            .apply_payment(&pay(&f, Money::from_major(100)).payment_id(payment_id), &f.time)
            .unwrap();

        let paid_on = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let elsewhere = PaymentIntent::new(neighbour_id, paid_on, Money::from_major(100)).payment_id(payment_id);
        let err = f.ledger.apply_payment(&elsewhere, &f.time).unwrap_err();
        assert!(matches!(err, BillingError::PaymentIdConflict { .. }));

        assert!(f.ledger.payment(neighbour_id, payment_id).is_err());
        assert_eq!(f.ledger.advance_balance(neighbour_id).unwrap().total(), Money::ZERO);
        assert_eq!(f.ledger.store().payment_owner(payment_id), Some(f.unit_id));
    }

    #[test]
    fn test_concurrent_payments_on_one_unit() {
        let f = fixture();
        let bill = f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    f.ledger.apply_payment(&pay(&f, Money::from_major(500)), &f.time).unwrap();
                });
            }
        });

        // 8 * 500 = 4000 against 3234.85
        let bill = f.ledger.bill(f.unit_id, bill.id()).unwrap();
        assert_eq!(bill.status(), BillStatus::Paid);
        assert_eq!(bill.paid_amount(), Money::from(dec!(3234.85)));
        assert_eq!(f.ledger.advance_balance(f.unit_id).unwrap().total(), Money::from(dec!(765.15)));
        assert!(f.ledger.verify_unit(f.unit_id).is_ok());
    }

    #[test]
    fn test_void_restores_and_blocks_reapplication() {
        let f = fixture();
        f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();
        let before = f.ledger.bills(f.unit_id).unwrap();

        let payment_id = Uuid::new_v4();
        let intent = pay(&f, Money::from_major(3500)).payment_id(payment_id);
        let result = f.ledger.apply_payment(&intent, &f.time).unwrap();
        assert_eq!(result.advance_created, Money::from(dec!(265.15)));

        let report = f.ledger.void_payment(f.unit_id, payment_id, &f.time).unwrap();
        assert!(!report.is_partial());
        assert_eq!(f.ledger.bills(f.unit_id).unwrap(), before);
        assert_eq!(f.ledger.advance_balance(f.unit_id).unwrap().total(), Money::ZERO);
        assert_eq!(
            f.ledger.payment(f.unit_id, payment_id).unwrap().status,
            PaymentStatus::Cancelled
        );
        assert!(f.ledger.verify_unit(f.unit_id).is_ok());

        let again = f.ledger.apply_payment(&intent, &f.time);
        assert!(matches!(again, Err(BillingError::PaymentNotConfirmed { .. })));
        let revoid = f.ledger.void_payment(f.unit_id, payment_id, &f.time);
        assert!(matches!(revoid, Err(BillingError::PaymentNotConfirmed { .. })));
    }

    #[test]
    fn test_overdue_survives_payment_and_void() {
        let f = fixture();
        let bill = f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        // due 2024-06-15; nothing to sweep on the 1st
        assert!(f.ledger.sweep_overdue(f.unit_id, &f.time).unwrap().is_empty());

        f.time.test_control().unwrap().advance(Duration::days(20));
        let swept = f.ledger.sweep_overdue(f.unit_id, &f.time).unwrap();
        assert_eq!(swept, vec![bill.id()]);
        assert_eq!(f.ledger.bill(f.unit_id, bill.id()).unwrap().status(), BillStatus::Overdue);

        let payment_id = Uuid::new_v4();
        f.ledger
            .apply_payment(&pay(&f, Money::from_major(500)).payment_id(payment_id), &f.time)
            .unwrap();
        assert_eq!(f.ledger.bill(f.unit_id, bill.id()).unwrap().status(), BillStatus::Overdue);

        f.ledger.void_payment(f.unit_id, payment_id, &f.time).unwrap();
        assert_eq!(f.ledger.bill(f.unit_id, bill.id()).unwrap().status(), BillStatus::Overdue);
    }

    #[test]
    fn test_tenant_sweep_covers_only_that_tenant() {
        let f = fixture();
        let neighbour = Unit::new(f.tenant_id, "T1-0508", dec!(40), dec!(0), UnitType::Residential).unwrap();
        let neighbour_id = f.ledger.register_unit(neighbour).unwrap();
        let outsider = Unit::new(Uuid::new_v4(), "T2-0101", dec!(30), dec!(0), UnitType::Residential).unwrap();
        let outsider_id = f.ledger.register_unit(outsider).unwrap();

        let may = f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();
        let paid = f.ledger.generate_bill(&BillRequest::new(neighbour_id, period(5)), &f.time).unwrap();
        let paid_on = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        f.ledger
            .apply_payment(&PaymentIntent::new(neighbour_id, paid_on, paid.total_amount()), &f.time)
            .unwrap();
        let foreign = f.ledger.generate_bill(&BillRequest::new(outsider_id, period(5)), &f.time).unwrap();

        f.time.test_control().unwrap().advance(Duration::days(20));
        let results = f.ledger.sweep_tenant_overdue(f.tenant_id, &f.time);

        assert_eq!(results.len(), 2);
        let swept: HashMap<UnitId, Vec<BillId>> =
            results.into_iter().map(|(unit_id, result)| (unit_id, result.unwrap())).collect();
        assert_eq!(swept[&f.unit_id], vec![may.id()]);
        assert!(swept[&neighbour_id].is_empty());
        assert!(!swept.contains_key(&outsider_id));

        assert_eq!(f.ledger.bill(f.unit_id, may.id()).unwrap().status(), BillStatus::Overdue);
        assert_eq!(f.ledger.bill(neighbour_id, paid.id()).unwrap().status(), BillStatus::Paid);
        assert_eq!(f.ledger.bill(outsider_id, foreign.id()).unwrap().status(), BillStatus::Unpaid);
    }

    #[test]
    fn test_spent_advance_makes_void_partial() {
        let f = fixture();
        f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        let payment_id = Uuid::new_v4();
        f.ledger
            .apply_payment(&pay(&f, Money::from_major(4000)).payment_id(payment_id), &f.time)
            .unwrap();
        assert_eq!(
            f.ledger.advance_balance(f.unit_id).unwrap().advance_dues,
            Money::from(dec!(765.15))
        );

        let june = f.ledger.generate_bill(&BillRequest::new(f.unit_id, period(6)), &f.time).unwrap();
        assert_eq!(june.advance_applied(), Money::from(dec!(765.15)));
        assert_eq!(june.total_amount(), Money::from(dec!(1304.85)));
        f.ledger.take_events();

        let report = f.ledger.void_payment(f.unit_id, payment_id, &f.time).unwrap();
        assert!(report.is_partial());
        assert_eq!(report.total_shortfall(), Money::from(dec!(765.15)));

        let events = f.ledger.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            BillingEvent::AdvanceClawbackShortfall { bucket: AdvanceTarget::Dues, .. }
        )));
        assert!(f.ledger.verify_unit(f.unit_id).is_ok());
    }

    #[test]
    fn test_rejected_manual_allocation_changes_nothing() {
        let f = fixture();
        let bill = f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();
        let before = f.ledger.bills(f.unit_id).unwrap();

        let lines = vec![ManualAllocation {
            bill_id: bill.id(),
            components: ComponentAmounts::default().with(Component::Water, Money::from_major(300)),
        }];
        let intent = pay(&f, Money::from_major(300)).strategy(AllocationStrategy::Manual(lines));
        let err = f.ledger.apply_payment(&intent, &f.time).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(f.ledger.bills(f.unit_id).unwrap(), before);
        assert_eq!(f.ledger.advance_balance(f.unit_id).unwrap().total(), Money::ZERO);
    }

    #[test]
    fn test_locked_bill_rejects_edit() {
        let f = fixture();
        let bill = f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        let lower = bill.charges().with(Component::Water, Money::from_major(80));
        let edited = f.ledger.edit_bill(f.unit_id, bill.id(), lower, Money::ZERO, &f.time).unwrap();
        assert_eq!(edited.total_amount(), Money::from(dec!(3114.85)));

        f.ledger.lock_bill(f.unit_id, bill.id(), &f.time).unwrap();
        let err = f
            .ledger
            .edit_bill(f.unit_id, bill.id(), *bill.charges(), Money::ZERO, &f.time)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockedBill);
    }

    #[test]
    fn test_verify_unit_reports_drift() {
        let f = fixture();
        let bill = f.ledger.generate_bill(&may_request(f.unit_id), &f.time).unwrap();

        f.ledger
            .store()
            .transaction(f.unit_id, |tx| {
                tx.find_bill_mut(bill.id())?
                    .record_payment(Money::from_major(10), &ComponentAmounts::default());
                Ok(())
            })
            .unwrap();

        let err = f.ledger.verify_unit(f.unit_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
    }

    #[test]
    fn test_billing_run_isolates_failing_units() {
        let f = fixture();
        let second = Unit::new(f.tenant_id, "T1-0508", dec!(40), dec!(12.5), UnitType::Residential).unwrap();
        let third = Unit::new(f.tenant_id, "T1-0509", dec!(50), dec!(0), UnitType::Commercial).unwrap();
        let second_id = f.ledger.register_unit(second).unwrap();
        let third_id = f.ledger.register_unit(third).unwrap();

        // third unit gets a reading that belongs to the first unit
        let may = period(5);
        let stray_reading = MeterReading::new(f.unit_id, may, UtilityType::Water, dec!(0), dec!(4)).unwrap();
        let requests = vec![
            may_request(f.unit_id),
            BillRequest::new(third_id, may).water(stray_reading),
            BillRequest::new(Uuid::new_v4(), may),
        ];

        let run = f.ledger.run_billing(f.tenant_id, may, &requests, &f.time);

        assert_eq!(run.outcomes.len(), 4);
        assert_eq!(run.generated().count(), 2);
        assert_eq!(run.failures().count(), 2);
        // 3234.85 + (40 * 60 + 12.5 * 50)
        assert_eq!(run.total_billed(), Money::from(dec!(6259.85)));

        assert_eq!(f.ledger.bills(second_id).unwrap().len(), 1);
        assert!(f.ledger.bills(third_id).unwrap().is_empty());
        assert!(run
            .failures()
            .any(|(o, e)| o.unit_id == third_id && matches!(e, BillingError::ReadingMismatch { .. })));
    }
}
