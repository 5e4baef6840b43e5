use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bill::Bill;
use crate::config::RateSchedule;
use crate::decimal::{Money, Rate};
use crate::types::{BillId, BillStatus, BillType, BillingPeriod};

/// a bill starts contributing once it is this many months overdue
pub const PENALTY_ELIGIBLE_MONTHS: i32 = 2;

/// why a prior bill did not contribute to the penalty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// migrated debt carries no penalty base
    OpeningBalance,
    /// never issued
    Draft,
    /// balance within a centavo of zero, or nothing billed
    Settled,
    /// same or later period than the one being billed
    NotPrior,
    /// overdue, but not yet past the grace month
    GracePeriod { months_overdue: i32 },
}

/// one eligible bill's step in the penalty chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyContribution {
    pub bill_id: BillId,
    pub period: BillingPeriod,
    pub months_overdue: i32,
    pub unpaid_principal: Money,
    /// `unpaid_principal * rate`
    pub base_penalty: Money,
    /// chain total after this bill
    pub running_total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedBill {
    pub bill_id: BillId,
    pub period: BillingPeriod,
    pub reason: SkipReason,
}

/// penalty calculation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyCalculation {
    pub period: BillingPeriod,
    pub rate: Rate,
    /// unrounded chain total
    pub penalty_amount: Money,
    pub contributions: Vec<PenaltyContribution>,
    pub skipped: Vec<SkippedBill>,
}

impl PenaltyCalculation {
    /// amount that goes onto the bill
    pub fn bill_amount(&self) -> Money {
        self.penalty_amount.round_centavo()
    }
}

/// engine for the compounding delinquency penalty
///
/// Eligible bills are walked oldest to newest. The first contributes
/// `principal * rate`; each later one adds its own `principal * rate` to the
/// running total and the sum is then compounded once more by `rate`.
pub struct PenaltyEngine {
    rate: Rate,
}

impl PenaltyEngine {
    pub fn new(rate: Rate) -> Self {
        Self { rate }
    }

    pub fn from_schedule(schedule: &RateSchedule) -> Self {
        Self::new(schedule.penalty_rate)
    }

    /// months a bill is overdue when `current` is being generated; the month
    /// right after the bill's period is its due month, not an overdue one
    pub fn months_overdue(bill_period: BillingPeriod, current: BillingPeriod) -> i32 {
        bill_period.months_until(current) - 1
    }

    /// `(total - penalty) * (balance / total)`
    pub fn unpaid_principal(bill: &Bill) -> Money {
        (bill.total_amount() - bill.penalty()).scale(bill.balance(), bill.total_amount())
    }

    /// advance the chain by one eligible bill
    pub fn accumulate(&self, running_total: Option<Money>, base_penalty: Money) -> Money {
        match running_total {
            None => base_penalty,
            Some(previous) => {
                let sum = previous + base_penalty;
                let compound = sum.apply_rate(self.rate);
                sum + compound
            }
        }
    }

    /// penalty for the bill of `current`, from the unit's prior bills in any order
    pub fn calculate(&self, prior_bills: &[Bill], current: BillingPeriod) -> PenaltyCalculation {
        let mut ordered: Vec<&Bill> = prior_bills.iter().collect();
        ordered.sort_by_key(|b| b.period());

        let mut running_total: Option<Money> = None;
        let mut contributions = Vec::new();
        let mut skipped = Vec::new();

        for bill in ordered {
            let months_overdue = Self::months_overdue(bill.period(), current);
            let reason = if bill.bill_type() == BillType::OpeningBalance {
                Some(SkipReason::OpeningBalance)
            } else if bill.status() == BillStatus::Draft {
                Some(SkipReason::Draft)
            } else if bill.period() >= current {
                Some(SkipReason::NotPrior)
            } else if bill.total_amount().is_zero() || bill.balance().is_settled() {
                Some(SkipReason::Settled)
            } else if months_overdue < PENALTY_ELIGIBLE_MONTHS {
                Some(SkipReason::GracePeriod { months_overdue })
            } else {
                None
            };

            if let Some(reason) = reason {
                skipped.push(SkippedBill {
                    bill_id: bill.id(),
                    period: bill.period(),
                    reason,
                });
                continue;
            }

            let unpaid_principal = Self::unpaid_principal(bill);
            let base_penalty = unpaid_principal.apply_rate(self.rate);
            let total = self.accumulate(running_total, base_penalty);
            running_total = Some(total);

            contributions.push(PenaltyContribution {
                bill_id: bill.id(),
                period: bill.period(),
                months_overdue,
                unpaid_principal,
                base_penalty,
                running_total: total,
            });
        }

        let penalty_amount = running_total.unwrap_or(Money::ZERO);
        debug!(
            period = %current,
            rate = %self.rate,
            contributors = contributions.len(),
            skipped = skipped.len(),
            %penalty_amount,
            "penalty chain computed"
        );

        PenaltyCalculation {
            period: current,
            rate: self.rate,
            penalty_amount,
            contributions,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::{Component, ComponentAmounts};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn period(year: i32, month: u32) -> BillingPeriod {
        BillingPeriod::new(year, month).unwrap()
    }

    fn issued_bill(unit_id: Uuid, period: BillingPeriod, dues: Money, penalty: Money) -> Bill {
        let charges = ComponentAmounts::default()
            .with(Component::Dues, dues)
            .with(Component::Penalty, penalty);
        let due = period.due_date(15).unwrap();
        let mut bill = Bill::assemble(unit_id, period, charges, Money::ZERO, Money::ZERO, due).unwrap();
        bill.issue().unwrap();
        bill
    }

    #[test]
    fn test_seven_month_chain_matches_reference_sheet() {
        let unit_id = Uuid::new_v4();
        let principal = Money::from(dec!(1717.65));
        let bills: Vec<Bill> = (1..=7)
            .map(|m| issued_bill(unit_id, period(2024, m), principal, Money::ZERO))
            .collect();

        let engine = PenaltyEngine::new(Rate::from_percentage(10));
        let result = engine.calculate(&bills, period(2024, 10));

        let expected = [
            dec!(171.765),
            dec!(377.883),
            dec!(604.6128),
            dec!(854.01558),
            dec!(1128.358638),
            dec!(1430.1360018),
            dec!(1762.09110198),
        ];
        assert_eq!(result.contributions.len(), 7);
        for (step, want) in result.contributions.iter().zip(expected) {
            let diff = (step.running_total.as_decimal() - want).abs();
            assert!(diff <= dec!(0.0001), "{} != {}", step.running_total, want);
        }
        assert_eq!(result.penalty_amount, Money::from(dec!(1762.09110198)));
        assert_eq!(result.bill_amount(), Money::from(dec!(1762.09)));
    }

    #[test]
    fn test_grace_month_contributes_nothing() {
        let unit_id = Uuid::new_v4();
        let engine = PenaltyEngine::new(Rate::from_percentage(10));

        // march bill seen from may: one month overdue
        let bills = vec![issued_bill(unit_id, period(2024, 3), Money::from_major(1000), Money::ZERO)];
        let result = engine.calculate(&bills, period(2024, 5));
        assert_eq!(result.penalty_amount, Money::ZERO);
        assert_eq!(
            result.skipped[0].reason,
            SkipReason::GracePeriod { months_overdue: 1 }
        );

        // seen from june: two months overdue, first contributor
        let result = engine.calculate(&bills, period(2024, 6));
        assert_eq!(result.penalty_amount, Money::from_major(100));
        assert_eq!(result.contributions[0].months_overdue, 2);
    }

    #[test]
    fn test_months_overdue_across_year_end() {
        assert_eq!(PenaltyEngine::months_overdue(period(2023, 11), period(2024, 2)), 2);
        assert_eq!(PenaltyEngine::months_overdue(period(2023, 12), period(2024, 1)), 0);
    }

    #[test]
    fn test_skipped_bills_do_not_break_chain() {
        let unit_id = Uuid::new_v4();
        let engine = PenaltyEngine::new(Rate::from_percentage(10));
        let p = Money::from_major(1000);

        let mut paid = issued_bill(unit_id, period(2024, 2), p, Money::ZERO);
        paid.record_payment(p, &ComponentAmounts::default().with(Component::Dues, p));
        let opening = Bill::opening_balance(
            unit_id,
            period(2024, 3),
            Money::from_major(50_000),
            NaiveDate::from_ymd_opt(2024, 4, 15).unwrap(),
        )
        .unwrap();

        let bills = vec![
            issued_bill(unit_id, period(2024, 1), p, Money::ZERO),
            paid,
            opening,
            issued_bill(unit_id, period(2024, 4), p, Money::ZERO),
        ];
        let result = engine.calculate(&bills, period(2024, 7));

        // 100, then (100 + 100) * 1.1
        assert_eq!(result.contributions.len(), 2);
        assert_eq!(result.penalty_amount, Money::from_major(220));
        let reasons: Vec<SkipReason> = result.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SkipReason::Settled, SkipReason::OpeningBalance]);
    }

    #[test]
    fn test_principal_excludes_embedded_penalty_and_scales_by_unpaid_share() {
        let unit_id = Uuid::new_v4();
        let mut bill = issued_bill(unit_id, period(2024, 1), Money::from_major(900), Money::from_major(100));
        bill.record_payment(
            Money::from_major(500),
            &ComponentAmounts::default().with(Component::Dues, Money::from_major(500)),
        );

        // (1000 - 100) * (500 / 1000)
        assert_eq!(PenaltyEngine::unpaid_principal(&bill), Money::from_major(450));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let unit_id = Uuid::new_v4();
        let engine = PenaltyEngine::new(Rate::from_percentage(10));
        let older = issued_bill(unit_id, period(2024, 1), Money::from_major(1000), Money::ZERO);
        let newer = issued_bill(unit_id, period(2024, 2), Money::from_major(2000), Money::ZERO);

        let forward = engine.calculate(&[older.clone(), newer.clone()], period(2024, 6));
        let backward = engine.calculate(&[newer, older], period(2024, 6));
        assert_eq!(forward.penalty_amount, backward.penalty_amount);
        // 100, then (100 + 200) * 1.1
        assert_eq!(forward.penalty_amount, Money::from_major(330));
    }
}
