use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bill::Bill;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{AdvanceTarget, BillId, BillStatus, PaymentId, PaymentStatus};

use super::{BillPayment, Payment, UnitAdvanceBalance};

/// one bill put back by a void
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRestoration {
    pub bill_id: BillId,
    pub amount: Money,
    pub status_before: BillStatus,
    pub status_after: BillStatus,
}

/// advance taken back from one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceClawback {
    pub bucket: AdvanceTarget,
    pub requested: Money,
    pub recovered: Money,
    /// already consumed by later bills
    pub shortfall: Money,
}

/// everything a void did, including what it could not undo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalReport {
    pub payment_id: PaymentId,
    pub voided_at: DateTime<Utc>,
    pub restored: Vec<BillRestoration>,
    pub clawbacks: Vec<AdvanceClawback>,
    pub advance_balance: UnitAdvanceBalance,
}

impl ReversalReport {
    /// true when some advance had already been spent
    pub fn is_partial(&self) -> bool {
        self.clawbacks.iter().any(|c| c.shortfall.is_positive())
    }

    pub fn total_shortfall(&self) -> Money {
        self.clawbacks.iter().map(|c| c.shortfall).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// undoes a payment's allocations and advance credits
pub struct VoidReversal;

impl VoidReversal {
    /// cancel `payment`, restoring every bill it touched and clawing back its advance
    ///
    /// The payment's bill payments are kept for audit. All inputs are checked
    /// before anything is changed.
    pub fn reverse(
        payment: &mut Payment,
        bill_payments: &[BillPayment],
        bills: &mut [Bill],
        advance: &mut UnitAdvanceBalance,
        now: DateTime<Utc>,
    ) -> Result<ReversalReport> {
        if payment.status != PaymentStatus::Confirmed {
            return Err(BillingError::PaymentNotConfirmed {
                id: payment.id,
                status: payment.status,
            });
        }

        for bp in bill_payments {
            if bp.payment_id != payment.id {
                return Err(BillingError::InconsistentState {
                    message: format!("bill payment {} belongs to payment {}, not {}", bp.id, bp.payment_id, payment.id),
                });
            }
            if !bills.iter().any(|b| b.id() == bp.bill_id) {
                return Err(BillingError::BillNotFound { id: bp.bill_id });
            }
        }

        let applied: Money = bill_payments.iter().map(|bp| bp.amount).sum();
        let overflow = payment.amount - applied - payment.explicit_advance();
        if overflow.is_negative() {
            return Err(BillingError::InconsistentState {
                message: format!(
                    "payment {} applied {} plus advances {} exceeds its amount {}",
                    payment.id,
                    applied,
                    payment.explicit_advance(),
                    payment.amount
                ),
            });
        }

        let mut restored = Vec::with_capacity(bill_payments.len());
        for bp in bill_payments {
            if let Some(bill) = bills.iter_mut().find(|b| b.id() == bp.bill_id) {
                let status_before = bill.status();
                bill.reverse_payment(bp.amount, &bp.components);
                restored.push(BillRestoration {
                    bill_id: bp.bill_id,
                    amount: bp.amount,
                    status_before,
                    status_after: bill.status(),
                });
            }
        }

        let mut requested_dues = payment.advance_dues;
        let mut requested_utilities = payment.advance_utilities;
        match payment.advance_target {
            AdvanceTarget::Dues => requested_dues += overflow,
            AdvanceTarget::Utilities => requested_utilities += overflow,
        }

        let mut clawbacks = Vec::new();
        for (bucket, requested) in [
            (AdvanceTarget::Dues, requested_dues),
            (AdvanceTarget::Utilities, requested_utilities),
        ] {
            if requested.is_zero() {
                continue;
            }
            let recovered = advance.draw(bucket, requested);
            let shortfall = requested - recovered;
            if shortfall.is_positive() {
                warn!(
                    payment_id = %payment.id,
                    bucket = ?bucket,
                    %requested,
                    %recovered,
                    %shortfall,
                    "advance already consumed; void reversal is partial"
                );
            }
            clawbacks.push(AdvanceClawback {
                bucket,
                requested,
                recovered,
                shortfall,
            });
        }

        payment.status = PaymentStatus::Cancelled;
        payment.voided_at = Some(now);

        Ok(ReversalReport {
            payment_id: payment.id,
            voided_at: now,
            restored,
            clawbacks,
            advance_balance: advance.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::{Component, ComponentAmounts};
    use crate::payments::{AllocationStrategy, PaymentAllocator, PaymentIntent};
    use crate::types::BillingPeriod;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn issued(unit_id: Uuid, month: u32, charges: ComponentAmounts) -> Bill {
        let period = BillingPeriod::new(2024, month).unwrap();
        let mut bill = Bill::assemble(
            unit_id,
            period,
            charges,
            Money::ZERO,
            Money::ZERO,
            period.due_date(15).unwrap(),
        )
        .unwrap();
        bill.issue().unwrap();
        bill
    }

    fn charges() -> ComponentAmounts {
        ComponentAmounts {
            electric: Money::from(dec!(964.85)),
            water: Money::from_major(200),
            dues: Money::from_major(2070),
            ..Default::default()
        }
    }

    #[test]
    fn test_void_is_exact_inverse() {
        let unit_id = Uuid::new_v4();
        let mut bills = vec![issued(unit_id, 1, charges()), issued(unit_id, 2, charges())];
        bills[1].record_payment(
            Money::from_major(100),
            &ComponentAmounts::default().with(Component::Water, Money::from_major(100)),
        );
        let mut advance = UnitAdvanceBalance::new(unit_id);
        advance.credit(AdvanceTarget::Utilities, Money::from_major(40));

        let bills_before = bills.clone();
        let advance_before = advance.clone();

        let intent = PaymentIntent::new(unit_id, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(), Money::from_major(7000))
            .explicit_advances(Money::from_major(250), Money::from_major(50));
        let mut payment = Payment::from_intent(&intent, Utc::now()).unwrap();
        let result = PaymentAllocator::allocate(
            &payment,
            &AllocationStrategy::OldestFirst,
            &mut bills,
            &mut advance,
            Utc::now(),
        )
        .unwrap();
        assert!(bills.iter().all(|b| b.status() == BillStatus::Paid));

        let report =
            VoidReversal::reverse(&mut payment, &result.bill_payments, &mut bills, &mut advance, Utc::now())
                .unwrap();

        assert_eq!(bills, bills_before);
        assert_eq!(advance, advance_before);
        assert!(!report.is_partial());
        assert_eq!(payment.status, PaymentStatus::Cancelled);
        assert!(payment.voided_at.is_some());
    }

    #[test]
    fn test_consumed_advance_is_reported_not_hidden() {
        let unit_id = Uuid::new_v4();
        let mut bills = vec![issued(unit_id, 1, charges())];
        let mut advance = UnitAdvanceBalance::new(unit_id);

        let intent = PaymentIntent::new(unit_id, NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(), Money::from_major(4000));
        let mut payment = Payment::from_intent(&intent, Utc::now()).unwrap();
        let result = PaymentAllocator::allocate(
            &payment,
            &AllocationStrategy::OldestFirst,
            &mut bills,
            &mut advance,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(advance.advance_dues, Money::from(dec!(765.15)));

        // a later bill drew most of the advance
        advance.draw(AdvanceTarget::Dues, Money::from_major(700));

        let report =
            VoidReversal::reverse(&mut payment, &result.bill_payments, &mut bills, &mut advance, Utc::now())
                .unwrap();

        assert!(report.is_partial());
        assert_eq!(report.clawbacks.len(), 1);
        assert_eq!(report.clawbacks[0].requested, Money::from(dec!(765.15)));
        assert_eq!(report.clawbacks[0].recovered, Money::from(dec!(65.15)));
        assert_eq!(report.total_shortfall(), Money::from_major(700));
        assert_eq!(advance.advance_dues, Money::ZERO);
        assert_eq!(bills[0].paid_amount(), Money::ZERO);
        assert!(report.to_json_pretty().unwrap().contains("shortfall"));
    }

    #[test]
    fn test_cannot_void_twice() {
        let unit_id = Uuid::new_v4();
        let mut bills = vec![issued(unit_id, 1, charges())];
        let mut advance = UnitAdvanceBalance::new(unit_id);
        let intent = PaymentIntent::new(unit_id, NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(), Money::from_major(500));
        let mut payment = Payment::from_intent(&intent, Utc::now()).unwrap();
        let result = PaymentAllocator::allocate(
            &payment,
            &AllocationStrategy::OldestFirst,
            &mut bills,
            &mut advance,
            Utc::now(),
        )
        .unwrap();

        VoidReversal::reverse(&mut payment, &result.bill_payments, &mut bills, &mut advance, Utc::now()).unwrap();
        let again = VoidReversal::reverse(&mut payment, &result.bill_payments, &mut bills, &mut advance, Utc::now());
        assert!(matches!(again, Err(BillingError::PaymentNotConfirmed { .. })));
    }

    #[test]
    fn test_missing_bill_aborts_before_any_change() {
        let unit_id = Uuid::new_v4();
        let mut bills = vec![issued(unit_id, 1, charges())];
        let mut advance = UnitAdvanceBalance::new(unit_id);
        let intent = PaymentIntent::new(unit_id, NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(), Money::from_major(500));
        let mut payment = Payment::from_intent(&intent, Utc::now()).unwrap();
        let result = PaymentAllocator::allocate(
            &payment,
            &AllocationStrategy::OldestFirst,
            &mut bills,
            &mut advance,
            Utc::now(),
        )
        .unwrap();

        let mut other_bills: Vec<Bill> = Vec::new();
        let err = VoidReversal::reverse(&mut payment, &result.bill_payments, &mut other_bills, &mut advance, Utc::now());
        assert!(matches!(err, Err(BillingError::BillNotFound { .. })));
        assert!(payment.is_confirmed());
    }
}
