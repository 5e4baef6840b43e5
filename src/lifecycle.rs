use chrono::NaiveDate;
use tracing::info;

use crate::bill::Bill;
use crate::decimal::Money;
use crate::types::{BillId, BillStatus};

/// bill status state machine
///
/// ```text
/// DRAFT -> UNPAID -> { PARTIAL, PAID } -> OVERDUE
/// ```
///
/// Outside of DRAFT the status is a function of `(total, paid)` plus the
/// sticky past-due mark the overdue sweep places on a bill.
pub struct BillLifecycle;

impl BillLifecycle {
    /// status from amounts alone
    pub fn classify(total: Money, paid: Money) -> BillStatus {
        let balance = total.saturating_sub(paid);
        if balance.is_settled() {
            BillStatus::Paid
        } else if paid.is_positive() {
            BillStatus::Partial
        } else {
            BillStatus::Unpaid
        }
    }

    /// status after a change to the bill's amounts
    pub fn next_status(current: BillStatus, total: Money, paid: Money, past_due: bool) -> BillStatus {
        if current == BillStatus::Draft {
            return BillStatus::Draft;
        }
        match Self::classify(total, paid) {
            BillStatus::Paid => BillStatus::Paid,
            _ if past_due => BillStatus::Overdue,
            status => status,
        }
    }

    /// mark every unpaid or partial bill due before `today` as overdue
    pub fn sweep_overdue<'a>(bills: impl IntoIterator<Item = &'a mut Bill>, today: NaiveDate) -> Vec<BillId> {
        let mut swept = Vec::new();
        for bill in bills {
            let eligible = matches!(bill.status(), BillStatus::Unpaid | BillStatus::Partial);
            if eligible && bill.due_date() < today {
                bill.mark_past_due();
                info!(
                    bill_id = %bill.id(),
                    unit_id = %bill.unit_id(),
                    period = %bill.period(),
                    balance = %bill.balance(),
                    "bill reclassified as overdue"
                );
                swept.push(bill.id());
            }
        }
        swept
    }
}
