use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bill::{Bill, Component, ComponentAmounts};
use crate::decimal::Money;
use crate::errors::{AllocationViolation, BillingError, Result};
use crate::types::{AdvanceTarget, BillId, PaymentId};

use super::{AllocationStrategy, BillPayment, ManualAllocation, Payment, StatusChange, UnitAdvanceBalance};

/// what a payment will do to one bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAllocation {
    pub bill_id: BillId,
    pub amount: Money,
    pub components: ComponentAmounts,
}

/// outcome of applying a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub payment_id: PaymentId,
    pub bill_payments: Vec<BillPayment>,
    /// remainder after every outstanding bill was settled
    pub advance_created: Money,
    /// advances the payer designated up front
    pub explicit_advance: Money,
    pub status_changes: Vec<StatusChange>,
    pub advance_balance: UnitAdvanceBalance,
}

impl AllocationResult {
    pub fn total_applied(&self) -> Money {
        self.bill_payments.iter().map(|bp| bp.amount).sum()
    }
}

/// spreads payments over a unit's outstanding bills
pub struct PaymentAllocator;

impl PaymentAllocator {
    /// work out per-bill allocations without touching anything
    ///
    /// Returns the plan and the overflow that becomes an advance. Manual
    /// strategies are validated in full; every violation is reported.
    pub fn plan(
        payment: &Payment,
        strategy: &AllocationStrategy,
        bills: &[Bill],
    ) -> Result<(Vec<PlannedAllocation>, Money)> {
        let allocatable = payment.allocatable();
        match strategy {
            AllocationStrategy::OldestFirst => Ok(Self::plan_sequential(allocatable, bills, false)),
            AllocationStrategy::NewestFirst => Ok(Self::plan_sequential(allocatable, bills, true)),
            AllocationStrategy::Manual(lines) => Self::plan_manual(allocatable, bills, lines),
        }
    }

    /// plan and apply a payment to the unit's bills and advance balance
    pub fn allocate(
        payment: &Payment,
        strategy: &AllocationStrategy,
        bills: &mut [Bill],
        advance: &mut UnitAdvanceBalance,
        now: DateTime<Utc>,
    ) -> Result<AllocationResult> {
        if !payment.is_confirmed() {
            return Err(BillingError::PaymentNotConfirmed {
                id: payment.id,
                status: payment.status,
            });
        }

        let (plan, overflow) = Self::plan(payment, strategy, bills)?;

        let mut bill_payments = Vec::with_capacity(plan.len());
        let mut status_changes = Vec::new();
        for planned in plan {
            let bill = bills
                .iter_mut()
                .find(|b| b.id() == planned.bill_id)
                .ok_or(BillingError::BillNotFound { id: planned.bill_id })?;

            let before = bill.status();
            bill.record_payment(planned.amount, &planned.components);
            if bill.status() != before {
                status_changes.push(StatusChange {
                    bill_id: bill.id(),
                    from: before,
                    to: bill.status(),
                });
            }

            bill_payments.push(BillPayment {
                id: Uuid::new_v4(),
                payment_id: payment.id,
                bill_id: planned.bill_id,
                amount: planned.amount,
                components: planned.components,
                created_at: now,
            });
        }

        advance.credit(AdvanceTarget::Dues, payment.advance_dues);
        advance.credit(AdvanceTarget::Utilities, payment.advance_utilities);
        if overflow.is_positive() {
            advance.credit(payment.advance_target, overflow);
        }

        debug!(
            payment_id = %payment.id,
            bills = bill_payments.len(),
            %overflow,
            explicit_advance = %payment.explicit_advance(),
            "payment allocated"
        );

        Ok(AllocationResult {
            payment_id: payment.id,
            bill_payments,
            advance_created: overflow,
            explicit_advance: payment.explicit_advance(),
            status_changes,
            advance_balance: advance.clone(),
        })
    }

    /// split `apply` over a bill's unpaid components in proportion to what is unpaid
    ///
    /// Each share is rounded to centavos and capped at its component's unpaid
    /// amount; the rounding residue is absorbed starting from the last component.
    pub fn split_across_components(unpaid: &ComponentAmounts, apply: Money) -> ComponentAmounts {
        let weight = unpaid.total();
        let mut shares = ComponentAmounts::default();
        if weight.is_zero() {
            return shares.with(Component::Other, apply);
        }

        for (component, owed) in unpaid.entries() {
            let share = owed.scale(apply, weight).round_centavo().min(owed);
            *shares.get_mut(component) = share;
        }

        let mut residue = apply - shares.total();
        for component in Component::ALL.iter().rev() {
            if residue.is_zero() {
                break;
            }
            let share = shares.get_mut(*component);
            if residue.is_positive() {
                let room = unpaid.get(*component) - *share;
                let take = residue.min(room);
                *share += take;
                residue -= take;
            } else {
                let give = residue.abs().min(*share);
                *share -= give;
                residue += give;
            }
        }

        shares
    }

    fn plan_sequential(allocatable: Money, bills: &[Bill], newest_first: bool) -> (Vec<PlannedAllocation>, Money) {
        let mut outstanding: Vec<&Bill> = bills.iter().filter(|b| b.is_outstanding()).collect();
        outstanding.sort_by_key(|b| b.period());
        if newest_first {
            outstanding.reverse();
        }

        let mut remaining = allocatable;
        let mut plan = Vec::new();
        for bill in outstanding {
            if !remaining.is_positive() {
                break;
            }
            let apply = remaining.min(bill.balance());
            plan.push(PlannedAllocation {
                bill_id: bill.id(),
                amount: apply,
                components: Self::split_across_components(&bill.unpaid_components(), apply),
            });
            remaining -= apply;
        }

        (plan, remaining)
    }

    fn plan_manual(
        allocatable: Money,
        bills: &[Bill],
        lines: &[ManualAllocation],
    ) -> Result<(Vec<PlannedAllocation>, Money)> {
        let mut violations = Vec::new();

        // several lines for one bill are merged before checking
        let mut order: Vec<BillId> = Vec::new();
        let mut merged: HashMap<BillId, ComponentAmounts> = HashMap::new();
        for line in lines {
            if line.components.has_negative() {
                let amount = line
                    .components
                    .entries()
                    .map(|(_, a)| a)
                    .find(|a| a.is_negative())
                    .unwrap_or(Money::ZERO);
                violations.push(AllocationViolation::NegativeAmount {
                    bill_id: line.bill_id,
                    amount,
                });
                continue;
            }
            let entry = merged.entry(line.bill_id).or_insert_with(|| {
                order.push(line.bill_id);
                ComponentAmounts::default()
            });
            *entry = entry.add(&line.components.round_centavo());
        }

        let mut plan = Vec::new();
        let mut requested_total = Money::ZERO;
        for bill_id in order {
            let components = merged[&bill_id];
            let amount = components.total();
            if amount.is_zero() {
                continue;
            }
            requested_total += amount;

            let Some(bill) = bills.iter().find(|b| b.id() == bill_id && b.is_outstanding()) else {
                violations.push(AllocationViolation::BillNotOutstanding { bill_id });
                continue;
            };

            let unpaid = bill.unpaid_components();
            for (component, requested) in components.entries() {
                if requested > unpaid.get(component) {
                    violations.push(AllocationViolation::ComponentExceedsUnpaid {
                        bill_id,
                        component: component.name().to_string(),
                        requested,
                        unpaid: unpaid.get(component),
                    });
                }
            }
            if amount > bill.balance() {
                violations.push(AllocationViolation::ExceedsBillBalance {
                    bill_id,
                    requested: amount,
                    balance: bill.balance(),
                });
            }

            plan.push(PlannedAllocation {
                bill_id,
                amount,
                components,
            });
        }

        if requested_total > allocatable {
            violations.push(AllocationViolation::ExceedsPaymentTotal {
                requested: requested_total,
                available: allocatable,
            });
        }

        if !violations.is_empty() {
            warn!(violations = violations.len(), "manual allocation rejected");
            return Err(BillingError::InsufficientFunds { violations });
        }

        Ok((plan, allocatable - requested_total))
    }
}
