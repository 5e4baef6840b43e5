pub mod allocation;
pub mod reversal;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bill::ComponentAmounts;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{
    AdvanceTarget, BillId, BillPaymentId, BillStatus, PaymentId, PaymentStatus, UnitId,
};

pub use allocation::{AllocationResult, PaymentAllocator, PlannedAllocation};
pub use reversal::{AdvanceClawback, BillRestoration, ReversalReport, VoidReversal};

/// how a payment is spread over outstanding bills
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum AllocationStrategy {
    #[default]
    OldestFirst,
    NewestFirst,
    /// bookkeeper override with exact per-bill, per-component amounts
    Manual(Vec<ManualAllocation>),
}

impl AllocationStrategy {
    pub fn method(&self) -> AllocationMethod {
        match self {
            AllocationStrategy::OldestFirst => AllocationMethod::OldestFirst,
            AllocationStrategy::NewestFirst => AllocationMethod::NewestFirst,
            AllocationStrategy::Manual(_) => AllocationMethod::Manual,
        }
    }
}

/// strategy name kept on the payment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationMethod {
    OldestFirst,
    NewestFirst,
    Manual,
}

/// one manual allocation line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualAllocation {
    pub bill_id: BillId,
    pub components: ComponentAmounts,
}

/// a payment as received from the cashier or API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// caller-chosen id; re-submitting the same id is answered from the stored allocation
    pub payment_id: Option<PaymentId>,
    pub unit_id: UnitId,
    pub payment_date: NaiveDate,
    pub amount: Money,
    /// official receipt number
    pub reference: Option<String>,
    pub strategy: AllocationStrategy,
    /// what the payer said the money was for; informational
    pub component_hints: ComponentAmounts,
    /// money the payer explicitly designated as advance dues
    pub advance_dues: Money,
    /// money the payer explicitly designated as advance utilities
    pub advance_utilities: Money,
    /// bucket for money left after every bill is settled
    pub advance_target: AdvanceTarget,
}

impl PaymentIntent {
    pub fn new(unit_id: UnitId, payment_date: NaiveDate, amount: Money) -> Self {
        Self {
            payment_id: None,
            unit_id,
            payment_date,
            amount,
            reference: None,
            strategy: AllocationStrategy::default(),
            component_hints: ComponentAmounts::default(),
            advance_dues: Money::ZERO,
            advance_utilities: Money::ZERO,
            advance_target: AdvanceTarget::default(),
        }
    }

    pub fn payment_id(mut self, id: PaymentId) -> Self {
        self.payment_id = Some(id);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn component_hints(mut self, hints: ComponentAmounts) -> Self {
        self.component_hints = hints;
        self
    }

    pub fn explicit_advances(mut self, dues: Money, utilities: Money) -> Self {
        self.advance_dues = dues;
        self.advance_utilities = utilities;
        self
    }

    pub fn advance_target(mut self, target: AdvanceTarget) -> Self {
        self.advance_target = target;
        self
    }
}

/// a recorded payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub unit_id: UnitId,
    pub payment_date: NaiveDate,
    pub amount: Money,
    pub reference: Option<String>,
    pub method: AllocationMethod,
    pub component_hints: ComponentAmounts,
    pub advance_dues: Money,
    pub advance_utilities: Money,
    pub advance_target: AdvanceTarget,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// validate an intent and record it as a confirmed payment
    pub fn from_intent(intent: &PaymentIntent, created_at: DateTime<Utc>) -> Result<Self> {
        let amount = intent.amount.round_centavo();
        let advance_dues = intent.advance_dues.round_centavo();
        let advance_utilities = intent.advance_utilities.round_centavo();

        if !amount.is_positive() {
            return Err(BillingError::InvalidPaymentAmount {
                message: format!("payment amount must be positive, got {}", amount),
            });
        }
        if advance_dues.is_negative() || advance_utilities.is_negative() {
            return Err(BillingError::InvalidPaymentAmount {
                message: "explicit advances must not be negative".to_string(),
            });
        }
        if advance_dues + advance_utilities > amount {
            return Err(BillingError::InvalidPaymentAmount {
                message: format!(
                    "explicit advances {} exceed payment amount {}",
                    advance_dues + advance_utilities,
                    amount
                ),
            });
        }

        Ok(Self {
            id: intent.payment_id.unwrap_or_else(Uuid::new_v4),
            unit_id: intent.unit_id,
            payment_date: intent.payment_date,
            amount,
            reference: intent.reference.clone(),
            method: intent.strategy.method(),
            component_hints: intent.component_hints,
            advance_dues,
            advance_utilities,
            advance_target: intent.advance_target,
            status: PaymentStatus::Confirmed,
            created_at,
            voided_at: None,
        })
    }

    /// a replayed intent must describe this same payment
    pub fn check_replay(&self, intent: &PaymentIntent) -> Result<()> {
        let mut differs = Vec::new();
        if intent.unit_id != self.unit_id {
            differs.push("unit");
        }
        if intent.amount.round_centavo() != self.amount {
            differs.push("amount");
        }
        if intent.advance_dues.round_centavo() != self.advance_dues
            || intent.advance_utilities.round_centavo() != self.advance_utilities
        {
            differs.push("explicit advances");
        }
        if intent.advance_target != self.advance_target {
            differs.push("advance target");
        }
        if intent.strategy.method() != self.method {
            differs.push("allocation strategy");
        }

        if differs.is_empty() {
            Ok(())
        } else {
            Err(BillingError::PaymentIdConflict {
                id: self.id,
                message: format!("{} differ from the recorded payment", differs.join(", ")),
            })
        }
    }

    pub fn explicit_advance(&self) -> Money {
        self.advance_dues + self.advance_utilities
    }

    /// part of the payment available to bills
    pub fn allocatable(&self) -> Money {
        self.amount - self.explicit_advance()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == PaymentStatus::Confirmed
    }
}

/// the part of one payment applied to one bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillPayment {
    pub id: BillPaymentId,
    pub payment_id: PaymentId,
    pub bill_id: BillId,
    pub amount: Money,
    pub components: ComponentAmounts,
    pub created_at: DateTime<Utc>,
}

/// running credit a unit holds against future bills
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitAdvanceBalance {
    pub unit_id: UnitId,
    pub advance_dues: Money,
    pub advance_utilities: Money,
}

impl UnitAdvanceBalance {
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            advance_dues: Money::ZERO,
            advance_utilities: Money::ZERO,
        }
    }

    pub fn total(&self) -> Money {
        self.advance_dues + self.advance_utilities
    }

    pub fn get(&self, target: AdvanceTarget) -> Money {
        match target {
            AdvanceTarget::Dues => self.advance_dues,
            AdvanceTarget::Utilities => self.advance_utilities,
        }
    }

    pub fn credit(&mut self, target: AdvanceTarget, amount: Money) {
        *self.bucket_mut(target) += amount;
    }

    /// take up to `amount` from a bucket, returning what was actually taken
    pub fn draw(&mut self, target: AdvanceTarget, amount: Money) -> Money {
        let bucket = self.bucket_mut(target);
        let drawn = amount.max(Money::ZERO).min(*bucket);
        *bucket -= drawn;
        drawn
    }

    fn bucket_mut(&mut self, target: AdvanceTarget) -> &mut Money {
        match target {
            AdvanceTarget::Dues => &mut self.advance_dues,
            AdvanceTarget::Utilities => &mut self.advance_utilities,
        }
    }
}

/// a bill status transition caused by a payment or a void
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub bill_id: BillId,
    pub from: BillStatus,
    pub to: BillStatus,
}
