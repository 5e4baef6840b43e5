use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{BillId, BillStatus, BillingPeriod, PaymentId, PaymentStatus, UnitId};

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("negative consumption: {consumption}")]
    NegativeConsumption {
        consumption: rust_decimal::Decimal,
    },

    #[error("meter reading regressed: previous {previous}, present {present}")]
    ReadingRegression {
        previous: rust_decimal::Decimal,
        present: rust_decimal::Decimal,
    },

    #[error("invalid rate schedule: {message}")]
    InvalidRateSchedule {
        message: String,
    },

    #[error("invalid payment amount: {message}")]
    InvalidPaymentAmount {
        message: String,
    },

    #[error("meter reading does not belong to this bill: {message}")]
    ReadingMismatch {
        message: String,
    },

    #[error("invalid billing period: {message}")]
    InvalidPeriod {
        message: String,
    },

    #[error("invalid area: {message}")]
    InvalidArea {
        message: String,
    },

    #[error("invalid billing adjustment: {message}")]
    InvalidAdjustment {
        message: String,
    },

    #[error("bill already exists for unit {unit_id} period {period}")]
    DuplicateBill {
        unit_id: UnitId,
        period: BillingPeriod,
    },

    #[error("unit not found: {id}")]
    UnitNotFound {
        id: UnitId,
    },

    #[error("unit already registered: {id}")]
    DuplicateUnit {
        id: UnitId,
    },

    #[error("bill not found: {id}")]
    BillNotFound {
        id: BillId,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: PaymentId,
    },

    #[error("payment id {id} reused: {message}")]
    PaymentIdConflict {
        id: PaymentId,
        message: String,
    },

    #[error("payment {id} is not confirmed: current status is {status:?}")]
    PaymentNotConfirmed {
        id: PaymentId,
        status: PaymentStatus,
    },

    #[error("invalid bill state for {bill_id}: current {current:?}, expected {expected}")]
    InvalidBillState {
        bill_id: BillId,
        current: BillStatus,
        expected: String,
    },

    #[error("bill {bill_id} total {total} would fall below paid amount {paid}")]
    PaidExceedsTotal {
        bill_id: BillId,
        total: Money,
        paid: Money,
    },

    #[error("insufficient funds for allocation: {}", join_violations(.violations))]
    InsufficientFunds {
        violations: Vec<AllocationViolation>,
    },

    #[error("bill {bill_id} is locked")]
    LockedBill {
        bill_id: BillId,
    },

    #[error("inconsistent state: {message}")]
    InconsistentState {
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// coarse error classes callers translate into user-facing responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    LockedBill,
    InconsistentState,
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            BillingError::LockedBill { .. } => ErrorKind::LockedBill,
            BillingError::InconsistentState { .. } => ErrorKind::InconsistentState,
            _ => ErrorKind::Validation,
        }
    }
}

/// one rejected line of a manual allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AllocationViolation {
    /// bill is unknown to the unit or has nothing outstanding
    BillNotOutstanding { bill_id: Uuid },
    /// a manual line carried a negative amount
    NegativeAmount { bill_id: Uuid, amount: Money },
    /// a component line exceeds what is unpaid on that component
    ComponentExceedsUnpaid {
        bill_id: Uuid,
        component: String,
        requested: Money,
        unpaid: Money,
    },
    /// per-bill sum exceeds the bill balance
    ExceedsBillBalance { bill_id: Uuid, requested: Money, balance: Money },
    /// all lines together exceed the allocatable part of the payment
    ExceedsPaymentTotal { requested: Money, available: Money },
}

impl fmt::Display for AllocationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationViolation::BillNotOutstanding { bill_id } => {
                write!(f, "bill {} has no outstanding balance", bill_id)
            }
            AllocationViolation::NegativeAmount { bill_id, amount } => {
                write!(f, "negative amount {} for bill {}", amount, bill_id)
            }
            AllocationViolation::ComponentExceedsUnpaid { bill_id, component, requested, unpaid } => {
                write!(
                    f,
                    "{} on bill {}: requested {}, unpaid {}",
                    component, bill_id, requested, unpaid
                )
            }
            AllocationViolation::ExceedsBillBalance { bill_id, requested, balance } => {
                write!(f, "bill {}: requested {}, balance {}", bill_id, requested, balance)
            }
            AllocationViolation::ExceedsPaymentTotal { requested, available } => {
                write!(f, "requested {} exceeds available {}", requested, available)
            }
        }
    }
}

fn join_violations(violations: &[AllocationViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, BillingError>;
