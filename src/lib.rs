pub mod assembler;
pub mod bill;
pub mod charges;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod payments;
pub mod penalty;
pub mod repository;
pub mod types;

// re-export key types
pub use assembler::{AssembledBill, BillAssembler, BillInputs, BillingAdjustment};
pub use bill::{Bill, Component, ComponentAmounts};
pub use charges::{ChargeCalculator, WaterCharge};
pub use config::{RateSchedule, TierMode, WaterTier};
pub use decimal::{Money, Rate};
pub use errors::{AllocationViolation, BillingError, ErrorKind, Result};
pub use events::{BillingEvent, EventStore};
pub use ledger::{BillRequest, BillingLedger, BillingRun, UnitBillingOutcome};
pub use lifecycle::BillLifecycle;
pub use payments::{
    AllocationResult, AllocationStrategy, BillPayment, ManualAllocation, Payment, PaymentAllocator,
    PaymentIntent, ReversalReport, UnitAdvanceBalance, VoidReversal,
};
pub use penalty::{PenaltyCalculation, PenaltyEngine};
pub use repository::{
    BillRepository, BillingStore, InMemoryStore, PaymentRepository, UnitRecords, UnitTransaction,
};
pub use types::{
    AdvanceTarget, BillId, BillStatus, BillType, BillingPeriod, MeterReading, PaymentId,
    PaymentStatus, TenantId, Unit, UnitId, UnitType, UtilityType,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
