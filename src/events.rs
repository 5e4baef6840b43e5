use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{AdvanceTarget, BillId, BillStatus, BillType, BillingPeriod, PaymentId, UnitId};

/// all events emitted by the billing ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BillingEvent {
    // bill events
    BillGenerated {
        bill_id: BillId,
        unit_id: UnitId,
        period: BillingPeriod,
        bill_type: BillType,
        total_amount: Money,
        timestamp: DateTime<Utc>,
    },
    PenaltyAssessed {
        bill_id: BillId,
        unit_id: UnitId,
        amount: Money,
        contributing_bills: usize,
        timestamp: DateTime<Utc>,
    },
    BillAdjusted {
        bill_id: BillId,
        old_total: Money,
        new_total: Money,
        timestamp: DateTime<Utc>,
    },
    BillLocked {
        bill_id: BillId,
        timestamp: DateTime<Utc>,
    },
    BillStatusChanged {
        bill_id: BillId,
        old_status: BillStatus,
        new_status: BillStatus,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentApplied {
        payment_id: PaymentId,
        unit_id: UnitId,
        amount: Money,
        bills_touched: usize,
        timestamp: DateTime<Utc>,
    },
    PaymentVoided {
        payment_id: PaymentId,
        unit_id: UnitId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // advance events
    AdvanceCredited {
        unit_id: UnitId,
        bucket: AdvanceTarget,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    AdvanceConsumed {
        unit_id: UnitId,
        bill_id: BillId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    AdvanceClawbackShortfall {
        unit_id: UnitId,
        payment_id: PaymentId,
        bucket: AdvanceTarget,
        shortfall: Money,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<BillingEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = BillingEvent>) {
        self.events.extend(events);
    }

    pub fn take_events(&mut self) -> Vec<BillingEvent> {
        std::mem::take(&mut self.events)
    }
}
