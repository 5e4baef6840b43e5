use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};

use crate::bill::Bill;
use crate::errors::{BillingError, Result};
use crate::payments::{AllocationResult, BillPayment, Payment, UnitAdvanceBalance};
use crate::types::{BillId, BillType, BillingPeriod, PaymentId, TenantId, Unit, UnitId};

/// bill storage for one unit
pub trait BillRepository {
    fn bills(&self) -> &[Bill];

    fn find_bill(&self, id: BillId) -> Result<&Bill>;

    fn find_bill_mut(&mut self, id: BillId) -> Result<&mut Bill>;

    /// the regular bill for a period, if one was generated
    fn bill_for_period(&self, period: BillingPeriod) -> Option<&Bill>;

    /// rejects a second regular bill for the same period
    fn insert_bill(&mut self, bill: Bill) -> Result<()>;
}

/// payment storage for one unit
pub trait PaymentRepository {
    fn payment(&self, id: PaymentId) -> Option<&Payment>;

    fn find_payment(&self, id: PaymentId) -> Result<&Payment> {
        self.payment(id).ok_or(BillingError::PaymentNotFound { id })
    }

    /// stored result of the payment's original application
    fn allocation(&self, id: PaymentId) -> Option<&AllocationResult>;

    fn insert_payment(&mut self, payment: Payment, allocation: AllocationResult) -> Result<()>;

    fn update_payment(&mut self, payment: Payment) -> Result<()>;

    fn bill_payments_of(&self, payment_id: PaymentId) -> Vec<BillPayment>;

    /// bill payments against `bill_id` whose payment is still confirmed
    fn active_bill_payments(&self, bill_id: BillId) -> Vec<&BillPayment>;
}

/// the records one transaction sees: a unit, its bills, payments and advance
pub trait UnitTransaction: BillRepository + PaymentRepository {
    fn unit(&self) -> &Unit;

    fn advance(&self) -> &UnitAdvanceBalance;

    /// bills and advance balance borrowed together for the payment engines
    fn working_set(&mut self) -> (&mut [Bill], &mut UnitAdvanceBalance);
}

/// persistence boundary of the ledger
///
/// Every change to a unit goes through [`BillingStore::transaction`]: the
/// closure's changes are kept only if it returns `Ok`, and transactions on
/// the same unit never interleave.
pub trait BillingStore: Send + Sync {
    type Tx: UnitTransaction;

    fn register_unit(&self, unit: Unit) -> Result<()>;

    fn unit(&self, id: UnitId) -> Result<Unit>;

    /// units of a tenant ordered by label
    fn units_of_tenant(&self, tenant_id: TenantId) -> Vec<Unit>;

    /// unit a payment id was recorded under, across all units
    fn payment_owner(&self, id: PaymentId) -> Option<UnitId>;

    /// read-only copy of a unit's records
    fn snapshot(&self, unit_id: UnitId) -> Result<Self::Tx>;

    fn transaction<T, F>(&self, unit_id: UnitId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T>;
}

/// everything stored for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecords {
    unit: Unit,
    bills: Vec<Bill>,
    payments: Vec<Payment>,
    bill_payments: Vec<BillPayment>,
    allocations: HashMap<PaymentId, AllocationResult>,
    advance: UnitAdvanceBalance,
}

impl UnitRecords {
    pub fn new(unit: Unit) -> Self {
        let advance = UnitAdvanceBalance::new(unit.id);
        Self {
            unit,
            bills: Vec::new(),
            payments: Vec::new(),
            bill_payments: Vec::new(),
            allocations: HashMap::new(),
            advance,
        }
    }
}

impl BillRepository for UnitRecords {
    fn bills(&self) -> &[Bill] {
        &self.bills
    }

    fn find_bill(&self, id: BillId) -> Result<&Bill> {
        self.bills
            .iter()
            .find(|b| b.id() == id)
            .ok_or(BillingError::BillNotFound { id })
    }

    fn find_bill_mut(&mut self, id: BillId) -> Result<&mut Bill> {
        self.bills
            .iter_mut()
            .find(|b| b.id() == id)
            .ok_or(BillingError::BillNotFound { id })
    }

    fn bill_for_period(&self, period: BillingPeriod) -> Option<&Bill> {
        self.bills
            .iter()
            .find(|b| b.period() == period && b.bill_type() == BillType::Regular)
    }

    fn insert_bill(&mut self, bill: Bill) -> Result<()> {
        if bill.unit_id() != self.unit.id {
            return Err(BillingError::InconsistentState {
                message: format!("bill {} belongs to unit {}, not {}", bill.id(), bill.unit_id(), self.unit.id),
            });
        }
        if bill.bill_type() == BillType::Regular && self.bill_for_period(bill.period()).is_some() {
            return Err(BillingError::DuplicateBill {
                unit_id: self.unit.id,
                period: bill.period(),
            });
        }
        self.bills.push(bill);
        self.bills.sort_by_key(|b| b.period());
        Ok(())
    }
}

impl PaymentRepository for UnitRecords {
    fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id == id)
    }

    fn allocation(&self, id: PaymentId) -> Option<&AllocationResult> {
        self.allocations.get(&id)
    }

    fn insert_payment(&mut self, payment: Payment, allocation: AllocationResult) -> Result<()> {
        if self.payment(payment.id).is_some() {
            return Err(BillingError::InconsistentState {
                message: format!("payment {} already recorded", payment.id),
            });
        }
        if allocation.payment_id != payment.id {
            return Err(BillingError::InconsistentState {
                message: format!("allocation of {} stored under payment {}", allocation.payment_id, payment.id),
            });
        }
        self.bill_payments.extend(allocation.bill_payments.iter().cloned());
        self.allocations.insert(payment.id, allocation);
        self.payments.push(payment);
        Ok(())
    }

    fn update_payment(&mut self, payment: Payment) -> Result<()> {
        let slot = self
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or(BillingError::PaymentNotFound { id: payment.id })?;
        *slot = payment;
        Ok(())
    }

    fn bill_payments_of(&self, payment_id: PaymentId) -> Vec<BillPayment> {
        self.bill_payments
            .iter()
            .filter(|bp| bp.payment_id == payment_id)
            .cloned()
            .collect()
    }

    fn active_bill_payments(&self, bill_id: BillId) -> Vec<&BillPayment> {
        self.bill_payments
            .iter()
            .filter(|bp| bp.bill_id == bill_id)
            .filter(|bp| self.payment(bp.payment_id).is_some_and(|p| p.is_confirmed()))
            .collect()
    }
}

impl UnitTransaction for UnitRecords {
    fn unit(&self) -> &Unit {
        &self.unit
    }

    fn advance(&self) -> &UnitAdvanceBalance {
        &self.advance
    }

    fn working_set(&mut self) -> (&mut [Bill], &mut UnitAdvanceBalance) {
        (&mut self.bills, &mut self.advance)
    }
}

/// process-local store with one lock per unit
#[derive(Debug, Default)]
pub struct InMemoryStore {
    units: RwLock<HashMap<UnitId, Arc<Mutex<UnitRecords>>>>,
    payment_owners: RwLock<HashMap<PaymentId, UnitId>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self, unit_id: UnitId) -> Result<Arc<Mutex<UnitRecords>>> {
        let units = self.units.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        units
            .get(&unit_id)
            .cloned()
            .ok_or(BillingError::UnitNotFound { id: unit_id })
    }
}

// records are only replaced after a closure succeeds, so a poisoned lock
// still guards a consistent copy
fn lock_records(records: &Mutex<UnitRecords>) -> MutexGuard<'_, UnitRecords> {
    records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BillingStore for InMemoryStore {
    type Tx = UnitRecords;

    fn register_unit(&self, unit: Unit) -> Result<()> {
        let mut units = self.units.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if units.contains_key(&unit.id) {
            return Err(BillingError::DuplicateUnit { id: unit.id });
        }
        units.insert(unit.id, Arc::new(Mutex::new(UnitRecords::new(unit))));
        Ok(())
    }

    fn unit(&self, id: UnitId) -> Result<Unit> {
        let records = self.records(id)?;
        let guard = lock_records(&records);
        Ok(guard.unit.clone())
    }

    fn units_of_tenant(&self, tenant_id: TenantId) -> Vec<Unit> {
        let cells: Vec<Arc<Mutex<UnitRecords>>> = {
            let units = self.units.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            units.values().cloned().collect()
        };
        let mut found: Vec<Unit> = cells
            .iter()
            .map(|cell| lock_records(cell).unit.clone())
            .filter(|unit| unit.tenant_id == tenant_id)
            .collect();
        found.sort_by(|a, b| a.label.cmp(&b.label));
        found
    }

    fn payment_owner(&self, id: PaymentId) -> Option<UnitId> {
        let owners = self.payment_owners.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        owners.get(&id).copied()
    }

    fn snapshot(&self, unit_id: UnitId) -> Result<Self::Tx> {
        let records = self.records(unit_id)?;
        let guard = lock_records(&records);
        Ok(guard.clone())
    }

    fn transaction<T, F>(&self, unit_id: UnitId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T>,
    {
        let records = self.records(unit_id)?;
        let mut guard = lock_records(&records);
        let mut working = guard.clone();
        let out = f(&mut working)?;

        // claim new payment ids before committing so no id lands in two units
        let new_ids: Vec<PaymentId> = working
            .payments
            .iter()
            .map(|p| p.id)
            .filter(|id| guard.payment(*id).is_none())
            .collect();
        if !new_ids.is_empty() {
            let mut owners = self.payment_owners.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some((id, owner)) = new_ids
                .iter()
                .find_map(|id| owners.get(id).filter(|owner| **owner != unit_id).map(|owner| (*id, *owner)))
            {
                return Err(BillingError::PaymentIdConflict {
                    id,
                    message: format!("already recorded for unit {}", owner),
                });
            }
            owners.extend(new_ids.into_iter().map(|id| (id, unit_id)));
        }

        *guard = working;
        Ok(out)
    }
}
