use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::lifecycle::BillLifecycle;
use crate::types::{BillId, BillStatus, BillType, BillingPeriod, UnitId};

/// chargeable parts of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    Electric,
    Water,
    Dues,
    Parking,
    SpAssessment,
    Penalty,
    Other,
}

impl Component {
    pub const ALL: [Component; 7] = [
        Component::Electric,
        Component::Water,
        Component::Dues,
        Component::Parking,
        Component::SpAssessment,
        Component::Penalty,
        Component::Other,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Component::Electric => "electric",
            Component::Water => "water",
            Component::Dues => "dues",
            Component::Parking => "parking",
            Component::SpAssessment => "sp_assessment",
            Component::Penalty => "penalty",
            Component::Other => "other",
        }
    }
}

/// an amount per bill component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ComponentAmounts {
    pub electric: Money,
    pub water: Money,
    pub dues: Money,
    pub parking: Money,
    pub sp_assessment: Money,
    pub penalty: Money,
    pub other: Money,
}

impl ComponentAmounts {
    pub fn get(&self, component: Component) -> Money {
        match component {
            Component::Electric => self.electric,
            Component::Water => self.water,
            Component::Dues => self.dues,
            Component::Parking => self.parking,
            Component::SpAssessment => self.sp_assessment,
            Component::Penalty => self.penalty,
            Component::Other => self.other,
        }
    }

    pub fn get_mut(&mut self, component: Component) -> &mut Money {
        match component {
            Component::Electric => &mut self.electric,
            Component::Water => &mut self.water,
            Component::Dues => &mut self.dues,
            Component::Parking => &mut self.parking,
            Component::SpAssessment => &mut self.sp_assessment,
            Component::Penalty => &mut self.penalty,
            Component::Other => &mut self.other,
        }
    }

    pub fn with(mut self, component: Component, amount: Money) -> Self {
        *self.get_mut(component) = amount;
        self
    }

    pub fn total(&self) -> Money {
        Component::ALL.iter().map(|c| self.get(*c)).sum()
    }

    /// the non-zero components, in component order
    pub fn entries(&self) -> impl Iterator<Item = (Component, Money)> + '_ {
        Component::ALL
            .iter()
            .map(move |c| (*c, self.get(*c)))
            .filter(|(_, amount)| !amount.is_zero())
    }

    pub fn has_negative(&self) -> bool {
        Component::ALL.iter().any(|c| self.get(*c).is_negative())
    }

    pub fn round_centavo(&self) -> Self {
        self.map(|amount| amount.round_centavo())
    }

    /// component-wise `self - other`, floored at zero
    pub fn saturating_sub(&self, other: &ComponentAmounts) -> Self {
        let mut out = *self;
        for c in Component::ALL {
            *out.get_mut(c) = self.get(c).saturating_sub(other.get(c));
        }
        out
    }

    pub fn add(&self, other: &ComponentAmounts) -> Self {
        let mut out = *self;
        for c in Component::ALL {
            *out.get_mut(c) += other.get(c);
        }
        out
    }

    fn map(&self, f: impl Fn(Money) -> Money) -> Self {
        let mut out = *self;
        for c in Component::ALL {
            *out.get_mut(c) = f(self.get(c));
        }
        out
    }
}

/// a unit's bill for one billing period
///
/// Totals, balance and status are always derived from the components; the
/// only ways in are [`Bill::assemble`] and [`Bill::opening_balance`].
/// Deserialized bills are checked with [`Bill::check_invariants`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredBill")]
pub struct Bill {
    id: BillId,
    unit_id: UnitId,
    period: BillingPeriod,
    bill_type: BillType,
    charges: ComponentAmounts,
    discounts: Money,
    advance_applied: Money,
    total_amount: Money,
    paid_amount: Money,
    paid_components: ComponentAmounts,
    balance: Money,
    status: BillStatus,
    due_date: NaiveDate,
    past_due: bool,
    is_locked: bool,
}

/// a bill as read from storage, before its invariants are checked
#[derive(Deserialize)]
struct StoredBill {
    id: BillId,
    unit_id: UnitId,
    period: BillingPeriod,
    bill_type: BillType,
    charges: ComponentAmounts,
    discounts: Money,
    advance_applied: Money,
    total_amount: Money,
    paid_amount: Money,
    paid_components: ComponentAmounts,
    balance: Money,
    status: BillStatus,
    due_date: NaiveDate,
    past_due: bool,
    is_locked: bool,
}

impl TryFrom<StoredBill> for Bill {
    type Error = BillingError;

    fn try_from(stored: StoredBill) -> Result<Self> {
        let bill = Bill {
            id: stored.id,
            unit_id: stored.unit_id,
            period: stored.period,
            bill_type: stored.bill_type,
            charges: stored.charges,
            discounts: stored.discounts,
            advance_applied: stored.advance_applied,
            total_amount: stored.total_amount,
            paid_amount: stored.paid_amount,
            paid_components: stored.paid_components,
            balance: stored.balance,
            status: stored.status,
            due_date: stored.due_date,
            past_due: stored.past_due,
            is_locked: stored.is_locked,
        };
        bill.check_invariants()?;
        Ok(bill)
    }
}

impl Bill {
    /// build a draft regular bill from its components
    pub fn assemble(
        unit_id: UnitId,
        period: BillingPeriod,
        charges: ComponentAmounts,
        discounts: Money,
        advance_applied: Money,
        due_date: NaiveDate,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let charges = charges.round_centavo();
        let discounts = discounts.round_centavo();
        let advance_applied = advance_applied.round_centavo();
        let total_amount = net_total(id, &charges, discounts, advance_applied)?;

        Ok(Self {
            id,
            unit_id,
            period,
            bill_type: BillType::Regular,
            charges,
            discounts,
            advance_applied,
            total_amount,
            paid_amount: Money::ZERO,
            paid_components: ComponentAmounts::default(),
            balance: total_amount,
            status: BillStatus::Draft,
            due_date,
            past_due: false,
            is_locked: false,
        })
    }

    /// migrated legacy debt; issued immediately and excluded from penalties
    pub fn opening_balance(
        unit_id: UnitId,
        period: BillingPeriod,
        amount: Money,
        due_date: NaiveDate,
    ) -> Result<Self> {
        let charges = ComponentAmounts::default().with(Component::Other, amount);
        let mut bill = Self::assemble(unit_id, period, charges, Money::ZERO, Money::ZERO, due_date)?;
        bill.bill_type = BillType::OpeningBalance;
        bill.issue()?;
        Ok(bill)
    }

    pub fn id(&self) -> BillId {
        self.id
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn period(&self) -> BillingPeriod {
        self.period
    }

    pub fn bill_type(&self) -> BillType {
        self.bill_type
    }

    pub fn charges(&self) -> &ComponentAmounts {
        &self.charges
    }

    pub fn penalty(&self) -> Money {
        self.charges.penalty
    }

    pub fn discounts(&self) -> Money {
        self.discounts
    }

    pub fn advance_applied(&self) -> Money {
        self.advance_applied
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn paid_components(&self) -> &ComponentAmounts {
        &self.paid_components
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn status(&self) -> BillStatus {
        self.status
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn is_past_due(&self) -> bool {
        self.past_due
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    /// issued and still owing more than the centavo tolerance
    pub fn is_outstanding(&self) -> bool {
        self.status.is_collectible() && !self.balance.is_settled()
    }

    /// what is still owed per component
    pub fn unpaid_components(&self) -> ComponentAmounts {
        self.charges.saturating_sub(&self.paid_components)
    }

    /// move a draft to its first collectible status
    pub fn issue(&mut self) -> Result<()> {
        if self.is_locked {
            return Err(BillingError::LockedBill { bill_id: self.id });
        }
        if self.status != BillStatus::Draft {
            return Err(self.state_error("Draft"));
        }
        self.status = BillLifecycle::classify(self.total_amount, self.paid_amount);
        Ok(())
    }

    /// freeze components once the statement has been distributed
    pub fn lock(&mut self) -> Result<()> {
        if self.status == BillStatus::Draft {
            return Err(self.state_error("an issued bill"));
        }
        self.is_locked = true;
        Ok(())
    }

    /// replace components on an unlocked bill, re-deriving total and status
    pub fn edit_components(&mut self, charges: ComponentAmounts, discounts: Money) -> Result<()> {
        if self.is_locked {
            return Err(BillingError::LockedBill { bill_id: self.id });
        }
        let charges = charges.round_centavo();
        let discounts = discounts.round_centavo();
        let total_amount = net_total(self.id, &charges, discounts, self.advance_applied)?;
        if total_amount < self.paid_amount {
            return Err(BillingError::PaidExceedsTotal {
                bill_id: self.id,
                total: total_amount,
                paid: self.paid_amount,
            });
        }

        self.charges = charges;
        self.discounts = discounts;
        self.total_amount = total_amount;
        self.refresh();
        Ok(())
    }

    /// check the derived fields against the components
    pub fn check_invariants(&self) -> Result<()> {
        let expected_total = self.charges.total() - self.discounts - self.advance_applied;
        if expected_total != self.total_amount {
            return Err(self.inconsistent(format!(
                "total {} does not match components {}",
                self.total_amount, expected_total
            )));
        }
        let expected_balance = self.total_amount.saturating_sub(self.paid_amount);
        if expected_balance != self.balance {
            return Err(self.inconsistent(format!(
                "balance {} does not match total - paid {}",
                self.balance, expected_balance
            )));
        }
        let expected_status = BillLifecycle::next_status(
            self.status,
            self.total_amount,
            self.paid_amount,
            self.past_due,
        );
        if expected_status != self.status {
            return Err(self.inconsistent(format!(
                "status {:?} should be {:?}",
                self.status, expected_status
            )));
        }
        Ok(())
    }

    pub(crate) fn record_payment(&mut self, amount: Money, components: &ComponentAmounts) {
        self.paid_amount += amount;
        self.paid_components = self.paid_components.add(components);
        self.refresh();
    }

    pub(crate) fn reverse_payment(&mut self, amount: Money, components: &ComponentAmounts) {
        self.paid_amount = self.paid_amount.saturating_sub(amount);
        self.paid_components = self.paid_components.saturating_sub(components);
        self.refresh();
    }

    pub(crate) fn mark_past_due(&mut self) {
        self.past_due = true;
        self.refresh();
    }

    fn refresh(&mut self) {
        self.balance = self.total_amount.saturating_sub(self.paid_amount);
        self.status = BillLifecycle::next_status(
            self.status,
            self.total_amount,
            self.paid_amount,
            self.past_due,
        );
    }

    fn state_error(&self, expected: &str) -> BillingError {
        BillingError::InvalidBillState {
            bill_id: self.id,
            current: self.status,
            expected: expected.to_string(),
        }
    }

    fn inconsistent(&self, detail: String) -> BillingError {
        BillingError::InconsistentState {
            message: format!("bill {} ({}): {}", self.id, self.period, detail),
        }
    }
}

fn net_total(
    bill_id: BillId,
    charges: &ComponentAmounts,
    discounts: Money,
    advance_applied: Money,
) -> Result<Money> {
    if charges.has_negative() || discounts.is_negative() || advance_applied.is_negative() {
        return Err(BillingError::InvalidAdjustment {
            message: format!("bill {} has a negative component", bill_id),
        });
    }
    let total = charges.total() - discounts - advance_applied;
    if total.is_negative() {
        return Err(BillingError::InvalidAdjustment {
            message: format!(
                "bill {} credits {} exceed charges {}",
                bill_id,
                discounts + advance_applied,
                charges.total()
            ),
        });
    }
    Ok(total)
}
