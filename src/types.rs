use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{BillingError, Result};

pub type TenantId = Uuid;
pub type UnitId = Uuid;
pub type BillId = Uuid;
pub type PaymentId = Uuid;
pub type BillPaymentId = Uuid;

/// calendar month a bill covers; with the unit id it is the natural key of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(BillingError::InvalidPeriod {
                message: format!("month {} out of range", month),
            });
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// whole months from `self` to `later` (negative if `later` is earlier)
    pub fn months_until(&self, later: BillingPeriod) -> i32 {
        (later.year - self.year) * 12 + (later.month as i32 - self.month as i32)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// the given day of the month after this period
    pub fn due_date(&self, due_day_of_month: u32) -> Result<NaiveDate> {
        self.next().day(due_day_of_month)
    }

    fn day(&self, day: u32) -> Result<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, day).ok_or_else(|| BillingError::InvalidPeriod {
            message: format!("day {} does not exist in {}", day, self),
        })
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl TryFrom<String> for BillingPeriod {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self> {
        let invalid = || BillingError::InvalidPeriod {
            message: format!("expected YYYY-MM, got {:?}", value),
        };
        let (year, month) = value.split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        BillingPeriod::new(year, month)
    }
}

impl From<BillingPeriod> for String {
    fn from(period: BillingPeriod) -> Self {
        period.to_string()
    }
}

/// unit classification; selects the water tier table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitType {
    Residential,
    Commercial,
}

/// metered utilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UtilityType {
    Electric,
    Water,
}

/// bill type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillType {
    /// generated by the monthly billing run
    Regular,
    /// migrated legacy debt, never penalised
    OpeningBalance,
}

/// bill status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillStatus {
    /// assembled but not yet issued
    Draft,
    /// issued, nothing paid
    Unpaid,
    /// issued, partly paid
    Partial,
    /// settled within one centavo
    Paid,
    /// unpaid or partial past its due date
    Overdue,
}

impl BillStatus {
    /// statuses that can still receive payments
    pub fn is_collectible(&self) -> bool {
        matches!(self, BillStatus::Unpaid | BillStatus::Partial | BillStatus::Overdue)
    }
}

/// payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Confirmed,
    Cancelled,
}

/// which advance bucket receives money not needed by any bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AdvanceTarget {
    #[default]
    Dues,
    Utilities,
}

/// a condominium unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub tenant_id: TenantId,
    pub label: String,
    /// floor area in m²
    pub area: Decimal,
    /// parking slot area in m², zero if none
    pub parking_area: Decimal,
    pub unit_type: UnitType,
}

impl Unit {
    pub fn new(
        tenant_id: TenantId,
        label: impl Into<String>,
        area: Decimal,
        parking_area: Decimal,
        unit_type: UnitType,
    ) -> Result<Self> {
        if area < Decimal::ZERO || parking_area < Decimal::ZERO {
            return Err(BillingError::InvalidArea {
                message: format!("area {} / parking {} must not be negative", area, parking_area),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            label: label.into(),
            area,
            parking_area,
            unit_type,
        })
    }
}

/// one meter reading for one unit, period and utility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub unit_id: UnitId,
    pub period: BillingPeriod,
    pub utility: UtilityType,
    pub previous: Decimal,
    pub present: Decimal,
}

impl MeterReading {
    pub fn new(
        unit_id: UnitId,
        period: BillingPeriod,
        utility: UtilityType,
        previous: Decimal,
        present: Decimal,
    ) -> Result<Self> {
        if present < previous {
            return Err(BillingError::ReadingRegression { previous, present });
        }
        Ok(Self {
            unit_id,
            period,
            utility,
            previous,
            present,
        })
    }

    /// present minus previous; never negative for a constructed reading
    pub fn consumption(&self) -> Decimal {
        self.present - self.previous
    }
}
