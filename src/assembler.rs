use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bill::{Bill, ComponentAmounts};
use crate::charges::{ChargeCalculator, WaterCharge};
use crate::config::RateSchedule;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::payments::UnitAdvanceBalance;
use crate::penalty::{PenaltyCalculation, PenaltyEngine};
use crate::types::{AdvanceTarget, BillingPeriod, MeterReading, Unit, UtilityType};

/// one-off items a bookkeeper attaches to a period's bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BillingAdjustment {
    /// opt the unit into the flat special assessment
    SpAssessment,
    OtherCharge { description: String, amount: Money },
    Discount { description: String, amount: Money },
}

/// everything needed to build one unit's bill for one period
#[derive(Debug, Clone, Copy)]
pub struct BillInputs<'a> {
    pub unit: &'a Unit,
    pub period: BillingPeriod,
    pub electric: Option<&'a MeterReading>,
    pub water: Option<&'a MeterReading>,
    pub adjustments: &'a [BillingAdjustment],
    /// the unit's existing bills; only earlier periods affect the penalty
    pub prior_bills: &'a [Bill],
}

/// advance drawn into a bill
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AdvanceConsumption {
    pub dues: Money,
    pub utilities: Money,
}

impl AdvanceConsumption {
    pub fn total(&self) -> Money {
        self.dues + self.utilities
    }
}

/// a draft bill with the working behind it
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledBill {
    pub bill: Bill,
    pub penalty: PenaltyCalculation,
    pub water: Option<WaterCharge>,
    pub advance_consumed: AdvanceConsumption,
}

/// combines charges, penalty, adjustments and advance into a draft bill
pub struct BillAssembler<'a> {
    calculator: ChargeCalculator<'a>,
    penalty: PenaltyEngine,
}

impl<'a> BillAssembler<'a> {
    pub fn new(schedule: &'a RateSchedule) -> Result<Self> {
        Ok(Self {
            calculator: ChargeCalculator::new(schedule)?,
            penalty: PenaltyEngine::from_schedule(schedule),
        })
    }

    /// build the draft bill and draw the advance it consumes
    ///
    /// `advance` is only touched once the bill has been built successfully.
    pub fn assemble(&self, inputs: BillInputs<'_>, advance: &mut UnitAdvanceBalance) -> Result<AssembledBill> {
        let unit = inputs.unit;
        check_reading(inputs.electric, unit, inputs.period, UtilityType::Electric)?;
        check_reading(inputs.water, unit, inputs.period, UtilityType::Water)?;
        if advance.unit_id != unit.id {
            return Err(BillingError::InconsistentState {
                message: format!("advance balance of unit {} offered to unit {}", advance.unit_id, unit.id),
            });
        }

        let mut charges = ComponentAmounts::default();

        if let Some(reading) = inputs.electric {
            charges.electric = self.calculator.charge_reading(reading, unit.unit_type)?;
        }
        let water = match inputs.water {
            Some(reading) => Some(self.calculator.water(reading.consumption(), unit.unit_type)?),
            None => None,
        };
        if let Some(ref w) = water {
            charges.water = w.amount;
        }

        charges.dues = self.calculator.dues(unit.area)?;
        charges.parking = self.calculator.parking(unit.parking_area)?;

        let mut discounts = Money::ZERO;
        for adjustment in inputs.adjustments {
            match adjustment {
                BillingAdjustment::SpAssessment => {
                    charges.sp_assessment = self.calculator.sp_assessment();
                }
                BillingAdjustment::OtherCharge { description, amount } => {
                    ensure_adjustment(description, *amount)?;
                    charges.other += *amount;
                }
                BillingAdjustment::Discount { description, amount } => {
                    ensure_adjustment(description, *amount)?;
                    discounts += *amount;
                }
            }
        }

        let penalty = self.penalty.calculate(inputs.prior_bills, inputs.period);
        charges.penalty = penalty.bill_amount();

        let charges = charges.round_centavo();
        let discounts = discounts.round_centavo();
        let advance_consumed = plan_advance(&charges, discounts, advance);

        let due_date = inputs.period.due_date(self.calculator.schedule().due_day_of_month)?;
        let bill = Bill::assemble(
            unit.id,
            inputs.period,
            charges,
            discounts,
            advance_consumed.total(),
            due_date,
        )?;

        advance.draw(AdvanceTarget::Dues, advance_consumed.dues);
        advance.draw(AdvanceTarget::Utilities, advance_consumed.utilities);

        debug!(
            unit_id = %unit.id,
            period = %inputs.period,
            total = %bill.total_amount(),
            penalty = %charges.penalty,
            advance_applied = %advance_consumed.total(),
            "assembled bill"
        );

        Ok(AssembledBill {
            bill,
            penalty,
            water,
            advance_consumed,
        })
    }
}

/// how much of each advance bucket the bill can absorb
fn plan_advance(charges: &ComponentAmounts, discounts: Money, advance: &UnitAdvanceBalance) -> AdvanceConsumption {
    let mut remaining = charges.total().saturating_sub(discounts);

    let dues_base = charges.dues + charges.parking + charges.sp_assessment;
    let dues = advance.advance_dues.max(Money::ZERO).min(dues_base).min(remaining);
    remaining -= dues;

    let utilities_base = charges.electric + charges.water;
    let utilities = advance
        .advance_utilities
        .max(Money::ZERO)
        .min(utilities_base)
        .min(remaining);

    AdvanceConsumption { dues, utilities }
}

fn check_reading(
    reading: Option<&MeterReading>,
    unit: &Unit,
    period: BillingPeriod,
    utility: UtilityType,
) -> Result<()> {
    let Some(reading) = reading else {
        return Ok(());
    };
    if reading.unit_id != unit.id {
        return Err(BillingError::ReadingMismatch {
            message: format!("reading for unit {} given for unit {}", reading.unit_id, unit.id),
        });
    }
    if reading.period != period {
        return Err(BillingError::ReadingMismatch {
            message: format!("reading for {} given for {}", reading.period, period),
        });
    }
    if reading.utility != utility {
        return Err(BillingError::ReadingMismatch {
            message: format!("{:?} reading given as {:?}", reading.utility, utility),
        });
    }
    Ok(())
}

fn ensure_adjustment(description: &str, amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(BillingError::InvalidAdjustment {
            message: format!("'{}' has negative amount {}", description, amount),
        });
    }
    Ok(())
}
