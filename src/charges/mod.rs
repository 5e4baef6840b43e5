pub mod water;

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RateSchedule;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{MeterReading, UnitType, UtilityType};

pub use water::{tiered_water_charge, WaterCharge};

/// converts consumption and areas into peso amounts
pub struct ChargeCalculator<'a> {
    schedule: &'a RateSchedule,
}

impl<'a> ChargeCalculator<'a> {
    /// validates the schedule up front so no charge is computed from a malformed one
    pub fn new(schedule: &'a RateSchedule) -> Result<Self> {
        schedule.validate()?;
        Ok(Self { schedule })
    }

    pub fn schedule(&self) -> &RateSchedule {
        self.schedule
    }

    /// `max(consumption * rate, minimum)`
    pub fn electric(&self, consumption: Decimal) -> Result<Money> {
        ensure_non_negative(consumption)?;
        let metered = (self.schedule.electric_rate * consumption).round_centavo();
        Ok(metered.max(self.schedule.electric_minimum))
    }

    pub fn water(&self, consumption: Decimal, unit_type: UnitType) -> Result<WaterCharge> {
        ensure_non_negative(consumption)?;
        tiered_water_charge(self.schedule.water_tiers(unit_type), consumption)
    }

    /// `area * dues_rate`
    pub fn dues(&self, area: Decimal) -> Result<Money> {
        ensure_area(area)?;
        Ok((self.schedule.dues_rate * area).round_centavo())
    }

    /// `parking_area * parking_rate`, zero for units without a slot
    pub fn parking(&self, parking_area: Decimal) -> Result<Money> {
        ensure_area(parking_area)?;
        Ok((self.schedule.parking_rate * parking_area).round_centavo())
    }

    pub fn sp_assessment(&self) -> Money {
        self.schedule.sp_assessment_rate
    }

    /// price a reading according to its utility
    pub fn charge_reading(&self, reading: &MeterReading, unit_type: UnitType) -> Result<Money> {
        let consumption = reading.consumption();
        let amount = match reading.utility {
            UtilityType::Electric => self.electric(consumption)?,
            UtilityType::Water => self.water(consumption, unit_type)?.amount,
        };

        debug!(
            unit_id = %reading.unit_id,
            period = %reading.period,
            utility = ?reading.utility,
            %consumption,
            %amount,
            "priced meter reading"
        );

        Ok(amount)
    }
}

fn ensure_non_negative(consumption: Decimal) -> Result<()> {
    if consumption < Decimal::ZERO {
        return Err(BillingError::NegativeConsumption { consumption });
    }
    Ok(())
}

fn ensure_area(area: Decimal) -> Result<()> {
    if area < Decimal::ZERO {
        return Err(BillingError::InvalidArea {
            message: format!("area must not be negative, got {}", area),
        });
    }
    Ok(())
}
