use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::types::UnitType;

/// how a water tier prices consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierMode {
    /// flat amount for any consumption inside the tier
    Fixed,
    /// previous tier's boundary total plus a per-m³ rate
    Incremental,
}

/// one row of a water tier table
///
/// `upper_bound` is inclusive for the first tier and exclusive for every
/// other tier; `None` marks the open-ended last tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaterTier {
    pub upper_bound: Option<Decimal>,
    pub rate: Money,
    pub mode: TierMode,
}

impl WaterTier {
    pub fn fixed(upper_bound: Decimal, amount: Money) -> Self {
        Self {
            upper_bound: Some(upper_bound),
            rate: amount,
            mode: TierMode::Fixed,
        }
    }

    pub fn incremental(upper_bound: Option<Decimal>, rate: Money) -> Self {
        Self {
            upper_bound,
            rate,
            mode: TierMode::Incremental,
        }
    }
}

/// tenant rate schedule, immutable for one billing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSchedule {
    /// peso per kWh
    pub electric_rate: Money,
    pub electric_minimum: Money,
    pub water_residential: Vec<WaterTier>,
    pub water_commercial: Vec<WaterTier>,
    /// peso per m² of floor area
    pub dues_rate: Money,
    /// peso per m² of parking area
    pub parking_rate: Money,
    /// flat special assessment for units that opt in
    pub sp_assessment_rate: Money,
    /// monthly penalty rate as a fraction
    pub penalty_rate: Rate,
    /// day of the following month on which a bill falls due
    #[serde(default = "default_due_day")]
    pub due_day_of_month: u32,
}

fn default_due_day() -> u32 {
    15
}

impl RateSchedule {
    /// schedule matching the association's current published rates
    pub fn standard() -> Self {
        Self {
            electric_rate: Money::from(dec!(8.39)),
            electric_minimum: Money::from_major(50),
            water_residential: residential_water_tiers(),
            water_commercial: commercial_water_tiers(),
            dues_rate: Money::from_major(60),
            parking_rate: Money::from_major(50),
            sp_assessment_rate: Money::from_major(500),
            penalty_rate: Rate::from_percentage(10),
            due_day_of_month: default_due_day(),
        }
    }

    /// parse and validate a schedule from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let schedule: RateSchedule = serde_json::from_str(json)?;
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// water tier table for a unit type
    pub fn water_tiers(&self, unit_type: UnitType) -> &[WaterTier] {
        match unit_type {
            UnitType::Residential => &self.water_residential,
            UnitType::Commercial => &self.water_commercial,
        }
    }

    /// reject malformed schedules before anything is computed with them
    pub fn validate(&self) -> Result<()> {
        let money_fields = [
            ("electric_rate", self.electric_rate),
            ("electric_minimum", self.electric_minimum),
            ("dues_rate", self.dues_rate),
            ("parking_rate", self.parking_rate),
            ("sp_assessment_rate", self.sp_assessment_rate),
        ];
        for (name, value) in money_fields {
            if value.is_negative() {
                return Err(invalid(format!("{} must not be negative, got {}", name, value)));
            }
        }

        if self.penalty_rate.is_negative() || self.penalty_rate > Rate::ONE {
            return Err(invalid(format!(
                "penalty_rate must be within 0..=1, got {}",
                self.penalty_rate.as_decimal()
            )));
        }

        if !(1..=28).contains(&self.due_day_of_month) {
            return Err(invalid(format!(
                "due_day_of_month must be within 1..=28, got {}",
                self.due_day_of_month
            )));
        }

        validate_tiers("water_residential", &self.water_residential)?;
        validate_tiers("water_commercial", &self.water_commercial)?;
        Ok(())
    }
}

fn validate_tiers(name: &str, tiers: &[WaterTier]) -> Result<()> {
    let first = tiers
        .first()
        .ok_or_else(|| invalid(format!("{} has no tiers", name)))?;
    if first.mode != TierMode::Fixed {
        return Err(invalid(format!("{} tier 1 must be fixed", name)));
    }

    let last_index = tiers.len() - 1;
    let mut previous_bound: Option<Decimal> = None;
    let mut seen_incremental = false;

    for (i, tier) in tiers.iter().enumerate() {
        if tier.rate.is_negative() {
            return Err(invalid(format!("{} tier {} has a negative rate", name, i + 1)));
        }

        match (tier.upper_bound, i == last_index) {
            (None, true) => {}
            (None, false) => {
                return Err(invalid(format!("{} tier {} is unbounded but not last", name, i + 1)));
            }
            (Some(_), true) => {
                return Err(invalid(format!("{} last tier must be unbounded", name)));
            }
            (Some(bound), false) => {
                if bound < Decimal::ZERO {
                    return Err(invalid(format!("{} tier {} bound is negative", name, i + 1)));
                }
                if let Some(prev) = previous_bound {
                    if bound <= prev {
                        return Err(invalid(format!(
                            "{} tier {} bound {} does not exceed {}",
                            name,
                            i + 1,
                            bound,
                            prev
                        )));
                    }
                }
                previous_bound = Some(bound);
            }
        }

        match tier.mode {
            TierMode::Incremental => seen_incremental = true,
            TierMode::Fixed if seen_incremental => {
                return Err(invalid(format!(
                    "{} tier {} is fixed after an incremental tier",
                    name,
                    i + 1
                )));
            }
            TierMode::Fixed => {}
        }
    }

    Ok(())
}

fn invalid(message: String) -> BillingError {
    BillingError::InvalidRateSchedule { message }
}

/// residential table validated against the association's billing sheet
pub fn residential_water_tiers() -> Vec<WaterTier> {
    vec![
        WaterTier::fixed(dec!(1), Money::from_major(80)),
        WaterTier::fixed(dec!(6), Money::from_major(200)),
        WaterTier::fixed(dec!(11), Money::from_major(370)),
        WaterTier::incremental(Some(dec!(21)), Money::from_major(40)),
        WaterTier::incremental(Some(dec!(31)), Money::from_major(45)),
        WaterTier::incremental(Some(dec!(41)), Money::from_major(50)),
        WaterTier::incremental(None, Money::from_major(55)),
    ]
}

/// commercial table; same breakpoints, commercial rates
pub fn commercial_water_tiers() -> Vec<WaterTier> {
    vec![
        WaterTier::fixed(dec!(1), Money::from_major(160)),
        WaterTier::fixed(dec!(6), Money::from_major(400)),
        WaterTier::fixed(dec!(11), Money::from_major(740)),
        WaterTier::incremental(Some(dec!(21)), Money::from_major(80)),
        WaterTier::incremental(Some(dec!(31)), Money::from_major(90)),
        WaterTier::incremental(Some(dec!(41)), Money::from_major(100)),
        WaterTier::incremental(None, Money::from_major(110)),
    ]
}
