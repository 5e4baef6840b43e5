use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{TierMode, WaterTier};
use crate::decimal::Money;
use crate::errors::{BillingError, Result};

/// priced water consumption
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaterCharge {
    pub consumption: Decimal,
    pub amount: Money,
    /// 1-based index of the tier that priced the consumption
    pub tier: usize,
}

/// price `consumption` against a tier table
///
/// Tier 1 captures `consumption <= bound`; every later tier captures
/// `consumption < bound`. An incremental tier charges the running total at
/// the previous tier's boundary plus `(consumption - (previous_bound - 1)) * rate`,
/// and its own boundary total is chained forward as
/// `total + (bound - previous_bound) * rate`.
pub fn tiered_water_charge(tiers: &[WaterTier], consumption: Decimal) -> Result<WaterCharge> {
    let mut boundary_total = Money::ZERO;
    let mut previous_bound = Decimal::ZERO;

    for (i, tier) in tiers.iter().enumerate() {
        let in_tier = match tier.upper_bound {
            None => true,
            Some(bound) if i == 0 => consumption <= bound,
            Some(bound) => consumption < bound,
        };

        if in_tier {
            let amount = match tier.mode {
                TierMode::Fixed => tier.rate,
                TierMode::Incremental => {
                    boundary_total + tier.rate * (consumption - (previous_bound - Decimal::ONE))
                }
            };
            return Ok(WaterCharge {
                consumption,
                amount: amount.round_centavo(),
                tier: i + 1,
            });
        }

        // only bounded tiers reach this point
        let bound = tier.upper_bound.unwrap_or(previous_bound);
        boundary_total = match tier.mode {
            TierMode::Fixed => tier.rate,
            TierMode::Incremental => boundary_total + tier.rate * (bound - previous_bound),
        };
        previous_bound = bound;
    }

    Err(BillingError::InvalidRateSchedule {
        message: format!("no water tier covers consumption {}", consumption),
    })
}
