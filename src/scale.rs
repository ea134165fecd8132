use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Aggregation bucket size for historical trend data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scale {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Error)]
#[error("invalid scale {0:?}, expected one of HOUR, DAY, WEEK, MONTH, YEAR")]
pub struct ParseScaleError(String);

impl Scale {
    pub const ALL: [Scale; 5] = [
        Scale::Hour,
        Scale::Day,
        Scale::Week,
        Scale::Month,
        Scale::Year,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scale::Hour => "HOUR",
            Scale::Day => "DAY",
            Scale::Week => "WEEK",
            Scale::Month => "MONTH",
            Scale::Year => "YEAR",
        }
    }

    /// Noise floor for production values at this scale, derived from the
    /// configured base threshold in watts.
    ///
    /// Hour bins carry energy-per-minute units, day bins kWh; coarser scales
    /// integrate transient sensor noise away, so no correction applies there.
    pub fn production_floor(self, base_watts: f64) -> f64 {
        match self {
            Scale::Hour => base_watts / 1000.0 / 60.0,
            Scale::Day => base_watts / 1000.0,
            Scale::Week | Scale::Month | Scale::Year => 0.0,
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = ParseScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scale::ALL
            .into_iter()
            .find(|scale| scale.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseScaleError(s.to_string()))
    }
}

/// Noise-floor correction for production readings.
///
/// The monitor always sees a trickle of solar production, even at night.
/// Readings strictly below the floor are rewritten to zero; the raw value is
/// kept alongside the cooked one so downstream consumers can tell them apart.
#[derive(Debug, Clone, Copy)]
pub struct Threshold {
    floor: f64,
}

impl Threshold {
    /// Floor for trend records at the given scale.
    pub fn for_scale(base_watts: f64, scale: Scale) -> Self {
        Self {
            floor: scale.production_floor(base_watts),
        }
    }

    /// Floor for the live path, where readings are plain watts.
    pub fn realtime(base_watts: f64) -> Self {
        Self { floor: base_watts }
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    pub fn apply(&self, raw: f64) -> f64 {
        if raw < self.floor {
            0.0
        } else {
            raw
        }
    }
}
