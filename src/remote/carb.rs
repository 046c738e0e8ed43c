use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::{option_duration_secs, ValidationRules};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CarbCommand {
    pub amount_in_grams: f64,
    #[serde(default, with = "option_duration_secs")]
    pub absorption_time: Option<Duration>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub food_type: Option<String>,
}

impl CarbCommand {
    pub fn new(amount_in_grams: f64) -> Self {
        Self {
            amount_in_grams,
            ..Self::default()
        }
    }
}

/// A mass quantity. Carb amounts are carried in grams.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Mass {
    grams: f64,
}

impl Mass {
    pub fn grams(grams: f64) -> Self {
        Self { grams }
    }

    pub fn as_grams(&self) -> f64 {
        self.grams
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCarbEntry {
    pub quantity: Mass,
    pub start_date: DateTime<Utc>,
    pub food_type: Option<String>,
    #[serde(with = "crate::rules::duration_secs")]
    pub absorption_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CarbActionError {
    #[error("Invalid absorption time: {} hours", .0.num_hours())]
    InvalidAbsorptionTime(Duration),
    #[error("Invalid carb amount")]
    InvalidCarbs,
    #[error("Exceeds maximum allowed carbs")]
    ExceedsMaxCarbs,
    #[error("Start time is out of range: {}", .0.format("%H:%M:%S"))]
    InvalidStartDate(DateTime<Utc>),
}

/// Converts a carb command into a carb entry.
///
/// Checks run in a fixed order: absorption time, then quantity, then start
/// date. A command violating several limits reports the earliest one.
pub fn validate_carb(
    command: &CarbCommand,
    rules: &ValidationRules,
    now: DateTime<Utc>,
) -> Result<NewCarbEntry, CarbActionError> {
    let absorption_time = command
        .absorption_time
        .unwrap_or(rules.default_absorption_time);
    if absorption_time < rules.min_absorption_time || absorption_time > rules.max_absorption_time {
        return Err(CarbActionError::InvalidAbsorptionTime(absorption_time));
    }

    let grams = command.amount_in_grams;
    if grams.is_nan() || grams <= 0.0 {
        return Err(CarbActionError::InvalidCarbs);
    }

    if rules.max_carb_entry_quantity.is_nan() || grams > rules.max_carb_entry_quantity {
        return Err(CarbActionError::ExceedsMaxCarbs);
    }

    if let Some(start_date) = command.start_date {
        // A bound beyond the representable range leaves that side open
        let too_early = now
            .checked_add_signed(rules.max_carb_entry_past_time)
            .is_some_and(|min_start_date| start_date < min_start_date);
        let too_late = now
            .checked_add_signed(rules.max_carb_entry_future_time)
            .is_some_and(|max_start_date| start_date > max_start_date);
        if too_early || too_late {
            return Err(CarbActionError::InvalidStartDate(start_date));
        }
    }

    Ok(NewCarbEntry {
        quantity: Mass::grams(grams),
        start_date: command.start_date.unwrap_or(now),
        food_type: command.food_type.clone(),
        absorption_time,
    })
}
