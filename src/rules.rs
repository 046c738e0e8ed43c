//! Validation limits applied to remotely issued commands.
//!
//! The defaults mirror the constants the dosing application ships with. The
//! maximum bolus has no default: it comes from the user's therapy settings and
//! a missing value is reported as its own error.

use chrono::Duration;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::remote::overrides::OverridePreset;

pub const MAX_OVERRIDE_PRESETS: usize = 16;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * SECONDS_PER_MINUTE;

pub const DEFAULT_MAX_CARB_ENTRY_GRAMS: f64 = 250.0;
pub const DEFAULT_ABSORPTION_TIME_SECS: i64 = 3 * SECONDS_PER_HOUR;
pub const MIN_ABSORPTION_TIME_SECS: i64 = 30 * SECONDS_PER_MINUTE;
pub const MAX_ABSORPTION_TIME_SECS: i64 = 8 * SECONDS_PER_HOUR;
pub const MAX_CARB_ENTRY_PAST_TIME_SECS: i64 = -12 * SECONDS_PER_HOUR;
pub const MAX_CARB_ENTRY_FUTURE_TIME_SECS: i64 = SECONDS_PER_HOUR;
pub const MAX_OVERRIDE_DURATION_SECS: i64 = 24 * SECONDS_PER_HOUR;
/// Widest carb entry window accepted on either side of now.
pub const MAX_CARB_ENTRY_WINDOW_SECS: i64 = 7 * 24 * SECONDS_PER_HOUR;

const_assert!(MIN_ABSORPTION_TIME_SECS <= DEFAULT_ABSORPTION_TIME_SECS);
const_assert!(DEFAULT_ABSORPTION_TIME_SECS <= MAX_ABSORPTION_TIME_SECS);
const_assert!(MAX_CARB_ENTRY_PAST_TIME_SECS <= 0);
const_assert!(MAX_CARB_ENTRY_FUTURE_TIME_SECS >= 0);
const_assert!(MAX_OVERRIDE_DURATION_SECS > 0);
const_assert!(-MAX_CARB_ENTRY_PAST_TIME_SECS <= MAX_CARB_ENTRY_WINDOW_SECS);
const_assert!(MAX_CARB_ENTRY_FUTURE_TIME_SECS <= MAX_CARB_ENTRY_WINDOW_SECS);

pub type PresetTable = Vec<OverridePreset, MAX_OVERRIDE_PRESETS>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub maximum_bolus: Option<f64>,
    pub max_carb_entry_quantity: f64,
    #[serde(with = "duration_secs")]
    pub default_absorption_time: Duration,
    #[serde(with = "duration_secs")]
    pub min_absorption_time: Duration,
    #[serde(with = "duration_secs")]
    pub max_absorption_time: Duration,
    /// Signed offset from now; entries may start at most this far in the past.
    #[serde(with = "duration_secs")]
    pub max_carb_entry_past_time: Duration,
    #[serde(with = "duration_secs")]
    pub max_carb_entry_future_time: Duration,
    pub allowed_override_presets: PresetTable,
    #[serde(with = "duration_secs")]
    pub max_override_duration_time: Duration,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            maximum_bolus: None,
            max_carb_entry_quantity: DEFAULT_MAX_CARB_ENTRY_GRAMS,
            default_absorption_time: Duration::seconds(DEFAULT_ABSORPTION_TIME_SECS),
            min_absorption_time: Duration::seconds(MIN_ABSORPTION_TIME_SECS),
            max_absorption_time: Duration::seconds(MAX_ABSORPTION_TIME_SECS),
            max_carb_entry_past_time: Duration::seconds(MAX_CARB_ENTRY_PAST_TIME_SECS),
            max_carb_entry_future_time: Duration::seconds(MAX_CARB_ENTRY_FUTURE_TIME_SECS),
            allowed_override_presets: Vec::new(),
            max_override_duration_time: Duration::seconds(MAX_OVERRIDE_DURATION_SECS),
        }
    }
}

impl ValidationRules {
    pub fn with_maximum_bolus(mut self, maximum_bolus: f64) -> Self {
        self.maximum_bolus = Some(maximum_bolus);
        self
    }

    /// Adds a preset to the allowed table, failing when the table is full.
    pub fn allow_preset(&mut self, preset: OverridePreset) -> Result<(), OverridePreset> {
        self.allowed_override_presets.push(preset)
    }

    pub fn find_preset(&self, name: &str) -> Option<&OverridePreset> {
        self.allowed_override_presets.iter().find(|preset| preset.name == name)
    }

    /// Reports the first inconsistency between the configured limits, if any.
    pub fn consistency_error(&self) -> Option<&'static str> {
        if self.min_absorption_time > self.max_absorption_time {
            return Some("minimum absorption time exceeds maximum absorption time");
        }
        if self.default_absorption_time < self.min_absorption_time
            || self.default_absorption_time > self.max_absorption_time
        {
            return Some("default absorption time is outside the allowed range");
        }
        if self.max_carb_entry_past_time > Duration::zero() {
            return Some("carb entry past window must not be positive");
        }
        if self.max_carb_entry_future_time < Duration::zero() {
            return Some("carb entry future window must not be negative");
        }
        let widest = Duration::seconds(MAX_CARB_ENTRY_WINDOW_SECS);
        if self.max_carb_entry_past_time < -widest || self.max_carb_entry_future_time > widest {
            return Some("carb entry window exceeds seven days");
        }
        if self.max_carb_entry_quantity.is_nan() || self.max_carb_entry_quantity <= 0.0 {
            return Some("maximum carb entry quantity must be positive");
        }
        if matches!(self.maximum_bolus, Some(max) if max.is_nan() || max <= 0.0) {
            return Some("maximum bolus must be positive when configured");
        }
        if self.max_override_duration_time <= Duration::zero() {
            return Some("maximum override duration must be positive");
        }
        None
    }
}

/// Serializes a signed duration as whole seconds.
pub mod duration_secs {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs).ok_or_else(|| D::Error::custom("duration out of range"))
    }
}

pub mod option_duration_secs {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<i64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_seconds(secs)
                .map(Some)
                .ok_or_else(|| D::Error::custom("duration out of range")),
            None => Ok(None),
        }
    }
}
