use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::{duration_secs, option_duration_secs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideCommand {
    pub preset_name: String,
    #[serde(default, with = "option_duration_secs")]
    pub duration: Option<Duration>,
    pub remote_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "seconds", rename_all = "snake_case")]
pub enum OverrideDuration {
    Indefinite,
    Finite(#[serde(with = "duration_secs")] Duration),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverrideSettings {
    /// Glucose target range (lower, upper) in mg/dL.
    #[serde(default)]
    pub target_range: Option<(f64, f64)>,
    #[serde(default)]
    pub insulin_needs_scale_factor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverridePreset {
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub settings: OverrideSettings,
    pub duration: OverrideDuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnactTrigger {
    /// Enacted on behalf of the remote sender at this address.
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryScheduleOverride {
    pub preset: OverridePreset,
    pub settings: OverrideSettings,
    pub start_date: DateTime<Utc>,
    pub duration: OverrideDuration,
    pub enact_trigger: EnactTrigger,
}

impl OverridePreset {
    pub fn new(name: impl Into<String>, duration: OverrideDuration) -> Self {
        Self {
            name: name.into(),
            symbol: String::new(),
            settings: OverrideSettings::default(),
            duration,
        }
    }

    pub fn create_override(
        &self,
        enact_trigger: EnactTrigger,
        start_date: DateTime<Utc>,
    ) -> TemporaryScheduleOverride {
        TemporaryScheduleOverride {
            preset: self.clone(),
            settings: self.settings.clone(),
            start_date,
            duration: self.duration,
            enact_trigger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverrideActionError {
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
    #[error("Duration exceeds: {:.1} hours", hours(.0))]
    DurationExceedsMax(Duration),
    #[error("Negative duration not allowed")]
    NegativeDuration,
}

#[allow(clippy::cast_precision_loss)]
fn hours(duration: &Duration) -> f64 {
    duration.num_seconds() as f64 / 3600.0
}

/// Activates an allowed preset on behalf of a remote sender.
///
/// A zero duration means the override runs until cancelled; without a
/// duration the preset's own one applies.
pub fn validate_override(
    command: &OverrideCommand,
    allowed_presets: &[OverridePreset],
    max_override_duration: Duration,
    now: DateTime<Utc>,
) -> Result<TemporaryScheduleOverride, OverrideActionError> {
    let preset = allowed_presets
        .iter()
        .find(|preset| preset.name == command.preset_name)
        .ok_or_else(|| OverrideActionError::UnknownPreset(command.preset_name.clone()))?;

    let mut remote_override =
        preset.create_override(EnactTrigger::Remote(command.remote_address.clone()), now);

    if let Some(duration) = command.duration {
        if duration > max_override_duration {
            return Err(OverrideActionError::DurationExceedsMax(max_override_duration));
        }

        if duration < Duration::zero() {
            return Err(OverrideActionError::NegativeDuration);
        }

        remote_override.duration = if duration.is_zero() {
            OverrideDuration::Indefinite
        } else {
            OverrideDuration::Finite(duration)
        };
    }

    Ok(remote_override)
}
