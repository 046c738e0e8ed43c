//! Validation of remotely issued commands.
//!
//! Each command kind has its own validator and error taxonomy. Validators are
//! pure: they read a rules snapshot and the current time and either produce
//! an action for the dosing layer or reject the command.

pub mod bolus;
pub mod carb;
pub mod overrides;

pub use bolus::{validate_bolus, BolusActionError, BolusCommand};
pub use carb::{validate_carb, CarbActionError, CarbCommand, Mass, NewCarbEntry};
pub use overrides::{
    validate_override, EnactTrigger, OverrideActionError, OverrideCommand, OverrideDuration,
    OverridePreset, OverrideSettings, TemporaryScheduleOverride,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::rules::ValidationRules;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteCommand {
    Bolus(BolusCommand),
    Carb(CarbCommand),
    Override(OverrideCommand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidatedAction {
    BolusDeliveryRequest { amount: f64 },
    CarbEntryRequest(NewCarbEntry),
    OverrideActivationRequest(TemporaryScheduleOverride),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteCommandError {
    #[error(transparent)]
    Bolus(#[from] BolusActionError),
    #[error(transparent)]
    Carb(#[from] CarbActionError),
    #[error(transparent)]
    Override(#[from] OverrideActionError),
}

impl RemoteCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteCommand::Bolus(_) => "bolus",
            RemoteCommand::Carb(_) => "carb",
            RemoteCommand::Override(_) => "override",
        }
    }

    pub fn validate(
        &self,
        rules: &ValidationRules,
        now: DateTime<Utc>,
    ) -> Result<ValidatedAction, RemoteCommandError> {
        let result = match self {
            RemoteCommand::Bolus(command) => validate_bolus(command, rules.maximum_bolus)
                .map(|amount| ValidatedAction::BolusDeliveryRequest { amount })
                .map_err(RemoteCommandError::from),
            RemoteCommand::Carb(command) => validate_carb(command, rules, now)
                .map(ValidatedAction::CarbEntryRequest)
                .map_err(RemoteCommandError::from),
            RemoteCommand::Override(command) => validate_override(
                command,
                &rules.allowed_override_presets,
                rules.max_override_duration_time,
                now,
            )
            .map(ValidatedAction::OverrideActivationRequest)
            .map_err(RemoteCommandError::from),
        };

        match &result {
            Ok(_) => debug!(kind = self.kind(), "remote command accepted"),
            Err(e) => warn!(kind = self.kind(), error = %e, "remote command rejected"),
        }

        result
    }
}
