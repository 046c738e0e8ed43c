use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BolusCommand {
    pub amount_in_units: f64,
}

impl BolusCommand {
    pub fn new(amount_in_units: f64) -> Self {
        Self { amount_in_units }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BolusActionError {
    #[error("Invalid bolus")]
    InvalidBolus,
    #[error("Missing maximum allowed bolus in settings")]
    MissingMaxBolus,
    #[error("Exceeds maximum allowed bolus in settings")]
    ExceedsMaxBolus,
}

/// Returns the deliverable amount, or the first limit the command violates.
///
/// The amount check runs before the ceiling lookup, so a non-positive amount
/// is reported as invalid even when no ceiling is configured.
pub fn validate_bolus(
    command: &BolusCommand,
    maximum_bolus: Option<f64>,
) -> Result<f64, BolusActionError> {
    let amount = command.amount_in_units;
    if amount.is_nan() || amount <= 0.0 {
        return Err(BolusActionError::InvalidBolus);
    }

    let Some(max_bolus) = maximum_bolus else {
        return Err(BolusActionError::MissingMaxBolus);
    };

    // A ceiling that cannot be compared rejects every amount
    if max_bolus.is_nan() || amount > max_bolus {
        return Err(BolusActionError::ExceedsMaxBolus);
    }

    Ok(amount)
}
