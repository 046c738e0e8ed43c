//! User-facing alerts raised by the guards.

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

pub const MAX_IDENTIFIER_LEN: usize = 64;

pub type IdentifierBuffer = ArrayString<MAX_IDENTIFIER_LEN>;

/// Stable key used to issue and later retract the same logical alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertIdentifier {
    pub manager_identifier: IdentifierBuffer,
    pub alert_identifier: IdentifierBuffer,
}

impl AlertIdentifier {
    /// Both parts are truncated to `MAX_IDENTIFIER_LEN` bytes on a char boundary.
    pub fn new(manager_identifier: &str, alert_identifier: &str) -> Self {
        Self {
            manager_identifier: truncated(manager_identifier),
            alert_identifier: truncated(alert_identifier),
        }
    }
}

impl core::fmt::Display for AlertIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.manager_identifier, self.alert_identifier)
    }
}

fn truncated(value: &str) -> IdentifierBuffer {
    let mut buffer = IdentifierBuffer::new();
    for ch in value.chars() {
        if buffer.try_push(ch).is_err() {
            break;
        }
    }
    buffer
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertContent {
    pub title: String,
    pub body: String,
    pub acknowledge_action_button_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertTrigger {
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub identifier: AlertIdentifier,
    pub foreground_content: Option<AlertContent>,
    pub background_content: Option<AlertContent>,
    pub trigger: AlertTrigger,
}

/// Channel through which guards raise and withdraw alerts.
///
/// Issuing an alert with an identifier that is already active replaces it.
/// Retracting an identifier that is not active does nothing.
pub trait AlertIssuer: Send + Sync {
    fn issue_alert(&self, alert: Alert);
    fn retract_alert(&self, identifier: &AlertIdentifier);
}

/// Issuer for hosts without an alert UI; alerts only reach the log.
#[derive(Debug, Default)]
pub struct LoggingAlertIssuer {
    active: Mutex<Vec<AlertIdentifier>>,
}

impl LoggingAlertIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_alerts(&self) -> Vec<AlertIdentifier> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AlertIssuer for LoggingAlertIssuer {
    fn issue_alert(&self, alert: Alert) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.contains(&alert.identifier) {
            active.push(alert.identifier);
        }
        let title = alert
            .foreground_content
            .as_ref()
            .map_or("", |content| content.title.as_str());
        warn!(identifier = %alert.identifier, title, "alert issued");
    }

    fn retract_alert(&self, identifier: &AlertIdentifier) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let before = active.len();
        active.retain(|id| id != identifier);
        if active.len() != before {
            info!(identifier = %identifier, "alert retracted");
        }
    }
}
