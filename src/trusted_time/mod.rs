//! Trusted time monitoring.
//!
//! Dose timing math assumes the device clock is right. The monitor compares
//! the clock against an external reference whenever the app comes to the
//! foreground or the control loop runs, persists the detected offset and
//! raises an alert while the drift exceeds the acceptable delta.

pub mod clock;
pub mod reference;
pub mod sntp;
pub mod store;

pub use clock::{DeviceClock, SystemClock};
pub use reference::{
    FetchResult, ReferenceFetcher, ReferenceTime, TimeReferenceClient, TimeReferenceError,
};
pub use sntp::SntpClient;
pub use store::{JsonFileOffsetStore, MemoryOffsetStore, OffsetStore, OffsetStoreError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertContent, AlertIdentifier, AlertIssuer, AlertTrigger};

pub const ACCEPTABLE_TIME_DELTA_SECS: f64 = 120.0;
pub const DEFAULT_REFERENCE_MAX_AGE_SECS: u64 = 300;
pub const DEFAULT_LOOP_INTERVAL_SECS: u64 = 300;

pub const ALERT_MANAGER_IDENTIFIER: &str = "Loop";
pub const TIME_CHANGE_ALERT_IDENTIFIER: &str = "significantTimeChange";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeMonitorConfig {
    pub acceptable_time_delta_secs: f64,
    pub reference_max_age_secs: u64,
    pub ntp_server: String,
    pub ntp_timeout_ms: u64,
    /// Period of the loop-completed tick driven by the `time-monitor` binary.
    pub loop_interval_secs: u64,
    pub offset_store_path: Option<PathBuf>,
    pub app_name: String,
    pub device_name: String,
}

impl Default for TimeMonitorConfig {
    fn default() -> Self {
        Self {
            acceptable_time_delta_secs: ACCEPTABLE_TIME_DELTA_SECS,
            reference_max_age_secs: DEFAULT_REFERENCE_MAX_AGE_SECS,
            ntp_server: sntp::DEFAULT_NTP_SERVER.to_string(),
            ntp_timeout_ms: sntp::DEFAULT_NTP_TIMEOUT_MS,
            loop_interval_secs: DEFAULT_LOOP_INTERVAL_SECS,
            offset_store_path: None,
            app_name: "Loop".to_string(),
            device_name: "Phone".to_string(),
        }
    }
}

impl TimeMonitorConfig {
    pub fn reference_max_age(&self) -> Duration {
        Duration::from_secs(self.reference_max_age_secs)
    }

    pub fn ntp_timeout(&self) -> Duration {
        Duration::from_millis(self.ntp_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeCheckTrigger {
    Startup,
    AppForeground,
    LoopCompleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimeCheckOutcome {
    /// Drift beyond the acceptable delta; the alert is active.
    Drifted { offset_secs: f64 },
    InSync,
    /// The reference could not be reached; state is unchanged.
    FetchFailed(TimeReferenceError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeTrustState {
    pub detected_offset_secs: f64,
}

pub fn time_change_alert_identifier() -> AlertIdentifier {
    AlertIdentifier::new(ALERT_MANAGER_IDENTIFIER, TIME_CHANGE_ALERT_IDENTIFIER)
}

pub struct TrustedTimeMonitor<C> {
    fetcher: ReferenceFetcher<C>,
    store: Arc<dyn OffsetStore>,
    alerts: Arc<dyn AlertIssuer>,
    clock: Arc<dyn DeviceClock>,
    config: TimeMonitorConfig,
    state: Mutex<TimeTrustState>,
}

impl<C: TimeReferenceClient> TrustedTimeMonitor<C> {
    /// Creates the monitor, restoring the last persisted offset.
    pub fn new(
        client: C,
        store: Arc<dyn OffsetStore>,
        alerts: Arc<dyn AlertIssuer>,
        clock: Arc<dyn DeviceClock>,
        config: TimeMonitorConfig,
    ) -> Self {
        let detected_offset_secs = match store.load() {
            Ok(Some(offset)) => {
                info!(offset_secs = offset, "restored detected system time offset");
                offset
            }
            Ok(None) => 0.0,
            Err(e) => {
                error!(error = %e, "failed to restore detected system time offset");
                0.0
            }
        };

        Self {
            fetcher: ReferenceFetcher::new(client, config.reference_max_age()),
            store,
            alerts,
            clock,
            config,
            state: Mutex::new(TimeTrustState { detected_offset_secs }),
        }
    }

    pub fn detected_offset_secs(&self) -> f64 {
        self.lock().detected_offset_secs
    }

    pub fn config(&self) -> &TimeMonitorConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &ReferenceFetcher<C> {
        &self.fetcher
    }

    /// Fetches the reference if needed and re-evaluates the drift alert.
    ///
    /// Fetch failures are logged and leave state untouched; the next trigger
    /// retries.
    pub async fn check_trusted_time(&self) -> TimeCheckOutcome {
        match self.fetcher.fetch_if_needed(self.clock.uptime()).await {
            Ok(reference) => self.evaluate(&reference),
            Err(e) => {
                error!(error = %e, "error getting reference time");
                TimeCheckOutcome::FetchFailed(e)
            }
        }
    }

    /// Applies a reference reading to the trust state.
    pub fn evaluate(&self, reference: &ReferenceTime) -> TimeCheckOutcome {
        let mut state = self.lock();

        let device_now = self.clock.now();
        let reference_now = reference.now(self.clock.uptime());
        let delta = self.measured_offset_secs(reference);

        if delta.abs() > self.config.acceptable_time_delta_secs {
            warn!(
                reference_now = %reference_now,
                device_now = %device_now,
                offset_secs = delta,
                "significant system time change"
            );
            state.detected_offset_secs = delta;
            self.persist(delta);
            self.alerts.issue_alert(self.time_changed_alert());
            TimeCheckOutcome::Drifted { offset_secs: delta }
        } else {
            debug!(offset_secs = delta, "system time within acceptable delta");
            state.detected_offset_secs = 0.0;
            self.persist(0.0);
            self.alerts.retract_alert(&time_change_alert_identifier());
            TimeCheckOutcome::InSync
        }
    }

    /// Signed seconds the reference runs ahead of the device clock.
    pub fn measured_offset_secs(&self, reference: &ReferenceTime) -> f64 {
        seconds(reference.now(self.clock.uptime()) - self.clock.now())
    }

    fn persist(&self, offset_secs: f64) {
        if let Err(e) = self.store.store(offset_secs) {
            error!(error = %e, "failed to persist detected system time offset");
        }
    }

    fn time_changed_alert(&self) -> Alert {
        let device = &self.config.device_name;
        let app = &self.config.app_name;
        let content = AlertContent {
            title: format!("{device} Time Settings Need Attention"),
            body: format!(
                "Your {device}'s time has been changed. {app} needs accurate time records to \
                 predict your glucose and adjust your insulin accordingly.\n\nCheck your \
                 {device} settings (General / Date & Time) and verify that Set Automatically \
                 is turned ON. Failure to resolve could lead to serious under-delivery or \
                 over-delivery of insulin."
            ),
            acknowledge_action_button_label: "OK".to_string(),
        };

        Alert {
            identifier: time_change_alert_identifier(),
            foreground_content: Some(content.clone()),
            background_content: Some(content),
            trigger: AlertTrigger::Immediate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimeTrustState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: TimeReferenceClient + 'static> TrustedTimeMonitor<C> {
    /// Runs a startup check, then one check per trigger until the sender side
    /// closes. Checks already started are awaited before returning.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<TimeCheckTrigger>) {
        let mut checks = JoinSet::new();
        Self::spawn_check(&self, &mut checks, TimeCheckTrigger::Startup);

        while let Some(trigger) = triggers.recv().await {
            Self::spawn_check(&self, &mut checks, trigger);
            while checks.try_join_next().is_some() {}
        }

        while checks.join_next().await.is_some() {}
        debug!("trusted time monitor stopped");
    }

    fn spawn_check(
        monitor: &Arc<Self>,
        checks: &mut JoinSet<TimeCheckOutcome>,
        trigger: TimeCheckTrigger,
    ) {
        debug!(?trigger, "trusted time check triggered");
        let monitor = Arc::clone(monitor);
        checks.spawn(async move { monitor.check_trusted_time().await });
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds(delta: chrono::Duration) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LoggingAlertIssuer;
    use chrono::{DateTime, TimeZone, Utc};

    struct FixedClock(DateTime<Utc>);

    impl DeviceClock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        fn uptime(&self) -> Duration {
            Duration::from_secs(1000)
        }
    }

    struct UnreachableClient;

    impl TimeReferenceClient for UnreachableClient {
        async fn fetch(&self) -> FetchResult {
            Err(TimeReferenceError::Timeout)
        }
    }

    fn monitor(store: Arc<MemoryOffsetStore>) -> TrustedTimeMonitor<UnreachableClient> {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        TrustedTimeMonitor::new(
            UnreachableClient,
            store,
            Arc::new(LoggingAlertIssuer::new()),
            Arc::new(FixedClock(now)),
            TimeMonitorConfig::default(),
        )
    }

    #[test]
    fn test_offset_restored_at_construction() {
        let monitor = monitor(Arc::new(MemoryOffsetStore::with_value(-300.0)));
        assert_eq!(monitor.detected_offset_secs(), -300.0);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_unchanged() {
        let store = Arc::new(MemoryOffsetStore::with_value(200.0));
        let monitor = monitor(Arc::clone(&store));

        let outcome = monitor.check_trusted_time().await;
        assert_eq!(outcome, TimeCheckOutcome::FetchFailed(TimeReferenceError::Timeout));
        assert_eq!(monitor.detected_offset_secs(), 200.0);
        assert_eq!(store.value(), Some(200.0));
    }
}
