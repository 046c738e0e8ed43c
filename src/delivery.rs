//! Delivery uncertainty alerting.
//!
//! When the pump cannot confirm whether recent commands were delivered, the
//! user is shown a modal warning. Acknowledging it opens the pump's recovery
//! flow; when that flow is dismissed and delivery is still uncertain the
//! warning comes back. At most one warning is ever outstanding.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alert::AlertContent;

pub const DEFAULT_APP_NAME: &str = "Loop";

/// Pump-side view of delivery state.
pub trait PumpStatusSource {
    fn delivery_is_uncertain(&self) -> bool;
}

/// Builds the pump integration's delivery recovery flow.
pub trait RecoveryFlowFactory {
    fn recovery_flow(&self) -> RecoveryFlow;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryFlow {
    pub title: String,
    pub allow_debug_features: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presentation {
    UncertainDeliveryAlert(AlertContent),
    DeliveryRecovery(RecoveryFlow),
}

/// Modal presentation surface of the host UI.
pub trait AlertPresenter {
    fn present(&mut self, view: Presentation, animated: bool);
    fn dismiss_top_most(&mut self, animated: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UncertaintyAlertState {
    Idle,
    Alerting,
    Recovering,
}

pub struct DeliveryUncertaintyAlertManager<P, A> {
    pump: P,
    presenter: A,
    state: UncertaintyAlertState,
    alert_content: AlertContent,
}

impl<P, A> DeliveryUncertaintyAlertManager<P, A>
where
    P: PumpStatusSource + RecoveryFlowFactory,
    A: AlertPresenter,
{
    pub fn new(pump: P, presenter: A) -> Self {
        Self::with_app_name(pump, presenter, DEFAULT_APP_NAME)
    }

    pub fn with_app_name(pump: P, presenter: A, app_name: &str) -> Self {
        Self {
            pump,
            presenter,
            state: UncertaintyAlertState::Idle,
            alert_content: uncertain_delivery_content(app_name),
        }
    }

    pub fn state(&self) -> UncertaintyAlertState {
        self.state
    }

    pub fn presenter(&self) -> &A {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut A {
        &mut self.presenter
    }

    pub fn pump(&self) -> &P {
        &self.pump
    }

    pub fn pump_mut(&mut self) -> &mut P {
        &mut self.pump
    }

    /// Presents the warning unless one is already outstanding.
    pub fn show_alert(&mut self, animated: bool) {
        if self.state != UncertaintyAlertState::Idle {
            debug!(state = ?self.state, "uncertain delivery alert already outstanding");
            return;
        }

        self.presenter.dismiss_top_most(false);
        self.presenter.present(
            Presentation::UncertainDeliveryAlert(self.alert_content.clone()),
            animated,
        );
        self.transition(UncertaintyAlertState::Alerting);
    }

    /// User tapped "Learn More" on the warning.
    pub fn acknowledge_alert(&mut self) {
        if self.state != UncertaintyAlertState::Alerting {
            debug!(state = ?self.state, "ignoring acknowledgement without an alert");
            return;
        }

        self.presenter.dismiss_top_most(true);
        self.presenter
            .present(Presentation::DeliveryRecovery(self.pump.recovery_flow()), true);
        self.transition(UncertaintyAlertState::Recovering);
    }

    /// The recovery flow was dismissed; re-warn if the pump is still uncertain.
    pub fn recovery_did_complete(&mut self) {
        if self.state != UncertaintyAlertState::Recovering {
            debug!(state = ?self.state, "ignoring recovery completion outside recovery");
            return;
        }

        self.presenter.dismiss_top_most(true);
        self.transition(UncertaintyAlertState::Idle);

        if self.pump.delivery_is_uncertain() {
            // Non-animated so the warning replaces the recovery flow without flicker.
            self.show_alert(false);
        }
    }

    pub fn clear_alert(&mut self) {
        if self.state == UncertaintyAlertState::Idle {
            return;
        }

        self.presenter.dismiss_top_most(true);
        self.transition(UncertaintyAlertState::Idle);
    }

    /// Reacts to a pump status update.
    ///
    /// Certainty returning while the recovery flow is open leaves the flow in
    /// place; its completion settles the state.
    pub fn pump_status_did_change(&mut self, delivery_is_uncertain: bool) {
        match (delivery_is_uncertain, self.state) {
            (true, _) => self.show_alert(true),
            (false, UncertaintyAlertState::Alerting) => self.clear_alert(),
            (false, _) => {}
        }
    }

    fn transition(&mut self, next: UncertaintyAlertState) {
        debug!(from = ?self.state, to = ?next, "uncertain delivery alert state change");
        self.state = next;
    }
}

fn uncertain_delivery_content(app_name: &str) -> AlertContent {
    AlertContent {
        title: "Unable to Reach Pump".to_string(),
        body: format!(
            "{app_name} is unable to communicate with your insulin pump. The app will continue \
             trying to reach your pump, but insulin delivery information cannot be updated and \
             no automation can continue.\nYou can wait several minutes to see if the issue \
             resolves or tap the button below to learn more about other options."
        ),
        acknowledge_action_button_label: "Learn More".to_string(),
    }
}
