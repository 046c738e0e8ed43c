use loopguard::delivery::*;

#[derive(Debug, Clone, PartialEq)]
enum UiEvent {
    Present(Presentation, bool),
    Dismiss(bool),
}

#[derive(Default)]
struct RecordingPresenter {
    events: Vec<UiEvent>,
}

impl RecordingPresenter {
    fn presented(&self) -> Vec<&Presentation> {
        self.events
            .iter()
            .filter_map(|event| match event {
                UiEvent::Present(view, _) => Some(view),
                UiEvent::Dismiss(_) => None,
            })
            .collect()
    }
}

impl AlertPresenter for RecordingPresenter {
    fn present(&mut self, view: Presentation, animated: bool) {
        self.events.push(UiEvent::Present(view, animated));
    }

    fn dismiss_top_most(&mut self, animated: bool) {
        self.events.push(UiEvent::Dismiss(animated));
    }
}

struct TestPump {
    uncertain: bool,
}

impl PumpStatusSource for TestPump {
    fn delivery_is_uncertain(&self) -> bool {
        self.uncertain
    }
}

impl RecoveryFlowFactory for TestPump {
    fn recovery_flow(&self) -> RecoveryFlow {
        RecoveryFlow {
            title: "Pump Communication Recovery".to_string(),
            allow_debug_features: false,
        }
    }
}

type Manager = DeliveryUncertaintyAlertManager<TestPump, RecordingPresenter>;

fn manager(uncertain: bool) -> Manager {
    DeliveryUncertaintyAlertManager::new(TestPump { uncertain }, RecordingPresenter::default())
}

fn clear_events(manager: &mut Manager) {
    manager.presenter_mut().events.clear();
}

fn is_alert(view: &Presentation) -> bool {
    matches!(view, Presentation::UncertainDeliveryAlert(_))
}

#[test]
fn test_show_alert_presents_warning() {
    let mut manager = manager(true);
    manager.show_alert(true);

    assert_eq!(manager.state(), UncertaintyAlertState::Alerting);

    let events = &manager.presenter().events;
    assert_eq!(events.len(), 2);
    // Whatever is on top is cleared first, without animation
    assert_eq!(events[0], UiEvent::Dismiss(false));
    let UiEvent::Present(Presentation::UncertainDeliveryAlert(content), true) = &events[1] else {
        panic!("expected animated warning, got {:?}", events[1]);
    };
    assert_eq!(content.title, "Unable to Reach Pump");
    assert_eq!(content.acknowledge_action_button_label, "Learn More");
    assert!(content.body.starts_with("Loop is unable to communicate"));
}

#[test]
fn test_show_alert_is_idempotent() {
    let mut manager = manager(true);
    manager.show_alert(true);
    manager.show_alert(true);
    manager.show_alert(false);

    assert_eq!(manager.state(), UncertaintyAlertState::Alerting);
    let alerts = manager
        .presenter()
        .presented()
        .into_iter()
        .filter(|view| is_alert(view))
        .count();
    assert_eq!(alerts, 1);
}

#[test]
fn test_acknowledge_opens_recovery_flow() {
    let mut manager = manager(true);
    manager.show_alert(true);
    clear_events(&mut manager);

    manager.acknowledge_alert();

    assert_eq!(manager.state(), UncertaintyAlertState::Recovering);
    let events = &manager.presenter().events;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], UiEvent::Dismiss(true));
    let UiEvent::Present(Presentation::DeliveryRecovery(flow), true) = &events[1] else {
        panic!("expected animated recovery flow, got {:?}", events[1]);
    };
    assert_eq!(flow.title, "Pump Communication Recovery");
}

#[test]
fn test_show_alert_ignored_during_recovery() {
    let mut manager = manager(true);
    manager.show_alert(true);
    manager.acknowledge_alert();
    clear_events(&mut manager);

    manager.show_alert(true);

    assert_eq!(manager.state(), UncertaintyAlertState::Recovering);
    assert!(manager.presenter().events.is_empty());
}

#[test]
fn test_recovery_complete_with_certain_pump_goes_idle() {
    let mut manager = manager(true);
    manager.show_alert(true);
    manager.acknowledge_alert();
    manager.pump_mut().uncertain = false;
    clear_events(&mut manager);

    manager.recovery_did_complete();

    assert_eq!(manager.state(), UncertaintyAlertState::Idle);
    assert_eq!(manager.presenter().events, vec![UiEvent::Dismiss(true)]);
}

#[test]
fn test_recovery_complete_with_uncertain_pump_warns_again() {
    let mut manager = manager(true);
    manager.show_alert(true);
    manager.acknowledge_alert();
    clear_events(&mut manager);

    manager.recovery_did_complete();

    assert_eq!(manager.state(), UncertaintyAlertState::Alerting);
    let events = &manager.presenter().events;
    assert_eq!(events[0], UiEvent::Dismiss(true));
    // The warning returns without animation
    assert!(matches!(
        events.last(),
        Some(UiEvent::Present(Presentation::UncertainDeliveryAlert(_), false))
    ));
}

#[test]
fn test_clear_alert_from_every_state() {
    // Idle: nothing to dismiss
    let mut idle = manager(false);
    idle.clear_alert();
    assert_eq!(idle.state(), UncertaintyAlertState::Idle);
    assert!(idle.presenter().events.is_empty());

    // Alerting
    let mut alerting = manager(true);
    alerting.show_alert(true);
    clear_events(&mut alerting);
    alerting.clear_alert();
    assert_eq!(alerting.state(), UncertaintyAlertState::Idle);
    assert_eq!(alerting.presenter().events, vec![UiEvent::Dismiss(true)]);

    // Recovering
    let mut recovering = manager(true);
    recovering.show_alert(true);
    recovering.acknowledge_alert();
    clear_events(&mut recovering);
    recovering.clear_alert();
    assert_eq!(recovering.state(), UncertaintyAlertState::Idle);
    assert_eq!(recovering.presenter().events, vec![UiEvent::Dismiss(true)]);
}

#[test]
fn test_pump_status_changes_drive_alert() {
    let mut manager = manager(false);

    manager.pump_mut().uncertain = true;
    manager.pump_status_did_change(true);
    assert_eq!(manager.state(), UncertaintyAlertState::Alerting);

    manager.pump_mut().uncertain = false;
    manager.pump_status_did_change(false);
    assert_eq!(manager.state(), UncertaintyAlertState::Idle);

    // Certainty while idle changes nothing
    clear_events(&mut manager);
    manager.pump_status_did_change(false);
    assert_eq!(manager.state(), UncertaintyAlertState::Idle);
    assert!(manager.presenter().events.is_empty());
}

#[test]
fn test_certainty_during_recovery_keeps_flow_open() {
    let mut manager = manager(true);
    manager.show_alert(true);
    manager.acknowledge_alert();

    manager.pump_mut().uncertain = false;
    manager.pump_status_did_change(false);
    assert_eq!(manager.state(), UncertaintyAlertState::Recovering);

    manager.recovery_did_complete();
    assert_eq!(manager.state(), UncertaintyAlertState::Idle);
}

#[test]
fn test_at_most_one_warning_over_a_long_session() {
    let mut manager = manager(true);

    for _ in 0..5 {
        manager.pump_status_did_change(true);
        manager.show_alert(true);
        manager.acknowledge_alert();
        manager.pump_status_did_change(true);
        manager.recovery_did_complete();
    }

    // Every warning is followed by a dismissal before the next one appears
    let mut outstanding = 0i32;
    for event in &manager.presenter().events {
        match event {
            UiEvent::Present(view, _) if is_alert(view) => {
                outstanding += 1;
                assert!(outstanding <= 1, "two warnings outstanding at once");
            }
            UiEvent::Present(_, _) => {}
            UiEvent::Dismiss(_) => outstanding = 0,
        }
    }
    assert_eq!(manager.state(), UncertaintyAlertState::Alerting);
}
