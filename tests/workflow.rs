use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::Receiver;

use bodyscale_pairing::error::{ConnectError, DecodeError, PersistError, WorkflowError};
use bodyscale_pairing::record::store::MeasurementStore;
use bodyscale_pairing::scale::connector::{ConnectorTimings, DeviceConnector, DiscoveryFilter};
use bodyscale_pairing::scale::constants::{BATTERY_LEVEL_CHARACTERISTIC, WEIGHT_MEASUREMENT_CHARACTERISTIC};
use bodyscale_pairing::scale::replay::ReplayTransport;
use bodyscale_pairing::scale::types::{FailureReason, ScaleReading, WorkflowEvent, WorkflowState};
use bodyscale_pairing::scale::workflow::{ByAddress, FirstCandidate, PairingWorkflow, WorkflowSettings};

#[derive(Default)]
struct MemoryStore {
    saved: Mutex<Vec<(ScaleReading, Option<f64>)>>,
    reject: bool,
}

impl MemoryStore {
    fn rejecting() -> Self {
        MemoryStore { saved: Mutex::new(Vec::new()), reject: true }
    }

    fn saved(&self) -> Vec<(ScaleReading, Option<f64>)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn save(&self, reading: &ScaleReading, girth_cm: Option<f64>) -> Result<(), PersistError> {
        if self.reject {
            return Err(PersistError::Rejected { detail: "backend unavailable".to_string() });
        }

        self.saved.lock().unwrap().push((reading.clone(), girth_cm));
        Ok(())
    }
}

// never finishes a save, so the workflow stays in Saving
struct StalledStore;

#[async_trait]
impl MeasurementStore for StalledStore {
    async fn save(&self, _reading: &ScaleReading, _girth_cm: Option<f64>) -> Result<(), PersistError> {
        futures::future::pending().await
    }
}

fn weight_payload(raw: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; 13];
    bytes[11..13].copy_from_slice(&raw.to_le_bytes());
    bytes
}

fn scale() -> ReplayTransport {
    ReplayTransport::with_scale("MI_SCALE", "C8:47:8C:00:00:01")
}

fn workflow(transport: &ReplayTransport) -> PairingWorkflow<ReplayTransport> {
    let connector = DeviceConnector::new(Arc::new(transport.clone()), DiscoveryFilter::default(), ConnectorTimings::default());
    PairingWorkflow::new(connector, WorkflowSettings::default())
}

fn workflow_with_timeout(transport: &ReplayTransport, measurement_timeout: Duration) -> PairingWorkflow<ReplayTransport> {
    let connector = DeviceConnector::new(Arc::new(transport.clone()), DiscoveryFilter::default(), ConnectorTimings::default());
    PairingWorkflow::new(connector, WorkflowSettings { measurement_timeout, ..WorkflowSettings::default() })
}

fn drain(events: &mut Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut drained = Vec::new();
    while let Ok(Some(event)) = events.try_next() {
        drained.push(event);
    }
    drained
}

fn confirming_weight(state: &WorkflowState) -> f64 {
    match state {
        WorkflowState::Confirming(reading) => reading.weight_kg(),
        other => panic!("expected confirming, got {}", other),
    }
}

#[tokio::test]
async fn test_automatic_pairing_completes() {
    let transport = scale();
    let store = MemoryStore::default();
    let mut workflow = workflow(&transport);
    let mut events = workflow.subscribe();

    transport.set_read_value(BATTERY_LEVEL_CHARACTERISTIC, vec![77]);
    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(3172));

    assert_eq!(workflow.start_pairing(&mut FirstCandidate).await.unwrap(), &WorkflowState::AwaitingMeasurement);
    assert!(workflow.has_open_handle());

    let state = workflow.await_measurement().await.unwrap();
    assert_eq!(confirming_weight(state), 15.86);
    // the connection stays open until the reading is saved
    assert!(transport.is_connected());

    assert_eq!(workflow.accept_reading(Some(90.0), &store).await.unwrap(), &WorkflowState::Completed);
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.disconnect_count(), 1);

    let saved = store.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0.weight_kg(), 15.86);
    assert_eq!(saved[0].1, Some(90.0));

    let events = drain(&mut events);
    assert!(events.contains(&WorkflowEvent::Battery(77)));
    assert!(events.contains(&WorkflowEvent::DeviceSelected {
        name: "MI_SCALE".to_string(),
        address: "C8:47:8C:00:00:01".to_string(),
    }));
    assert!(events.iter().any(|event| matches!(event, WorkflowEvent::Measured(reading) if reading.weight_kg() == 15.86)));
    assert!(events.iter().any(|event| matches!(event, WorkflowEvent::Saved(_))));
    assert_eq!(events.last(), Some(&WorkflowEvent::StateChange(WorkflowState::Completed)));
}

#[tokio::test]
async fn test_first_reading_wins() {
    let transport = scale();
    let mut workflow = workflow(&transport);

    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(3172));
    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(16000));

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    let state = workflow.await_measurement().await.unwrap();
    assert_eq!(confirming_weight(state), 15.86);

    // the second reading is never acted upon
    assert!(workflow.await_measurement().await.is_err());
    assert_eq!(confirming_weight(workflow.state()), 15.86);
}

#[tokio::test]
async fn test_bad_notifications_are_skipped() {
    let transport = scale();
    let mut workflow = workflow(&transport);
    let mut events = workflow.subscribe();

    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, vec![1, 2, 3]);
    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(0));
    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(16000));

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    let state = workflow.await_measurement().await.unwrap();
    assert_eq!(confirming_weight(state), 80.0);

    let events = drain(&mut events);
    assert!(events.contains(&WorkflowEvent::NotificationRejected(DecodeError::TooShort { len: 3 })));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_falls_back_to_manual_entry_once() {
    let transport = scale();
    let store = MemoryStore::default();
    let mut workflow = workflow(&transport);
    let mut events = workflow.subscribe();

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    assert_eq!(workflow.await_measurement().await.unwrap(), &WorkflowState::ManualEntry);
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.disconnect_count(), 1);

    // a late notification has no effect
    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(3172));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(workflow.state(), &WorkflowState::ManualEntry);
    assert!(matches!(workflow.await_measurement().await, Err(WorkflowError::InvalidTransition { .. })));

    let manual_entries = drain(&mut events)
        .into_iter()
        .filter(|event| event == &WorkflowEvent::StateChange(WorkflowState::ManualEntry))
        .count();
    assert_eq!(manual_entries, 1);

    assert_eq!(workflow.submit_manual(82.4, Some(95.0), &store).await.unwrap(), &WorkflowState::Completed);
    assert_eq!(store.saved()[0].0.weight_kg(), 82.4);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscription_still_falls_back_to_manual_entry() {
    let transport = scale();
    transport.fail_subscribe(WEIGHT_MEASUREMENT_CHARACTERISTIC, ConnectError::TransportError { detail: "gatt".to_string() });
    let mut workflow = workflow(&transport);

    assert_eq!(workflow.start_pairing(&mut FirstCandidate).await.unwrap(), &WorkflowState::AwaitingMeasurement);
    assert_eq!(workflow.await_measurement().await.unwrap(), &WorkflowState::ManualEntry);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_reset_from_awaiting_measurement_releases_handle() {
    let transport = scale();
    let mut workflow = workflow(&transport);

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    workflow.reset().await;

    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_reset_from_confirming_releases_handle() {
    let transport = scale();
    let mut workflow = workflow(&transport);

    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(3172));
    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    workflow.await_measurement().await.unwrap();
    workflow.reset().await;

    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_from_manual_entry_does_not_disconnect_twice() {
    let transport = scale();
    let mut workflow = workflow(&transport);

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    workflow.await_measurement().await.unwrap();
    workflow.reset().await;

    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_connecting() {
    let transport = scale();
    transport.delay_connect(Duration::from_secs(10));
    let mut workflow = workflow(&transport);

    let interrupted = tokio::time::timeout(Duration::from_secs(1), workflow.start_pairing(&mut FirstCandidate)).await;
    assert!(interrupted.is_err());
    assert_eq!(workflow.state(), &WorkflowState::Connecting);

    workflow.reset().await;
    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert_eq!(transport.disconnect_count(), 0);

    // a fresh attempt is possible afterwards
    assert_eq!(workflow.start_pairing(&mut FirstCandidate).await.unwrap(), &WorkflowState::AwaitingMeasurement);
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_scanning() {
    let transport = scale();
    transport.delay_scan(Duration::from_secs(10));
    let mut workflow = workflow(&transport);

    let interrupted = tokio::time::timeout(Duration::from_secs(1), workflow.start_pairing(&mut FirstCandidate)).await;
    assert!(interrupted.is_err());
    assert_eq!(workflow.state(), &WorkflowState::Scanning);

    workflow.reset().await;
    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert_eq!(transport.connect_count(), 0);
    assert_eq!(transport.disconnect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_saving() {
    let transport = scale();
    let mut workflow = workflow(&transport);

    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(3172));
    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    workflow.await_measurement().await.unwrap();

    let interrupted = tokio::time::timeout(Duration::from_secs(1), workflow.accept_reading(None, &StalledStore)).await;
    assert!(interrupted.is_err());
    assert_eq!(workflow.state(), &WorkflowState::Saving);
    assert!(workflow.has_open_handle());

    workflow.reset().await;
    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_with_backed_up_notifications() {
    let transport = scale();
    for _ in 0..200 {
        transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, vec![1, 2, 3]);
    }
    let mut workflow = workflow(&transport);

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    tokio::task::yield_now().await;

    let reset = tokio::time::timeout(Duration::from_secs(3), workflow.reset()).await;
    assert!(reset.is_ok());
    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_backed_up_notifications() {
    let transport = scale();
    for _ in 0..200 {
        transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(0));
    }
    let mut workflow = workflow_with_timeout(&transport, Duration::from_millis(100));

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    tokio::task::yield_now().await;

    let waited = tokio::time::timeout(Duration::from_secs(3), workflow.await_measurement()).await;
    assert!(waited.is_ok());
    assert_eq!(workflow.state(), &WorkflowState::ManualEntry);
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_reset_ignores_disconnect_errors() {
    let transport = scale();
    transport.fail_disconnect(ConnectError::TransportError { detail: "already gone".to_string() });
    let mut workflow = workflow(&transport);

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    workflow.reset().await;

    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_reset_from_idle_is_a_no_op() {
    let transport = scale();
    let mut workflow = workflow(&transport);
    let mut events = workflow.subscribe();

    workflow.reset().await;

    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert_eq!(transport.disconnect_count(), 0);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_persist_failure_is_terminal_and_can_be_resubmitted() {
    let transport = scale();
    let rejecting = MemoryStore::rejecting();
    let store = MemoryStore::default();
    let mut workflow = workflow(&transport);

    transport.push_notification(WEIGHT_MEASUREMENT_CHARACTERISTIC, weight_payload(16000));
    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    workflow.await_measurement().await.unwrap();
    let captured = match workflow.state() {
        WorkflowState::Confirming(reading) => reading.clone(),
        other => panic!("expected confirming, got {}", other),
    };

    let state = workflow.accept_reading(None, &rejecting).await.unwrap();
    assert!(matches!(state, WorkflowState::Failed(FailureReason::PersistError(PersistError::Rejected { .. }))));
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.disconnect_count(), 1);

    assert_eq!(workflow.retry_save(&store).await.unwrap(), &WorkflowState::Completed);
    assert_eq!(store.saved(), vec![(captured, None)]);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_retry_save_requires_persist_failure() {
    let transport = scale();
    let store = MemoryStore::default();
    let mut workflow = workflow(&transport);

    assert!(matches!(workflow.retry_save(&store).await, Err(WorkflowError::InvalidTransition { .. })));
    assert_eq!(workflow.state(), &WorkflowState::Idle);
}

#[tokio::test]
async fn test_no_scale_in_range() {
    let transport = ReplayTransport::new();
    transport.add_device("Headphones", "00:11:22:33:44:55");
    let mut workflow = workflow(&transport);

    let state = workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    assert_eq!(state, &WorkflowState::Failed(FailureReason::NoDeviceSelected));
    assert_eq!(transport.connect_count(), 0);
}

#[tokio::test]
async fn test_picker_cancelled() {
    let transport = scale();
    let mut workflow = workflow(&transport);

    let state = workflow.start_pairing(&mut ByAddress("FF:FF:FF:FF:FF:FF".to_string())).await.unwrap();
    assert_eq!(state, &WorkflowState::Failed(FailureReason::NoDeviceSelected));
}

#[tokio::test]
async fn test_picker_by_address() {
    let transport = scale();
    transport.add_device("MIBFS", "C8:47:8C:00:00:02");
    let mut workflow = workflow(&transport);
    let mut events = workflow.subscribe();

    workflow.start_pairing(&mut ByAddress("c8:47:8c:00:00:02".to_string())).await.unwrap();

    assert!(drain(&mut events).contains(&WorkflowEvent::DeviceSelected {
        name: "MIBFS".to_string(),
        address: "C8:47:8C:00:00:02".to_string(),
    }));
}

#[tokio::test]
async fn test_unsupported_platform_keeps_manual_path() {
    let transport = scale();
    transport.fail_scan(ConnectError::Unsupported);
    let store = MemoryStore::default();
    let mut workflow = workflow(&transport);

    let state = workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    assert_eq!(state, &WorkflowState::Failed(FailureReason::Unsupported));

    workflow.reset().await;
    assert_eq!(workflow.submit_manual(70.0, None, &store).await.unwrap(), &WorkflowState::Completed);
    assert_eq!(store.saved().len(), 1);
}

#[tokio::test]
async fn test_connect_error() {
    let transport = scale();
    transport.fail_connect(ConnectError::TransportError { detail: "gatt 133".to_string() });
    let mut workflow = workflow(&transport);

    let state = workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    assert_eq!(
        state,
        &WorkflowState::Failed(FailureReason::Connect(ConnectError::TransportError { detail: "gatt 133".to_string() })),
    );
    assert!(!workflow.has_open_handle());
}

#[tokio::test]
async fn test_connection_lost_while_waiting() {
    let transport = scale();
    let mut workflow = workflow(&transport);

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    transport.drop_connection();

    assert_eq!(workflow.await_measurement().await.unwrap(), &WorkflowState::Failed(FailureReason::ConnectionLost));
    assert!(!workflow.has_open_handle());
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_invalid_operations_leave_state_untouched() {
    let transport = scale();
    let store = MemoryStore::default();
    let mut workflow = workflow(&transport);

    assert!(workflow.accept_reading(None, &store).await.is_err());
    assert!(workflow.await_measurement().await.is_err());

    workflow.start_pairing(&mut FirstCandidate).await.unwrap();
    assert!(workflow.start_pairing(&mut FirstCandidate).await.is_err());
    assert!(workflow.submit_manual(80.0, None, &store).await.is_err());
    assert_eq!(workflow.state(), &WorkflowState::AwaitingMeasurement);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn test_manual_entry_rejects_implausible_values() {
    let transport = scale();
    let store = MemoryStore::default();
    let mut workflow = workflow(&transport);

    assert!(matches!(workflow.submit_manual(12.0, None, &store).await, Err(WorkflowError::ManualEntry { .. })));
    assert!(matches!(workflow.submit_manual(80.0, Some(200.0), &store).await, Err(WorkflowError::ManualEntry { .. })));
    assert_eq!(workflow.state(), &WorkflowState::Idle);
    assert!(store.saved().is_empty());
}
