use std::time::Duration;
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectError, WorkflowError};
use crate::record::store::MeasurementStore;
use crate::scale::bridge::CharacteristicBridge;
use crate::scale::connector::{DeviceConnector, DeviceHandle};
use crate::scale::constants::{
    BATTERY_LEVEL_CHARACTERISTIC, DEFAULT_HEIGHT_M, MEASUREMENT_TIMEOUT, NOTIFICATION_BUFFER,
    WEIGHT_MEASUREMENT_CHARACTERISTIC,
};
use crate::scale::decoder::{decode_battery, PayloadDecoder};
use crate::scale::manual::{check_girth, ManualEntryPath};
use crate::scale::transport::{Advertisement, ScaleTransport};
use crate::scale::types::{BridgeMessage, FailureReason, ScaleReading, WorkflowEvent, WorkflowState};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    pub height_cm: f64,
    pub measurement_timeout: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        WorkflowSettings {
            height_cm: DEFAULT_HEIGHT_M * 100.0,
            measurement_timeout: Duration::from_millis(MEASUREMENT_TIMEOUT),
        }
    }
}

/// Chooses which of the discovered scales to connect to. `None` means the user cancelled.
pub trait DevicePicker<L>: Send {
    fn pick(&mut self, candidates: &[Advertisement<L>]) -> Option<usize>;
}

pub struct FirstCandidate;

impl<L> DevicePicker<L> for FirstCandidate {
    fn pick(&mut self, candidates: &[Advertisement<L>]) -> Option<usize> {
        if candidates.is_empty() { None } else { Some(0) }
    }
}

/// Picks the scale with the given address, ignoring case.
pub struct ByAddress(pub String);

impl<L> DevicePicker<L> for ByAddress {
    fn pick(&mut self, candidates: &[Advertisement<L>]) -> Option<usize> {
        candidates.iter().position(|candidate| candidate.address.eq_ignore_ascii_case(&self.0))
    }
}

// Bridges, their channel and the timer of one AwaitingMeasurement period
struct MeasurementSession {
    bridges: Vec<CharacteristicBridge>,
    receiver: Receiver<BridgeMessage>,
    deadline: Instant,
    cancel: CancellationToken,
}

impl MeasurementSession {
    async fn close(self) {
        let MeasurementSession { bridges, receiver, cancel, .. } = self;

        // undelivered notifications are discarded; bridges blocked on a full channel see it closed
        drop(receiver);
        cancel.cancel();

        for bridge in bridges {
            bridge.stop().await;
        }
    }
}

// a reading the store failed to save, kept so it can be resubmitted
struct UnsavedReading {
    reading: ScaleReading,
    girth_cm: Option<f64>,
}

/// Everything the workflow owns. Only changed through the transition functions of
/// [`PairingWorkflow`].
pub struct WorkflowContext<L> {
    state: WorkflowState,
    handle: Option<DeviceHandle<L>>,
    session: Option<MeasurementSession>,
    unsaved: Option<UnsavedReading>,
}

impl<L> WorkflowContext<L> {
    fn new() -> Self {
        WorkflowContext { state: WorkflowState::Idle, handle: None, session: None, unsaved: None }
    }
}

enum Wake {
    Message(BridgeMessage),
    // every bridge has stopped; nothing can arrive before the deadline
    Silent,
    TimedOut,
}

/// Drives one scale from discovery to a saved measurement.
///
/// Operations suspend while talking to the scale. If a caller drops one of these futures before
/// it completes, it must call [`PairingWorkflow::reset`] to release the connection.
pub struct PairingWorkflow<T: ScaleTransport> {
    connector: DeviceConnector<T>,
    decoder: PayloadDecoder,
    manual: ManualEntryPath,
    measurement_timeout: Duration,
    context: WorkflowContext<T::Link>,
    senders: Vec<Sender<WorkflowEvent>>,
}

impl<T: ScaleTransport> PairingWorkflow<T> {
    pub fn new(connector: DeviceConnector<T>, settings: WorkflowSettings) -> Self {
        PairingWorkflow {
            connector,
            decoder: PayloadDecoder::from_height_cm(settings.height_cm),
            manual: ManualEntryPath::new(settings.height_cm),
            measurement_timeout: settings.measurement_timeout,
            context: WorkflowContext::new(),
            senders: Vec::new(),
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.context.state
    }

    pub fn has_open_handle(&self) -> bool {
        self.context.handle.is_some()
    }

    /// Receives every lifecycle event from now on.
    pub fn subscribe(&mut self) -> Receiver<WorkflowEvent> {
        let (sender, receiver) = channel(EVENT_BUFFER);
        self.senders.push(sender);
        receiver
    }

    fn emit(&mut self, event: WorkflowEvent) {
        self.senders.retain_mut(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) if err.is_disconnected() => false,
            Err(_) => {
                warn!("Workflow event receiver is full, dropping {:?}", event);
                true
            },
        });
    }

    fn transition(&mut self, next: WorkflowState) {
        debug_assert!(
            self.context.state.can_transition_to(&next),
            "invalid transition {} -> {}",
            self.context.state,
            next,
        );

        info!("Pairing: {} -> {}", self.context.state, next);
        self.context.state = next.clone();
        self.emit(WorkflowEvent::StateChange(next));
    }

    fn invalid(&self, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidTransition { state: self.context.state.to_string(), action }
    }

    /// Stops the bridges and the timer and closes the connection, if any.
    /// Disconnect errors are logged, never returned.
    async fn release(&mut self) {
        if let Some(session) = self.context.session.take() {
            session.close().await;
        }

        if let Some(handle) = self.context.handle.take() {
            if let Err(err) = self.connector.disconnect(handle).await {
                warn!("Failed to disconnect from scale: {}", err);
            }
        }
    }

    async fn fail(&mut self, reason: FailureReason) {
        warn!("Pairing failed: {}", reason);
        self.release().await;
        self.transition(WorkflowState::Failed(reason));
    }

    /// Scans for a scale, connects to the one `picker` chooses and starts waiting for a measurement.
    ///
    /// Ends in `AwaitingMeasurement` or `Failed`.
    pub async fn start_pairing(&mut self, picker: &mut dyn DevicePicker<T::Link>) -> Result<&WorkflowState, WorkflowError> {
        if self.context.state != WorkflowState::Idle {
            return Err(self.invalid("start pairing"));
        }

        self.transition(WorkflowState::Scanning);

        let candidates = match self.connector.scan().await {
            Ok(candidates) => candidates,
            Err(ConnectError::Unsupported) => {
                self.fail(FailureReason::Unsupported).await;
                return Ok(&self.context.state);
            },
            Err(ConnectError::Cancelled) => {
                self.fail(FailureReason::NoDeviceSelected).await;
                return Ok(&self.context.state);
            },
            Err(err) => {
                self.fail(FailureReason::Connect(err)).await;
                return Ok(&self.context.state);
            },
        };

        let candidate = match picker.pick(&candidates).and_then(|index| candidates.get(index)) {
            Some(candidate) => candidate.clone(),
            None => {
                info!("No scale selected out of {} candidates", candidates.len());
                self.fail(FailureReason::NoDeviceSelected).await;
                return Ok(&self.context.state);
            },
        };

        self.emit(WorkflowEvent::DeviceSelected {
            name: candidate.display_name().to_string(),
            address: candidate.address.clone(),
        });
        self.transition(WorkflowState::Connecting);

        let handle = match self.connector.connect(&candidate).await {
            Ok(handle) => handle,
            Err(err) => {
                self.fail(FailureReason::Connect(err)).await;
                return Ok(&self.context.state);
            },
        };
        self.context.handle = Some(handle);

        let Some(handle) = self.context.handle.as_ref() else {
            return Ok(&self.context.state);
        };
        let battery = self.connector.read_battery(handle).await;
        let session = self.open_session(handle).await;

        self.context.session = Some(session);
        if let Some(level) = battery {
            self.emit(WorkflowEvent::Battery(level));
        }
        self.transition(WorkflowState::AwaitingMeasurement);

        Ok(&self.context.state)
    }

    // A failed subscription is not fatal: the timer still runs and falls back to manual entry.
    async fn open_session(&self, handle: &DeviceHandle<T::Link>) -> MeasurementSession {
        let transport = self.connector.transport().as_ref();
        let (sender, receiver) = channel(NOTIFICATION_BUFFER);
        let cancel = CancellationToken::new();
        let mut bridges = Vec::new();

        let mut characteristics = vec![WEIGHT_MEASUREMENT_CHARACTERISTIC];
        if handle.services().battery {
            characteristics.push(BATTERY_LEVEL_CHARACTERISTIC);
        }

        for characteristic in characteristics {
            match CharacteristicBridge::open(transport, handle.link(), characteristic, sender.clone(), cancel.child_token()).await {
                Ok(bridge) => bridges.push(bridge),
                Err(err) => warn!("Failed to enable notifications for {}: {}", characteristic, err),
            }
        }

        MeasurementSession {
            bridges,
            receiver,
            deadline: Instant::now() + self.measurement_timeout,
            cancel,
        }
    }

    async fn next_wake(session: &mut MeasurementSession) -> Wake {
        tokio::select! {
            biased;

            _ = sleep_until(session.deadline) => Wake::TimedOut,
            message = session.receiver.next() => match message {
                Some(message) => Wake::Message(message),
                None => Wake::Silent,
            },
        }
    }

    /// Waits for the first notification that decodes to a non-zero weight.
    ///
    /// Ends in `Confirming` with that reading, in `ManualEntry` when the measurement timeout
    /// elapses first, or in `Failed` when the scale disconnects.
    pub async fn await_measurement(&mut self) -> Result<&WorkflowState, WorkflowError> {
        if self.context.state != WorkflowState::AwaitingMeasurement {
            return Err(self.invalid("wait for a measurement"));
        }

        loop {
            let wake = match self.context.session.as_mut() {
                Some(session) => Self::next_wake(session).await,
                None => Wake::TimedOut,
            };

            match wake {
                Wake::TimedOut => {
                    info!("No valid measurement within {:?}, falling back to manual entry", self.measurement_timeout);
                    self.release().await;
                    self.transition(WorkflowState::ManualEntry);
                    break;
                },
                Wake::Silent => {
                    if let Some(session) = self.context.session.as_ref() {
                        debug!("No notifications can arrive anymore; waiting for the timeout");
                        sleep_until(session.deadline).await;
                    }
                },
                Wake::Message(BridgeMessage::Closed { characteristic }) => {
                    if characteristic == WEIGHT_MEASUREMENT_CHARACTERISTIC {
                        self.fail(FailureReason::ConnectionLost).await;
                        break;
                    }
                    debug!("Notifications for {} stopped", characteristic);
                },
                Wake::Message(BridgeMessage::Notification(notification)) => {
                    if notification.characteristic == BATTERY_LEVEL_CHARACTERISTIC {
                        if let Some(level) = decode_battery(&notification.value) {
                            self.emit(WorkflowEvent::Battery(level));
                        }
                        continue;
                    }

                    match self.decoder.decode(&notification.value) {
                        Ok(reading) if reading.weight_kg() > 0.0 => {
                            info!("Measured {}", reading);
                            // later notifications are dropped together with the session
                            if let Some(session) = self.context.session.take() {
                                session.close().await;
                            }
                            self.emit(WorkflowEvent::Measured(reading.clone()));
                            self.transition(WorkflowState::Confirming(reading));
                            break;
                        },
                        Ok(_) => {
                            debug!("Ignoring notification without weight");
                        },
                        Err(err) => {
                            warn!("Ignoring notification {:02x?}: {}", notification.value, err);
                            self.emit(WorkflowEvent::NotificationRejected(err));
                        },
                    }
                },
            }
        }

        Ok(&self.context.state)
    }

    /// Saves the reading shown in `Confirming`, with an optional abdominal girth.
    pub async fn accept_reading(&mut self, girth_cm: Option<f64>, store: &dyn MeasurementStore) -> Result<&WorkflowState, WorkflowError> {
        let reading = match &self.context.state {
            WorkflowState::Confirming(reading) => reading.clone(),
            _ => return Err(self.invalid("accept a reading")),
        };
        check_girth(girth_cm)?;

        self.transition(WorkflowState::Saving);
        self.save(reading, girth_cm, store).await;
        Ok(&self.context.state)
    }

    /// Saves a measurement typed in by the user. Allowed from `Idle` and `ManualEntry`.
    pub async fn submit_manual(&mut self, weight_kg: f64, girth_cm: Option<f64>, store: &dyn MeasurementStore) -> Result<&WorkflowState, WorkflowError> {
        if !matches!(self.context.state, WorkflowState::Idle | WorkflowState::ManualEntry) {
            return Err(self.invalid("submit a manual measurement"));
        }

        let reading = self.manual.build_reading(weight_kg, girth_cm)?;

        self.transition(WorkflowState::Saving);
        self.save(reading, girth_cm, store).await;
        Ok(&self.context.state)
    }

    /// Resubmits the reading whose save failed, without measuring again.
    pub async fn retry_save(&mut self, store: &dyn MeasurementStore) -> Result<&WorkflowState, WorkflowError> {
        let persist_failed = matches!(self.context.state, WorkflowState::Failed(FailureReason::PersistError(_)));

        let unsaved = match self.context.unsaved.take() {
            Some(unsaved) if persist_failed => unsaved,
            other => {
                self.context.unsaved = other;
                return Err(self.invalid("retry saving"));
            },
        };

        self.transition(WorkflowState::Saving);
        self.save(unsaved.reading, unsaved.girth_cm, store).await;
        Ok(&self.context.state)
    }

    async fn save(&mut self, reading: ScaleReading, girth_cm: Option<f64>, store: &dyn MeasurementStore) {
        match store.save(&reading, girth_cm).await {
            Ok(()) => {
                self.release().await;
                self.emit(WorkflowEvent::Saved(reading));
                self.transition(WorkflowState::Completed);
            },
            Err(err) => {
                error!("Failed to save measurement: {}", err);
                self.release().await;
                self.context.unsaved = Some(UnsavedReading { reading, girth_cm });
                self.transition(WorkflowState::Failed(FailureReason::PersistError(err)));
            },
        }
    }

    /// Returns to `Idle` from any state, cancelling the timer and closing any connection.
    pub async fn reset(&mut self) {
        self.release().await;
        self.context.unsaved = None;

        if self.context.state != WorkflowState::Idle {
            self.transition(WorkflowState::Idle);
        }
    }
}
