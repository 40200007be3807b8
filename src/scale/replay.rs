use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use log::debug;
use uuid::Uuid;

use crate::error::ConnectError;
use crate::scale::constants::{BATTERY_SERVICE, WEIGHT_SERVICE};
use crate::scale::transport::{Advertisement, NotificationStream, ScaleTransport};

/// Identifies a scripted peripheral by its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplayLink(pub String);

#[derive(Default)]
struct ReplayState {
    devices: Vec<Advertisement<ReplayLink>>,
    services: Vec<Uuid>,
    scan_error: Option<ConnectError>,
    connect_error: Option<ConnectError>,
    subscribe_errors: HashMap<Uuid, ConnectError>,
    disconnect_error: Option<ConnectError>,
    scan_delay: Option<Duration>,
    connect_delay: Option<Duration>,
    reads: HashMap<Uuid, Vec<u8>>,
    pending: HashMap<Uuid, Vec<Vec<u8>>>,
    feeds: HashMap<Uuid, UnboundedSender<Vec<u8>>>,
    connected: Option<ReplayLink>,
    connects: usize,
    disconnects: usize,
}

/// An in-memory [`ScaleTransport`] that advertises scripted peripherals and plays back scripted
/// notification values.
///
/// Values pushed before a characteristic is subscribed are queued and delivered on subscription.
/// Clones share the same script, so a clone can keep pushing values while another one is owned by
/// a workflow.
#[derive(Clone, Default)]
pub struct ReplayTransport {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayTransport {
    /// A transport without any peripherals in range.
    pub fn new() -> Self {
        let transport = ReplayTransport::default();
        transport.lock().services = vec![WEIGHT_SERVICE, BATTERY_SERVICE];
        transport
    }

    /// A transport with one scale in range.
    pub fn with_scale(name: &str, address: &str) -> Self {
        let transport = ReplayTransport::new();
        transport.add_device(name, address);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        // a panic while holding the lock can only come from a test assertion
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_device(&self, name: &str, address: &str) {
        self.lock().devices.push(Advertisement {
            link: ReplayLink(address.to_string()),
            name: Some(name.to_string()),
            address: address.to_string(),
            services: vec![],
            rssi: Some(-60),
        });
    }

    pub fn set_services(&self, services: Vec<Uuid>) {
        self.lock().services = services;
    }

    pub fn fail_scan(&self, err: ConnectError) {
        self.lock().scan_error = Some(err);
    }

    pub fn fail_connect(&self, err: ConnectError) {
        self.lock().connect_error = Some(err);
    }

    pub fn fail_subscribe(&self, characteristic: Uuid, err: ConnectError) {
        self.lock().subscribe_errors.insert(characteristic, err);
    }

    pub fn fail_disconnect(&self, err: ConnectError) {
        self.lock().disconnect_error = Some(err);
    }

    pub fn delay_scan(&self, delay: Duration) {
        self.lock().scan_delay = Some(delay);
    }

    pub fn delay_connect(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    pub fn set_read_value(&self, characteristic: Uuid, value: Vec<u8>) {
        self.lock().reads.insert(characteristic, value);
    }

    /// Delivers `value` as a notification of `characteristic`.
    pub fn push_notification(&self, characteristic: Uuid, value: Vec<u8>) {
        let mut state = self.lock();

        if let Some(feed) = state.feeds.get(&characteristic) {
            if feed.unbounded_send(value.clone()).is_ok() {
                return;
            }
            debug!("Notification feed for {} is closed", characteristic);
            state.feeds.remove(&characteristic);
        }

        state.pending.entry(characteristic).or_default().push(value);
    }

    /// Ends every notification stream, as if the connection dropped.
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.feeds.clear();
        state.connected = None;
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }
}

#[async_trait]
impl ScaleTransport for ReplayTransport {
    type Link = ReplayLink;

    async fn scan(&self, _duration: Duration) -> Result<Vec<Advertisement<ReplayLink>>, ConnectError> {
        let delay = self.lock().scan_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();

        match &state.scan_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.devices.clone()),
        }
    }

    async fn connect(&self, link: &ReplayLink) -> Result<Vec<Uuid>, ConnectError> {
        let delay = self.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(err) = &state.connect_error {
            return Err(err.clone());
        }

        state.connects += 1;
        state.connected = Some(link.clone());
        Ok(state.services.clone())
    }

    async fn subscribe(&self, _link: &ReplayLink, characteristic: Uuid) -> Result<NotificationStream, ConnectError> {
        let mut state = self.lock();
        if let Some(err) = state.subscribe_errors.get(&characteristic) {
            return Err(err.clone());
        }

        let (sender, receiver) = unbounded();
        for value in state.pending.remove(&characteristic).unwrap_or_default() {
            // the receiver is alive, so this can not fail
            let _ = sender.unbounded_send(value);
        }
        state.feeds.insert(characteristic, sender);

        Ok(receiver.boxed())
    }

    async fn read(&self, _link: &ReplayLink, characteristic: Uuid) -> Result<Vec<u8>, ConnectError> {
        self.lock()
            .reads
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| ConnectError::TransportError { detail: format!("characteristic {} is not readable", characteristic) })
    }

    async fn disconnect(&self, _link: &ReplayLink) -> Result<(), ConnectError> {
        let mut state = self.lock();
        state.disconnects += 1;
        state.connected = None;
        state.feeds.clear();

        match &state.disconnect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
