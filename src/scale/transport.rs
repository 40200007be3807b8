use std::fmt::Debug;
use std::time::Duration;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::ConnectError;

/// Raw values pushed by one characteristic, in arrival order. Ends when the connection drops.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// A peripheral seen while scanning.
#[derive(Debug, Clone)]
pub struct Advertisement<L> {
    pub link: L,
    pub name: Option<String>,
    pub address: String,
    pub services: Vec<Uuid>,
    pub rssi: Option<i16>,
}

impl<L> Advertisement<L> {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("NONE")
    }
}

/// The platform BLE capabilities needed to talk to a scale.
///
/// The pairing workflow only sees this trait, so it can run against real hardware
/// ([`crate::scale::btle::BtleTransport`]) or scripted data ([`crate::scale::replay::ReplayTransport`]).
#[async_trait]
pub trait ScaleTransport: Send + Sync + 'static {
    type Link: Clone + Debug + Send + Sync + 'static;

    /// Listens for advertisements for `duration` and returns everything seen.
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement<Self::Link>>, ConnectError>;

    /// Opens the connection and returns the UUIDs of the services the peripheral offers.
    async fn connect(&self, link: &Self::Link) -> Result<Vec<Uuid>, ConnectError>;

    /// Enables notifications on `characteristic`.
    async fn subscribe(&self, link: &Self::Link, characteristic: Uuid) -> Result<NotificationStream, ConnectError>;

    async fn read(&self, link: &Self::Link, characteristic: Uuid) -> Result<Vec<u8>, ConnectError>;

    async fn disconnect(&self, link: &Self::Link) -> Result<(), ConnectError>;
}
