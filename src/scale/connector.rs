use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::ConnectError;
use crate::scale::constants::{
    BATTERY_LEVEL_CHARACTERISTIC, BATTERY_SERVICE, CONNECT_DEADLINE, READ_DEADLINE, SCALE_NAMES, SCALE_NAME_PREFIXES,
    SCAN_DURATION, VENDOR_SERVICES, WEIGHT_SERVICE,
};
use crate::scale::decoder::decode_battery;
use crate::scale::transport::{Advertisement, ScaleTransport};

/// Advertised-name filter for scale-like peripherals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub names: Vec<String>,
    pub name_prefixes: Vec<String>,
}

impl DiscoveryFilter {
    pub fn matches(&self, name: Option<&str>) -> bool {
        let name = match name {
            Some(name) => name,
            None => return false,
        };

        self.names.iter().any(|candidate| candidate == name)
            || self.name_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        DiscoveryFilter {
            names: SCALE_NAMES.iter().map(|name| name.to_string()).collect(),
            name_prefixes: SCALE_NAME_PREFIXES.iter().map(|prefix| prefix.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedServices {
    pub battery: bool,
    pub vendor: Vec<Uuid>,
}

/// An open GATT connection to a scale.
///
/// Not `Clone`: whoever holds it owns the connection and must give it back to
/// [`DeviceConnector::disconnect`].
#[derive(Debug)]
pub struct DeviceHandle<L> {
    link: L,
    name: String,
    address: String,
    services: ResolvedServices,
    open: bool,
}

impl<L> DeviceHandle<L> {
    pub fn link(&self) -> &L { &self.link }
    pub fn name(&self) -> &str { &self.name }
    pub fn address(&self) -> &str { &self.address }
    pub fn services(&self) -> &ResolvedServices { &self.services }
    pub fn is_open(&self) -> bool { self.open }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectorTimings {
    pub scan_duration: Duration,
    pub connect_deadline: Duration,
}

impl Default for ConnectorTimings {
    fn default() -> Self {
        ConnectorTimings {
            scan_duration: Duration::from_millis(SCAN_DURATION),
            connect_deadline: Duration::from_millis(CONNECT_DEADLINE),
        }
    }
}

/// Finds scales and manages the single GATT connection to one of them.
pub struct DeviceConnector<T: ScaleTransport> {
    transport: Arc<T>,
    filter: DiscoveryFilter,
    timings: ConnectorTimings,
    // set while a DeviceHandle is out
    outstanding: bool,
}

impl<T: ScaleTransport> DeviceConnector<T> {
    pub fn new(transport: Arc<T>, filter: DiscoveryFilter, timings: ConnectorTimings) -> Self {
        DeviceConnector { transport, filter, timings, outstanding: false }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn has_open_handle(&self) -> bool {
        self.outstanding
    }

    /// Scans for advertisements and keeps the ones whose name looks like a scale.
    pub async fn scan(&self) -> Result<Vec<Advertisement<T::Link>>, ConnectError> {
        let advertisements = self.transport.scan(self.timings.scan_duration).await?;

        // Some environments ignore scan filters, so the names are always checked here
        let candidates: Vec<_> = advertisements
            .into_iter()
            .filter(|advertisement| {
                let matched = self.filter.matches(advertisement.name.as_deref());
                if !matched {
                    debug!("Ignoring peripheral {} {}", advertisement.address, advertisement.display_name());
                }
                matched
            })
            .collect();

        info!("Found {} scale candidates", candidates.len());
        Ok(candidates)
    }

    /// Connects to `candidate` and resolves its services. The weight service is required.
    pub async fn connect(&mut self, candidate: &Advertisement<T::Link>) -> Result<DeviceHandle<T::Link>, ConnectError> {
        if self.outstanding {
            warn!("Refusing to connect to {}: a connection is already open", candidate.address);
            return Err(ConnectError::AlreadyConnected);
        }

        info!(
            "Using peripheral {} {} {:?}",
            candidate.address,
            candidate.display_name(),
            candidate.rssi,
        );

        let services = match timeout(self.timings.connect_deadline, self.transport.connect(&candidate.link)).await {
            Ok(Ok(services)) => services,
            Ok(Err(err)) => {
                warn!("Connecting to peripheral failed: {:?}", err);
                self.release_link(&candidate.link).await;
                return Err(err);
            },
            Err(_) => {
                warn!("Connecting to peripheral took too long");
                self.release_link(&candidate.link).await;
                return Err(ConnectError::Timeout);
            },
        };

        if !services.contains(&WEIGHT_SERVICE) {
            warn!("Peripheral {} does not offer the weight service: {:?}", candidate.address, services);
            self.release_link(&candidate.link).await;
            return Err(ConnectError::MissingService { service: WEIGHT_SERVICE });
        }

        let resolved = ResolvedServices {
            battery: services.contains(&BATTERY_SERVICE),
            vendor: VENDOR_SERVICES.iter().copied().filter(|uuid| services.contains(uuid)).collect(),
        };
        info!("Peripheral ready; battery service: {}; vendor services: {:?}", resolved.battery, resolved.vendor);

        self.outstanding = true;
        Ok(DeviceHandle {
            link: candidate.link.clone(),
            name: candidate.display_name().to_string(),
            address: candidate.address.clone(),
            services: resolved,
            open: true,
        })
    }

    /// Closes the connection. The handle is released even if the transport reports an error.
    pub async fn disconnect(&mut self, mut handle: DeviceHandle<T::Link>) -> Result<(), ConnectError> {
        self.outstanding = false;
        handle.open = false;
        self.transport.disconnect(&handle.link).await
    }

    /// Best-effort read of the battery level.
    pub async fn read_battery(&self, handle: &DeviceHandle<T::Link>) -> Option<u8> {
        if !handle.services.battery {
            return None;
        }

        let fut = self.transport.read(&handle.link, BATTERY_LEVEL_CHARACTERISTIC);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(READ_DEADLINE)) => {
                warn!("Reading the battery level took too long");
                None
            }
            result = fut => match result {
                Ok(value) => decode_battery(&value),
                Err(err) => {
                    warn!("Failed to read battery level: {:?}", err);
                    None
                },
            }
        }
    }

    // a failed connect attempt may still have left a half-open link behind
    async fn release_link(&self, link: &T::Link) {
        if let Err(err) = self.transport.disconnect(link).await {
            debug!("Cleanup after failed connect: {:?}", err);
        }
    }
}
