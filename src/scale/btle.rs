use std::collections::HashSet;
use std::time::Duration;
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{future, StreamExt};
use log::{debug, info, warn};
use tokio::sync::OnceCell;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::ConnectError;
use crate::scale::transport::{Advertisement, NotificationStream, ScaleTransport};

/// [`ScaleTransport`] backed by the platform bluetooth stack.
///
/// The btleplug manager is created on the first scan, so constructing this never fails even on
/// systems without bluetooth.
#[derive(Default)]
pub struct BtleTransport {
    manager: OnceCell<Manager>,
}

impl BtleTransport {
    pub fn new() -> Self {
        BtleTransport { manager: OnceCell::new() }
    }

    async fn adapters(&self) -> Result<Vec<Adapter>, ConnectError> {
        let manager = self.manager.get_or_try_init(|| async { Manager::new().await }).await?;
        let adapters = manager.adapters().await?;

        if adapters.is_empty() {
            warn!("No bluetooth adapters found");
            return Err(ConnectError::Unsupported);
        }

        Ok(adapters)
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, ConnectError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == uuid)
        .ok_or_else(|| ConnectError::TransportError { detail: format!("characteristic {} is not available", uuid) })
}

async fn collect_peripherals(adapter: &Adapter, seen: &mut HashSet<String>, found: &mut Vec<Advertisement<Peripheral>>) {
    let peripherals = match adapter.peripherals().await {
        Ok(v) => v,
        Err(err) => {
            warn!("Failed to query BLE adapter for peripherals: {}", err);
            return;
        },
    };

    for peripheral in peripherals {
        match peripheral.properties().await {
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
            },
            Ok(None) => {
                debug!("Peripheral has no properties");
            },
            Ok(Some(properties)) => {
                let address = properties.address.to_string();
                if !seen.insert(address.clone()) {
                    continue;
                }

                found.push(Advertisement {
                    link: peripheral,
                    name: properties.local_name,
                    address,
                    services: properties.services,
                    rssi: properties.rssi,
                });
            },
        }
    }
}

#[async_trait]
impl ScaleTransport for BtleTransport {
    type Link = Peripheral;

    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement<Peripheral>>, ConnectError> {
        let adapters = self.adapters().await?;

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(ScanFilter::default()).await?;
        }

        sleep(duration).await;

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for adapter in &adapters {
            collect_peripherals(adapter, &mut seen, &mut found).await;

            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        }

        debug!("Scan found {} peripherals", found.len());
        Ok(found)
    }

    async fn connect(&self, peripheral: &Peripheral) -> Result<Vec<Uuid>, ConnectError> {
        info!("Connecting to peripheral...");
        peripheral.connect().await?;

        info!("Connected; Discovering services...");
        peripheral.discover_services().await?;

        Ok(peripheral.services().into_iter().map(|service| service.uuid).collect())
    }

    async fn subscribe(&self, peripheral: &Peripheral, uuid: Uuid) -> Result<NotificationStream, ConnectError> {
        let characteristic = find_characteristic(peripheral, uuid)?;

        info!("Subscribing to characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
        peripheral.subscribe(&characteristic).await?;

        // the stream carries notifications for every subscribed characteristic of this peripheral
        let stream = peripheral
            .notifications()
            .await?
            .filter(move |notification| future::ready(notification.uuid == uuid))
            .map(|notification| notification.value);

        Ok(stream.boxed())
    }

    async fn read(&self, peripheral: &Peripheral, uuid: Uuid) -> Result<Vec<u8>, ConnectError> {
        let characteristic = find_characteristic(peripheral, uuid)?;
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn disconnect(&self, peripheral: &Peripheral) -> Result<(), ConnectError> {
        info!("Disconnecting from peripheral...");
        peripheral.disconnect().await?;
        Ok(())
    }
}
