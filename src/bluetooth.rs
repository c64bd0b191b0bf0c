//! btleplug-backed transport provider and device discovery helpers.

use crate::error::TransportFailure;
use crate::firmware;
use crate::prelude::App;
use crate::transport::{
    link_channel, LinkEvent, LinkEventReceiver, LinkEventSender, OpKind, TransportLink,
};
use btleplug::api::{
    Central, Manager as _, Peripheral, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::Manager;
use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use uuid::Uuid;

/// A peripheral found while scanning. Open it to get a transport link plus
/// the event channel for a session.
#[derive(Clone)]
pub struct Device {
    pub name: String,
    pub address: String,
    peripheral: btleplug::platform::Peripheral,
}

impl Device {
    pub fn open(&self) -> (Arc<BleLink>, LinkEventReceiver) {
        let (events, receiver) = link_channel();
        (
            Arc::new(BleLink {
                peripheral: self.peripheral.clone(),
                events,
            }),
            receiver,
        )
    }
}

/// List armbands visible after one scan pass on every adapter.
pub async fn scan(app: App) -> Result<Vec<Device>, btleplug::Error> {
    info!("scanning for {} s", app.scantime);

    let manager = Manager::new().await?;
    let adapter_list = manager.adapters().await?;
    if adapter_list.is_empty() {
        warn!("no Bluetooth adapters found");
    }

    let mut found = Vec::new();
    for adapter in adapter_list.iter() {
        if app.verbose > 0 {
            info!("trying bluetooth adapter {}", adapter.adapter_info().await?);
        }
        adapter.start_scan(ScanFilter::default()).await?;
        time::sleep(Duration::from_secs_f32(app.scantime)).await;

        for peripheral in adapter.peripherals().await? {
            let properties = peripheral.properties().await?;
            if let Some(PeripheralProperties {
                address,
                local_name: Some(name),
                ..
            }) = &properties
            {
                if name.starts_with(firmware::SENSOR_NAME) {
                    info!("found {name} at {address}");
                    found.push(Device {
                        name: name.to_string(),
                        address: address.to_string(),
                        peripheral: peripheral.clone(),
                    });
                }
            }
        }
    }
    Ok(found)
}

/// Keep scanning until the first armband shows up.
pub async fn find_peripheral(app: App) -> Result<Device, btleplug::Error> {
    let manager = Manager::new().await?;
    let adapter_list = manager.adapters().await?;
    if adapter_list.is_empty() {
        warn!("no Bluetooth adapters found");
    }

    loop {
        for adapter in adapter_list.iter() {
            let _ = adapter.start_scan(ScanFilter::default()).await;
            time::sleep(Duration::from_secs_f32(0.1)).await;

            for peripheral in adapter.peripherals().await? {
                let properties = peripheral.properties().await?;
                if let Some(PeripheralProperties {
                    address,
                    local_name: Some(name),
                    ..
                }) = &properties
                {
                    if name.starts_with(firmware::SENSOR_NAME) {
                        info!("found {name} at {address}");
                        return Ok(Device {
                            name: name.to_string(),
                            address: address.to_string(),
                            peripheral: peripheral.clone(),
                        });
                    }
                }
            }
        }
    }
}

/// Transport link over one btleplug peripheral. Every method spawns the
/// radio work and reports back through the session's event channel.
pub struct BleLink {
    peripheral: btleplug::platform::Peripheral,
    events: LinkEventSender,
}

impl BleLink {
    fn find_characteristic(
        peripheral: &btleplug::platform::Peripheral,
        id: Uuid,
    ) -> Option<btleplug::api::Characteristic> {
        peripheral
            .characteristics()
            .iter()
            .find(|c| c.uuid == id)
            .cloned()
    }

    fn completed(
        events: &LinkEventSender,
        kind: OpKind,
        characteristic: Uuid,
        status: Result<Vec<u8>, TransportFailure>,
    ) {
        let _ = events.send(LinkEvent::Completed {
            kind,
            characteristic,
            status,
        });
    }

    fn operation_failure(kind: OpKind, characteristic: Uuid, reason: String) -> TransportFailure {
        TransportFailure::Operation {
            kind,
            characteristic,
            reason,
        }
    }
}

impl TransportLink for BleLink {
    fn connect(&self) {
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    let _ = events.send(LinkEvent::Up);
                }
                Err(e) => {
                    warn!("connect failed: {e}");
                    let _ = events.send(LinkEvent::Down);
                }
            }
        });
    }

    fn disconnect(&self) {
        let peripheral = self.peripheral.clone();
        tokio::spawn(async move {
            let _ = peripheral.disconnect().await;
        });
    }

    fn discover(&self) {
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                let _ = events.send(LinkEvent::Discovered(Err(TransportFailure::Discovery(
                    e.to_string(),
                ))));
                return;
            }
            let ids: Vec<Uuid> = peripheral.characteristics().iter().map(|c| c.uuid).collect();

            // Forward notifications until the stream ends, which is how the
            // stack tells us the link is gone.
            match peripheral.notifications().await {
                Ok(mut notifications) => {
                    let notify_events = events.clone();
                    tokio::spawn(async move {
                        while let Some(notification) = notifications.next().await {
                            let _ = notify_events.send(LinkEvent::Notified {
                                characteristic: notification.uuid,
                                value: notification.value,
                            });
                        }
                        debug!("notification stream ended");
                        let _ = notify_events.send(LinkEvent::Down);
                    });
                }
                Err(e) => {
                    let _ = events.send(LinkEvent::Discovered(Err(TransportFailure::Discovery(
                        format!("no notification stream: {e}"),
                    ))));
                    return;
                }
            }

            let _ = events.send(LinkEvent::Discovered(Ok(ids)));
        });
    }

    fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) {
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        let value = value.to_vec();
        tokio::spawn(async move {
            let kind = OpKind::WriteCharacteristic;
            let status = match Self::find_characteristic(&peripheral, characteristic) {
                Some(target) => peripheral
                    .write(&target, &value, WriteType::WithResponse)
                    .await
                    .map(|_| Vec::new())
                    .map_err(|e| Self::operation_failure(kind, characteristic, e.to_string())),
                None => Err(Self::operation_failure(
                    kind,
                    characteristic,
                    "characteristic not found".into(),
                )),
            };
            Self::completed(&events, kind, characteristic, status);
        });
    }

    fn write_descriptor(&self, characteristic: Uuid, value: &[u8]) {
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        let value = value.to_vec();
        tokio::spawn(async move {
            let kind = OpKind::WriteDescriptor;
            let descriptor = Self::find_characteristic(&peripheral, characteristic).and_then(|c| {
                c.descriptors
                    .iter()
                    .find(|d| d.uuid == firmware::CLIENT_CONFIG_DESCRIPTOR)
                    .cloned()
            });
            let status = match descriptor {
                Some(target) => peripheral
                    .write_descriptor(&target, &value)
                    .await
                    .map(|_| Vec::new())
                    .map_err(|e| Self::operation_failure(kind, characteristic, e.to_string())),
                None => Err(Self::operation_failure(
                    kind,
                    characteristic,
                    "client config descriptor not found".into(),
                )),
            };
            Self::completed(&events, kind, characteristic, status);
        });
    }

    fn read_characteristic(&self, characteristic: Uuid) {
        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let kind = OpKind::ReadCharacteristic;
            let status = match Self::find_characteristic(&peripheral, characteristic) {
                Some(target) => peripheral
                    .read(&target)
                    .await
                    .map_err(|e| Self::operation_failure(kind, characteristic, e.to_string())),
                None => Err(Self::operation_failure(
                    kind,
                    characteristic,
                    "characteristic not found".into(),
                )),
            };
            Self::completed(&events, kind, characteristic, status);
        });
    }

    fn set_notify(&self, characteristic: Uuid, enabled: bool) {
        let peripheral = self.peripheral.clone();
        tokio::spawn(async move {
            let result = match Self::find_characteristic(&peripheral, characteristic) {
                Some(target) if enabled => peripheral.subscribe(&target).await,
                Some(target) => peripheral.unsubscribe(&target).await,
                None => return,
            };
            if let Err(e) = result {
                warn!("set_notify({characteristic}, {enabled}) failed: {e}");
            }
        });
    }
}
