use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::driver::{BleDriver, ConnectionHandle, DriverCallbacks, GattStatus, HandleId, LinkState};
use super::model::{
    CharacteristicProperties, CharacteristicRef, DeviceAddress, DiscoveredDevice, ServiceInfo,
};
use crate::error::DriverError;

/// Status reported when the platform rejects a connection (`GATT_ERROR`).
const GATT_ERROR: GattStatus = GattStatus::Failure(0x85);
/// Status reported when service discovery fails (`GATT_INTERNAL_ERROR`).
const GATT_INTERNAL_ERROR: GattStatus = GattStatus::Failure(0x81);

#[derive(Debug)]
struct Link {
    peripheral: Peripheral,
    connected: Arc<AtomicBool>,
    notifications: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Registry {
    peripherals: HashMap<String, Peripheral>,
    links: HashMap<HandleId, Link>,
}

/// Driver backed by `btleplug` on the first available adapter.
#[derive(Debug)]
pub struct BtleplugDriver {
    adapter: Adapter,
    callbacks: OnceLock<DriverCallbacks>,
    scanning: Arc<AtomicBool>,
    next_handle: AtomicU64,
    registry: Arc<Mutex<Registry>>,
}

impl BtleplugDriver {
    /// Opens the platform BLE manager and selects its first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform stack is unavailable or reports no adapters.
    #[instrument(level = "debug")]
    pub async fn new() -> Result<Self, DriverError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(DriverError::NoAdapters)?;
        info!(adapter = %adapter.adapter_info().await?, "using BLE adapter");

        Ok(Self {
            adapter,
            callbacks: OnceLock::new(),
            scanning: Arc::new(AtomicBool::new(false)),
            next_handle: AtomicU64::new(1),
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock_registry(&self.registry)
    }

    fn callbacks(&self) -> Result<DriverCallbacks, DriverError> {
        self.callbacks.get().cloned().ok_or(DriverError::NotAttached)
    }

    fn peripheral_for(&self, handle: &ConnectionHandle) -> Result<Peripheral, DriverError> {
        self.registry()
            .links
            .get(&handle.id())
            .map(|link| link.peripheral.clone())
            .ok_or(DriverError::UnknownHandle { handle: handle.id() })
    }

    fn link_flag(&self, handle: &ConnectionHandle) -> Result<Arc<AtomicBool>, DriverError> {
        self.registry()
            .links
            .get(&handle.id())
            .map(|link| Arc::clone(&link.connected))
            .ok_or(DriverError::UnknownHandle { handle: handle.id() })
    }

    /// Runs `peripheral.connect()` off the caller's task and reports the outcome.
    fn spawn_connect(
        &self,
        id: HandleId,
        peripheral: Peripheral,
        connected: Arc<AtomicBool>,
    ) -> Result<(), DriverError> {
        let callbacks = self.callbacks()?;
        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    connected.store(true, Ordering::SeqCst);
                    callbacks.connection_state_changed(
                        id,
                        GattStatus::Success,
                        LinkState::Connected,
                    );
                }
                Err(error) => {
                    debug!(handle = %id, %error, "peripheral connect failed");
                    callbacks.connection_state_changed(id, GATT_ERROR, LinkState::Disconnected);
                }
            }
        });
        Ok(())
    }

    fn spawn_central_events(&self, callbacks: DriverCallbacks) {
        let adapter = self.adapter.clone();
        let scanning = Arc::clone(&self.scanning);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(error) => {
                    warn!(%error, "could not subscribe to adapter events");
                    return;
                }
            };

            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        if !scanning.load(Ordering::SeqCst) {
                            continue;
                        }
                        let Ok(peripheral) = adapter.peripheral(&id).await else {
                            continue;
                        };
                        match discovered_device(&peripheral).await {
                            Some(device) => {
                                lock_registry(&registry)
                                    .peripherals
                                    .insert(device.id().to_string(), peripheral);
                                callbacks.scan_result(device);
                            }
                            None => trace!(peripheral = ?id, "skipping peripheral without properties"),
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let dropped: Vec<HandleId> = lock_registry(&registry)
                            .links
                            .iter()
                            .filter(|(_, link)| link.peripheral.id() == id)
                            .filter(|(_, link)| link.connected.swap(false, Ordering::SeqCst))
                            .map(|(handle, _)| *handle)
                            .collect();
                        for handle in dropped {
                            debug!(%handle, "peripheral dropped the link");
                            callbacks.connection_state_changed(
                                handle,
                                GattStatus::Success,
                                LinkState::Disconnected,
                            );
                        }
                    }
                    _ => {}
                }
            }
            debug!("adapter event stream ended");
        });
    }
}

#[async_trait]
impl BleDriver for BtleplugDriver {
    fn attach(&self, callbacks: DriverCallbacks) {
        if self.callbacks.set(callbacks.clone()).is_err() {
            debug!("driver callbacks already attached; keeping the first");
            return;
        }
        self.spawn_central_events(callbacks);
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<(), DriverError> {
        self.callbacks()?;
        self.scanning.store(true, Ordering::SeqCst);
        if let Err(error) = self.adapter.start_scan(ScanFilter::default()).await {
            self.scanning.store(false, Ordering::SeqCst);
            return Err(error.into());
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), DriverError> {
        self.scanning.store(false, Ordering::SeqCst);
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self, device), level = "debug", fields(address = %device.address()))]
    async fn connect(&self, device: &DiscoveredDevice) -> Result<ConnectionHandle, DriverError> {
        let peripheral = self
            .registry()
            .peripherals
            .get(device.id())
            .cloned()
            .ok_or_else(|| DriverError::UnknownDevice {
                id: device.id().to_string(),
            })?;

        let id = HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let connected = Arc::new(AtomicBool::new(false));
        self.registry().links.insert(
            id,
            Link {
                peripheral: peripheral.clone(),
                connected: Arc::clone(&connected),
                notifications: None,
            },
        );
        self.spawn_connect(id, peripheral, connected)?;
        Ok(ConnectionHandle::new(id))
    }

    #[instrument(skip(self), level = "debug", fields(handle = %handle.id()))]
    async fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DriverError> {
        let peripheral = self.peripheral_for(handle)?;
        let connected = self.link_flag(handle)?;
        let callbacks = self.callbacks()?;
        let registry = Arc::clone(&self.registry);
        let id = handle.id();
        tokio::spawn(async move {
            if let Err(error) = peripheral.disconnect().await {
                debug!(handle = %id, %error, "peripheral disconnect failed");
            }
            let was_connected = connected.swap(false, Ordering::SeqCst);
            let registered = lock_registry(&registry).links.contains_key(&id);
            if owes_disconnect(was_connected, registered) {
                callbacks.connection_state_changed(id, GattStatus::Success, LinkState::Disconnected);
            }
        });
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(handle = %handle.id()))]
    async fn reconnect(&self, handle: &ConnectionHandle) -> Result<(), DriverError> {
        let peripheral = self.peripheral_for(handle)?;
        let connected = self.link_flag(handle)?;
        self.spawn_connect(handle.id(), peripheral, connected)
    }

    #[instrument(skip(self), level = "debug", fields(handle = %handle.id()))]
    async fn discover_services(&self, handle: &ConnectionHandle) -> Result<(), DriverError> {
        let peripheral = self.peripheral_for(handle)?;
        let callbacks = self.callbacks()?;
        let id = handle.id();
        tokio::spawn(async move {
            let status = match peripheral.discover_services().await {
                Ok(()) => GattStatus::Success,
                Err(error) => {
                    debug!(handle = %id, %error, "service discovery failed");
                    GATT_INTERNAL_ERROR
                }
            };
            callbacks.services_discovered(id, status);
        });
        Ok(())
    }

    /// The platform stack negotiates the ATT MTU itself, so the request is
    /// acknowledged with the requested size.
    async fn request_mtu(&self, handle: &ConnectionHandle, mtu: u16) -> Result<(), DriverError> {
        self.peripheral_for(handle)?;
        debug!(handle = %handle.id(), mtu, "MTU is negotiated by the platform stack");
        self.callbacks()?
            .mtu_changed(handle.id(), mtu, GattStatus::Success);
        Ok(())
    }

    async fn services(&self, handle: &ConnectionHandle) -> Result<Vec<ServiceInfo>, DriverError> {
        let peripheral = self.peripheral_for(handle)?;
        Ok(service_infos(&peripheral.services()))
    }

    #[instrument(skip(self, characteristic), level = "debug", fields(handle = %handle.id(), characteristic = %characteristic.uuid()))]
    async fn set_notifications(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) -> Result<(), DriverError> {
        let peripheral = self.peripheral_for(handle)?;
        let platform_characteristic = platform_characteristic(&peripheral, characteristic)?;

        if !enabled {
            if let Some(task) = self
                .registry()
                .links
                .get_mut(&handle.id())
                .and_then(|link| link.notifications.take())
            {
                task.abort();
            }
            peripheral.unsubscribe(&platform_characteristic).await?;
            return Ok(());
        }

        peripheral.subscribe(&platform_characteristic).await?;
        let already_forwarding = self
            .registry()
            .links
            .get(&handle.id())
            .is_some_and(|link| link.notifications.is_some());
        if already_forwarding {
            return Ok(());
        }

        let mut notifications = peripheral.notifications().await?;
        let callbacks = self.callbacks()?;
        let id = handle.id();
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                callbacks.characteristic_changed(id, notification.uuid, notification.value);
            }
            trace!(handle = %id, "notification stream ended");
        });
        if let Some(link) = self.registry().links.get_mut(&handle.id()) {
            link.notifications = Some(task);
        } else {
            task.abort();
        }
        Ok(())
    }

    #[instrument(skip(self, characteristic, value), level = "debug", fields(handle = %handle.id(), %descriptor))]
    async fn write_descriptor(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), DriverError> {
        let peripheral = self.peripheral_for(handle)?;
        let platform_characteristic = platform_characteristic(&peripheral, characteristic)?;
        let Some(platform_descriptor) = platform_characteristic
            .descriptors
            .iter()
            .find(|candidate| candidate.uuid == descriptor)
        else {
            return Err(DriverError::UnknownCharacteristic { uuid: descriptor });
        };

        peripheral
            .write_descriptor(platform_descriptor, value)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(handle = %handle.id()))]
    async fn close_handle(&self, handle: ConnectionHandle) {
        let Some(link) = self.registry().links.remove(&handle.id()) else {
            return;
        };
        if let Some(task) = link.notifications {
            task.abort();
        }
        link.connected.store(false, Ordering::SeqCst);

        match link.peripheral.is_connected().await {
            Ok(true) => {
                if let Err(error) = link.peripheral.disconnect().await {
                    debug!(%error, "failed to disconnect while closing handle");
                }
            }
            Ok(false) => {}
            Err(error) => debug!(%error, "could not query link state while closing handle"),
        }
    }
}

/// A requested disconnect completes once for a link that was up, and also for
/// one still connecting, which no central event will ever report.
fn owes_disconnect(was_connected: bool, registered: bool) -> bool {
    was_connected || registered
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn discovered_device(peripheral: &Peripheral) -> Option<DiscoveredDevice> {
    let properties = peripheral.properties().await.ok()??;
    let address: DeviceAddress = properties.address.to_string().parse().ok()?;
    Some(DiscoveredDevice::new(
        peripheral.id().to_string(),
        address,
        properties.local_name,
        properties.rssi,
    ))
}

fn platform_characteristic(
    peripheral: &Peripheral,
    characteristic: &CharacteristicRef,
) -> Result<Characteristic, DriverError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|candidate| {
            candidate.uuid == characteristic.uuid()
                && candidate.service_uuid == characteristic.service_uuid()
        })
        .ok_or(DriverError::UnknownCharacteristic {
            uuid: characteristic.uuid(),
        })
}

fn characteristic_properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn service_infos(services: &BTreeSet<Service>) -> Vec<ServiceInfo> {
    services
        .iter()
        .map(|service| {
            let characteristics = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicRef::new(
                        characteristic.service_uuid,
                        characteristic.uuid,
                        characteristic_properties(characteristic.properties),
                        characteristic
                            .descriptors
                            .iter()
                            .map(|descriptor| descriptor.uuid)
                            .collect(),
                    )
                })
                .collect();
            ServiceInfo::new(service.uuid, service.primary, characteristics)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use btleplug::api::Descriptor;
    use btleplug::api::bleuuid::uuid_from_u16;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CharPropFlags::NOTIFY, CharacteristicProperties { notify: true, ..CharacteristicProperties::default() })]
    #[case(CharPropFlags::READ | CharPropFlags::INDICATE, CharacteristicProperties { read: true, indicate: true, ..CharacteristicProperties::default() })]
    #[case(CharPropFlags::WRITE_WITHOUT_RESPONSE, CharacteristicProperties { write: true, ..CharacteristicProperties::default() })]
    fn characteristic_properties_map_platform_flags(
        #[case] flags: CharPropFlags,
        #[case] expected: CharacteristicProperties,
    ) {
        assert_eq!(expected, characteristic_properties(flags));
    }

    #[rstest]
    #[case::connected(true, true, true)]
    #[case::still_connecting(false, true, true)]
    #[case::already_released(false, false, false)]
    fn requested_disconnect_completes_unless_released(
        #[case] was_connected: bool,
        #[case] registered: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, owes_disconnect(was_connected, registered));
    }

    #[test]
    fn service_infos_carry_descriptors() {
        let service_uuid = uuid_from_u16(0x180D);
        let characteristic_uuid = uuid_from_u16(0x2A37);
        let cccd = uuid_from_u16(0x2902);
        let characteristic = Characteristic {
            uuid: characteristic_uuid,
            service_uuid,
            properties: CharPropFlags::NOTIFY,
            descriptors: BTreeSet::from([Descriptor {
                uuid: cccd,
                service_uuid,
                characteristic_uuid,
            }]),
        };
        let services = BTreeSet::from([Service {
            uuid: service_uuid,
            primary: true,
            characteristics: BTreeSet::from([characteristic]),
        }]);

        let infos = service_infos(&services);

        assert_eq!(1, infos.len());
        let found = infos[0]
            .characteristic(characteristic_uuid)
            .expect("characteristic should be listed");
        assert!(found.has_descriptor(cccd));
        assert!(found.properties().notify);
        assert_eq!(service_uuid, found.service_uuid());
    }
}
