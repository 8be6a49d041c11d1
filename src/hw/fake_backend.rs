use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use strum_macros::{Display, EnumString};
use tokio::time::sleep;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::driver::{BleDriver, ConnectionHandle, DriverCallbacks, GattStatus, HandleId, LinkState};
use super::model::{
    CharacteristicProperties, CharacteristicRef, DeviceAddress, DiscoveredDevice, ServiceInfo,
};
use crate::error::{DriverError, FixtureError};
use crate::protocol::{
    CLIENT_CONFIG_DESCRIPTOR_UUID, DescriptorValue, REQUESTED_ATT_MTU, SENSOR_CHARACTERISTIC_UUID,
    SENSOR_SERVICE_UUID,
};

/// Status code reported for a scripted connection failure.
const FAKE_CONNECT_FAILURE: GattStatus = GattStatus::Failure(133);
/// Status code reported when the link drops on its own.
const FAKE_LINK_LOSS: GattStatus = GattStatus::Failure(8);

const DEFAULT_NOTIFICATIONS: [[u8; 6]; 2] = [
    [0x10, 0x00, 0x20, 0x00, 0x00, 0x04],
    [0x12, 0x00, 0x1E, 0x00, 0xFE, 0x03],
];

/// Parsed fake scan fixture records: `ADDRESS|name|rssi;...`.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<DiscoveredDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }

        let devices = value
            .split(';')
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }
}

/// Parsed fake notification payloads: comma-separated hex strings.
#[derive(Debug, Clone, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self {
                payloads: Vec::new(),
            });
        }
        let payloads = value.split(',').map(parse_hex).collect::<Result<_, _>>()?;
        Ok(Self { payloads })
    }
}

/// Change-delivery properties the fake sensor characteristic advertises.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FakeNotifyMode {
    #[default]
    Notify,
    Indicate,
    Both,
    None,
}

impl FakeNotifyMode {
    fn properties(self) -> CharacteristicProperties {
        CharacteristicProperties {
            read: true,
            write: false,
            notify: matches!(self, Self::Notify | Self::Both),
            indicate: matches!(self, Self::Indicate | Self::Both),
        }
    }
}

/// Settings for constructing a [`FakeDriver`].
#[derive(Debug, Builder)]
pub struct FakeDriverConfig {
    scan_fixture: ScanFixture,
    /// Connection attempts that fail before one succeeds.
    #[builder(default)]
    connect_failures: usize,
    #[builder(default)]
    notify_mode: FakeNotifyMode,
    /// Omits the sensor characteristic from the GATT table.
    #[builder(default)]
    missing_characteristic: bool,
    /// Omits the client configuration descriptor from the sensor characteristic.
    #[builder(default)]
    missing_descriptor: bool,
    /// Rejects `start_scan` synchronously.
    #[builder(default)]
    reject_scan: bool,
    notifications: Option<NotificationPayloads>,
    #[builder(default = REQUESTED_ATT_MTU)]
    mtu: u16,
    #[builder(default)]
    discovery_delay: Duration,
}

/// A request observed by the fake driver, in call order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DriverCall {
    StartScan,
    StopScan,
    Connect { address: DeviceAddress },
    Disconnect { handle: HandleId },
    Reconnect { handle: HandleId },
    DiscoverServices { handle: HandleId },
    RequestMtu { handle: HandleId, mtu: u16 },
    SetNotifications { characteristic: Uuid, enabled: bool },
    WriteDescriptor { descriptor: Uuid, value: Vec<u8> },
    CloseHandle { handle: HandleId },
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<DriverCall>,
    connect_failures_left: usize,
    open_handles: HashMap<HandleId, DeviceAddress>,
    latest_handle: Option<HandleId>,
}

/// Scripted driver used in tests and non-hardware environments.
///
/// Every request records a [`DriverCall`] and posts its canned completion
/// through the attached callbacks.
#[derive(Debug)]
pub struct FakeDriver {
    devices: Vec<DiscoveredDevice>,
    services: Vec<ServiceInfo>,
    notifications: Vec<Vec<u8>>,
    negotiated_mtu: u16,
    reject_scan: bool,
    discovery_delay: Duration,
    callbacks: OnceLock<DriverCallbacks>,
    next_handle: AtomicU64,
    state: Mutex<FakeState>,
}

impl FakeDriver {
    #[must_use]
    pub fn new(config: FakeDriverConfig) -> Self {
        let notifications = config.notifications.map_or_else(
            || DEFAULT_NOTIFICATIONS.map(Vec::from).to_vec(),
            Into::into,
        );

        Self {
            devices: config.scan_fixture.into(),
            services: fake_services(
                config.notify_mode,
                config.missing_characteristic,
                config.missing_descriptor,
            ),
            notifications,
            negotiated_mtu: config.mtu,
            reject_scan: config.reject_scan,
            discovery_delay: config.discovery_delay,
            callbacks: OnceLock::new(),
            next_handle: AtomicU64::new(1),
            state: Mutex::new(FakeState {
                connect_failures_left: config.connect_failures,
                ..FakeState::default()
            }),
        }
    }

    /// Requests observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    /// The callback surface, for injecting arbitrary completions.
    #[must_use]
    pub fn callbacks(&self) -> Option<DriverCallbacks> {
        self.callbacks.get().cloned()
    }

    /// Handle of the most recent connection attempt.
    #[must_use]
    pub fn latest_handle(&self) -> Option<HandleId> {
        self.state().latest_handle
    }

    /// Publishes a change on the sensor characteristic of the latest handle.
    pub fn notify(&self, value: &[u8]) {
        self.notify_characteristic(SENSOR_CHARACTERISTIC_UUID, value);
    }

    /// Publishes a change on any characteristic of the latest handle.
    pub fn notify_characteristic(&self, characteristic: Uuid, value: &[u8]) {
        let Some(handle) = self.latest_handle() else {
            debug!("no fake connection to notify on");
            return;
        };
        if let Some(callbacks) = self.callbacks.get() {
            callbacks.characteristic_changed(handle, characteristic, value.to_vec());
        }
    }

    /// Simulates the link being lost with an error status.
    pub fn drop_link(&self) {
        self.report_disconnect(FAKE_LINK_LOSS);
    }

    /// Simulates the peripheral closing the link cleanly.
    pub fn peer_disconnect(&self) {
        self.report_disconnect(GattStatus::Success);
    }

    fn report_disconnect(&self, status: GattStatus) {
        let Some(handle) = self.latest_handle() else {
            return;
        };
        if let Some(callbacks) = self.callbacks.get() {
            callbacks.connection_state_changed(handle, status, LinkState::Disconnected);
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: DriverCall) {
        trace!(?call, "fake driver request");
        self.state().calls.push(call);
    }

    fn callbacks_or_err(&self) -> Result<&DriverCallbacks, DriverError> {
        self.callbacks.get().ok_or(DriverError::NotAttached)
    }

    fn ensure_open(&self, handle: &ConnectionHandle) -> Result<(), DriverError> {
        if self.state().open_handles.contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(DriverError::UnknownHandle { handle: handle.id() })
        }
    }

    /// Consumes one scripted failure, if any remain.
    fn next_link_status(&self) -> (GattStatus, LinkState) {
        let mut state = self.state();
        if state.connect_failures_left > 0 {
            state.connect_failures_left -= 1;
            (FAKE_CONNECT_FAILURE, LinkState::Disconnected)
        } else {
            (GattStatus::Success, LinkState::Connected)
        }
    }
}

#[async_trait]
impl BleDriver for FakeDriver {
    fn attach(&self, callbacks: DriverCallbacks) {
        if self.callbacks.set(callbacks).is_err() {
            debug!("fake driver callbacks already attached; keeping the first");
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn start_scan(&self) -> Result<(), DriverError> {
        self.record(DriverCall::StartScan);
        if self.reject_scan {
            return Err(DriverError::NoAdapters);
        }

        let callbacks = self.callbacks_or_err()?.clone();
        let devices = self.devices.clone();
        if self.discovery_delay.is_zero() {
            devices
                .into_iter()
                .for_each(|device| callbacks.scan_result(device));
        } else {
            let delay = self.discovery_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                devices
                    .into_iter()
                    .for_each(|device| callbacks.scan_result(device));
            });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DriverError> {
        self.record(DriverCall::StopScan);
        Ok(())
    }

    #[instrument(skip(self, device), level = "trace", fields(address = %device.address()))]
    async fn connect(&self, device: &DiscoveredDevice) -> Result<ConnectionHandle, DriverError> {
        self.record(DriverCall::Connect {
            address: device.address().clone(),
        });
        if !self.devices.iter().any(|known| known.id() == device.id()) {
            return Err(DriverError::UnknownDevice {
                id: device.id().to_string(),
            });
        }

        let callbacks = self.callbacks_or_err()?;
        let id = HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        {
            let mut state = self.state();
            state.open_handles.insert(id, device.address().clone());
            state.latest_handle = Some(id);
        }

        let (status, link) = self.next_link_status();
        callbacks.connection_state_changed(id, status, link);
        Ok(ConnectionHandle::new(id))
    }

    async fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DriverError> {
        self.record(DriverCall::Disconnect { handle: handle.id() });
        self.ensure_open(handle)?;
        self.callbacks_or_err()?.connection_state_changed(
            handle.id(),
            GattStatus::Success,
            LinkState::Disconnected,
        );
        Ok(())
    }

    async fn reconnect(&self, handle: &ConnectionHandle) -> Result<(), DriverError> {
        self.record(DriverCall::Reconnect { handle: handle.id() });
        self.ensure_open(handle)?;
        let (status, link) = self.next_link_status();
        self.callbacks_or_err()?
            .connection_state_changed(handle.id(), status, link);
        Ok(())
    }

    async fn discover_services(&self, handle: &ConnectionHandle) -> Result<(), DriverError> {
        self.record(DriverCall::DiscoverServices { handle: handle.id() });
        self.ensure_open(handle)?;
        self.callbacks_or_err()?
            .services_discovered(handle.id(), GattStatus::Success);
        Ok(())
    }

    async fn request_mtu(&self, handle: &ConnectionHandle, mtu: u16) -> Result<(), DriverError> {
        self.record(DriverCall::RequestMtu {
            handle: handle.id(),
            mtu,
        });
        self.ensure_open(handle)?;
        self.callbacks_or_err()?.mtu_changed(
            handle.id(),
            mtu.min(self.negotiated_mtu),
            GattStatus::Success,
        );
        Ok(())
    }

    async fn services(&self, handle: &ConnectionHandle) -> Result<Vec<ServiceInfo>, DriverError> {
        self.ensure_open(handle)?;
        Ok(self.services.clone())
    }

    async fn set_notifications(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) -> Result<(), DriverError> {
        self.record(DriverCall::SetNotifications {
            characteristic: characteristic.uuid(),
            enabled,
        });
        self.ensure_open(handle)
    }

    async fn write_descriptor(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), DriverError> {
        self.record(DriverCall::WriteDescriptor {
            descriptor,
            value: value.to_vec(),
        });
        self.ensure_open(handle)?;

        let enables = matches!(
            DescriptorValue::from_bytes(value),
            Some(DescriptorValue::EnableNotification | DescriptorValue::EnableIndication)
        );
        if enables {
            let callbacks = self.callbacks_or_err()?;
            for payload in &self.notifications {
                callbacks.characteristic_changed(handle.id(), characteristic.uuid(), payload.clone());
            }
        }
        Ok(())
    }

    async fn close_handle(&self, handle: ConnectionHandle) {
        self.record(DriverCall::CloseHandle { handle: handle.id() });
        self.state().open_handles.remove(&handle.id());
    }
}

fn parse_scan_record(raw_record: &str) -> Result<DiscoveredDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [address, name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if address.is_empty() || name.is_empty() || rssi.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let address: DeviceAddress = address.parse()?;
    let local_name = (*name != "-").then(|| (*name).to_string());
    let rssi = if *rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };

    Ok(DiscoveredDevice::new(
        address.to_string(),
        address,
        local_name,
        rssi,
    ))
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    if !cleaned.len().is_multiple_of(2) {
        return Err(FixtureError::InvalidHexLength);
    }

    cleaned
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let digits = String::from_utf8_lossy(pair);
            u8::from_str_radix(&digits, 16).map_err(|_| FixtureError::InvalidHexByte {
                value: digits.to_string(),
            })
        })
        .collect()
}

fn fake_services(
    notify_mode: FakeNotifyMode,
    missing_characteristic: bool,
    missing_descriptor: bool,
) -> Vec<ServiceInfo> {
    let descriptors = if missing_descriptor {
        Vec::new()
    } else {
        vec![CLIENT_CONFIG_DESCRIPTOR_UUID]
    };
    let characteristics = if missing_characteristic {
        Vec::new()
    } else {
        vec![CharacteristicRef::new(
            SENSOR_SERVICE_UUID,
            SENSOR_CHARACTERISTIC_UUID,
            notify_mode.properties(),
            descriptors,
        )]
    };

    vec![ServiceInfo::new(SENSOR_SERVICE_UUID, true, characteristics)]
}
