use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::model::{CharacteristicRef, DiscoveredDevice, ServiceInfo};
use crate::error::DriverError;

/// Driver-assigned identifier of one connection handle.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
#[display("#{_0}")]
pub struct HandleId(u64);

impl HandleId {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

/// A live link to the peripheral.
///
/// Not `Clone`: exactly one owner holds it until it is handed back through
/// [`BleDriver::close_handle`].
#[derive(Debug, Eq, PartialEq)]
pub struct ConnectionHandle {
    id: HandleId,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(id: HandleId) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }
}

/// Completion status reported with connection, discovery, and MTU callbacks.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum GattStatus {
    Success,
    /// Platform-specific failure code.
    Failure(u8),
}

impl GattStatus {
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure(code) => write!(f, "failure({code})"),
        }
    }
}

/// Link-layer state reported by a connection callback.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Completions a driver reports after a request was issued.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DriverEvent {
    ScanResult {
        device: DiscoveredDevice,
    },
    ConnectionStateChanged {
        handle: HandleId,
        status: GattStatus,
        state: LinkState,
    },
    ServicesDiscovered {
        handle: HandleId,
        status: GattStatus,
    },
    MtuChanged {
        handle: HandleId,
        mtu: u16,
        status: GattStatus,
    },
    CharacteristicChanged {
        handle: HandleId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Callback surface handed to a driver.
///
/// Every method enqueues and returns immediately, so the caller's execution
/// context is never held up by the manager or its subscribers.
#[derive(Debug, Clone)]
pub struct DriverCallbacks {
    sender: mpsc::UnboundedSender<DriverEvent>,
}

impl DriverCallbacks {
    /// Creates a callback surface and the receiving end drained by the manager.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn scan_result(&self, device: DiscoveredDevice) {
        self.deliver(DriverEvent::ScanResult { device });
    }

    pub fn connection_state_changed(&self, handle: HandleId, status: GattStatus, state: LinkState) {
        self.deliver(DriverEvent::ConnectionStateChanged {
            handle,
            status,
            state,
        });
    }

    pub fn services_discovered(&self, handle: HandleId, status: GattStatus) {
        self.deliver(DriverEvent::ServicesDiscovered { handle, status });
    }

    pub fn mtu_changed(&self, handle: HandleId, mtu: u16, status: GattStatus) {
        self.deliver(DriverEvent::MtuChanged {
            handle,
            mtu,
            status,
        });
    }

    pub fn characteristic_changed(&self, handle: HandleId, characteristic: Uuid, value: Vec<u8>) {
        self.deliver(DriverEvent::CharacteristicChanged {
            handle,
            characteristic,
            value,
        });
    }

    fn deliver(&self, event: DriverEvent) {
        if let Err(error) = self.sender.send(event) {
            trace!(event = ?error.0, "dropping driver callback; manager is gone");
        }
    }
}

/// Platform BLE capabilities consumed by the connection manager.
///
/// Requests return as soon as they are issued. Their outcome arrives later
/// through the [`DriverCallbacks`] passed to [`BleDriver::attach`].
#[async_trait]
pub trait BleDriver: Send + Sync + fmt::Debug {
    /// Registers the callback surface. Called once, before any request.
    fn attach(&self, callbacks: DriverCallbacks);

    /// Starts an unfiltered scan; results arrive as `ScanResult` callbacks.
    async fn start_scan(&self) -> Result<(), DriverError>;

    async fn stop_scan(&self) -> Result<(), DriverError>;

    /// Opens a link without auto-reconnect. The outcome arrives as a
    /// `ConnectionStateChanged` callback for the returned handle.
    async fn connect(&self, device: &DiscoveredDevice) -> Result<ConnectionHandle, DriverError>;

    async fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DriverError>;

    /// Re-establishes the link on an existing handle.
    async fn reconnect(&self, handle: &ConnectionHandle) -> Result<(), DriverError>;

    async fn discover_services(&self, handle: &ConnectionHandle) -> Result<(), DriverError>;

    async fn request_mtu(&self, handle: &ConnectionHandle, mtu: u16) -> Result<(), DriverError>;

    /// GATT table resolved by the last service discovery on this handle.
    async fn services(&self, handle: &ConnectionHandle) -> Result<Vec<ServiceInfo>, DriverError>;

    async fn find_characteristic(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicRef>, DriverError> {
        let services = self.services(handle).await?;
        Ok(services
            .iter()
            .find(|candidate| candidate.uuid() == service)
            .and_then(|candidate| candidate.characteristic(characteristic))
            .cloned())
    }

    /// Toggles local delivery of change callbacks for a characteristic.
    async fn set_notifications(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) -> Result<(), DriverError>;

    /// Best-effort descriptor write; no completion callback is required.
    async fn write_descriptor(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), DriverError>;

    /// Releases the handle and any platform resources bound to it.
    async fn close_handle(&self, handle: ConnectionHandle);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::DeviceAddress;

    #[tokio::test]
    async fn callbacks_preserve_arrival_order() {
        let (callbacks, mut receiver) = DriverCallbacks::channel();
        let handle = HandleId::new(7);
        let characteristic = Uuid::nil();

        callbacks.characteristic_changed(handle, characteristic, vec![1]);
        callbacks.characteristic_changed(handle, characteristic, vec![2]);
        callbacks.services_discovered(handle, GattStatus::Success);

        let mut received = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            received.push(event);
        }

        assert_eq!(
            vec![
                DriverEvent::CharacteristicChanged {
                    handle,
                    characteristic,
                    value: vec![1],
                },
                DriverEvent::CharacteristicChanged {
                    handle,
                    characteristic,
                    value: vec![2],
                },
                DriverEvent::ServicesDiscovered {
                    handle,
                    status: GattStatus::Success,
                },
            ],
            received
        );
    }

    #[test]
    fn callbacks_outliving_the_receiver_do_not_panic() {
        let (callbacks, receiver) = DriverCallbacks::channel();
        drop(receiver);

        callbacks.scan_result(DiscoveredDevice::new(
            "peripheral-1",
            DeviceAddress::from_static("AA:BB:CC:DD:EE:FF"),
            None,
            None,
        ));
    }

    #[test]
    fn handle_ids_render_with_hash_prefix() {
        assert_eq!("#3", HandleId::new(3).to_string());
        assert_eq!("failure(133)", GattStatus::Failure(133).to_string());
    }
}
