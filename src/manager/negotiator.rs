use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::error::{DriverError, InvariantViolation};
use crate::hw::{BleDriver, CharacteristicProperties, CharacteristicRef, ConnectionHandle, ServiceInfo};
use crate::protocol::{DescriptorValue, SensorProfile};

/// Outcome of configuring change delivery on the sensor characteristic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum Subscription {
    Enabled {
        characteristic: Uuid,
        mode: DescriptorValue,
    },
    /// The characteristic supports neither indication nor notification.
    Unsupported,
    CharacteristicMissing,
}

/// Picks the CCCD value for a characteristic, preferring indication.
pub(crate) fn select_descriptor_value(
    properties: CharacteristicProperties,
) -> Option<DescriptorValue> {
    if properties.indicate {
        Some(DescriptorValue::EnableIndication)
    } else if properties.notify {
        Some(DescriptorValue::EnableNotification)
    } else {
        None
    }
}

/// Post-connect configuration: discovery, MTU, then subscription.
#[derive(Debug)]
pub(crate) struct CapabilityNegotiator {
    service: Uuid,
    characteristic: Uuid,
    descriptor: Uuid,
    mtu: u16,
}

impl CapabilityNegotiator {
    pub(crate) fn new(profile: &SensorProfile) -> Self {
        Self {
            service: profile.service_uuid(),
            characteristic: profile.characteristic_uuid(),
            descriptor: profile.descriptor_uuid(),
            mtu: profile.mtu(),
        }
    }

    pub(crate) async fn discover(
        &self,
        driver: &dyn BleDriver,
        handle: &ConnectionHandle,
    ) -> Result<(), DriverError> {
        driver.discover_services(handle).await
    }

    /// Logs the discovered table and asks for a larger transport unit.
    pub(crate) async fn adjust_transport(
        &self,
        driver: &dyn BleDriver,
        handle: &ConnectionHandle,
    ) -> Result<(), DriverError> {
        match driver.services(handle).await {
            Ok(services) => log_gatt_table(&services),
            Err(error) => debug!(%error, "could not read the discovered GATT table"),
        }
        driver.request_mtu(handle, self.mtu).await
    }

    /// Finds the sensor characteristic and turns on change delivery.
    ///
    /// # Panics
    ///
    /// Panics when called without a live connection handle.
    #[instrument(skip_all, level = "debug", fields(characteristic = %self.characteristic))]
    pub(crate) async fn subscribe(
        &self,
        driver: &dyn BleDriver,
        handle: Option<&ConnectionHandle>,
    ) -> Result<Subscription, DriverError> {
        let Some(handle) = handle else {
            InvariantViolation::NoConnectionHandle {
                operation: "subscribe",
            }
            .raise()
        };

        let Some(characteristic) = driver
            .find_characteristic(handle, self.service, self.characteristic)
            .await?
        else {
            return Ok(Subscription::CharacteristicMissing);
        };
        let Some(mode) = select_descriptor_value(characteristic.properties()) else {
            debug!("characteristic supports neither indication nor notification");
            return Ok(Subscription::Unsupported);
        };

        driver.set_notifications(handle, &characteristic, true).await?;
        self.write_descriptor(driver, Some(handle), &characteristic, mode)
            .await?;
        debug!(%mode, "change delivery enabled");
        Ok(Subscription::Enabled {
            characteristic: characteristic.uuid(),
            mode,
        })
    }

    /// Turns change delivery off again. Failures are logged and ignored.
    #[instrument(skip_all, level = "debug")]
    pub(crate) async fn release(&self, driver: &dyn BleDriver, handle: &ConnectionHandle) {
        let characteristic = match driver
            .find_characteristic(handle, self.service, self.characteristic)
            .await
        {
            Ok(Some(characteristic)) => characteristic,
            Ok(None) => return,
            Err(error) => {
                debug!(%error, "could not look up the sensor characteristic while closing");
                return;
            }
        };

        if let Err(error) = driver.set_notifications(handle, &characteristic, false).await {
            warn!(%error, "failed to disable change delivery");
        }
        if let Err(error) = self
            .write_descriptor(driver, Some(handle), &characteristic, DescriptorValue::Disable)
            .await
        {
            warn!(%error, "failed to write the disable descriptor value");
        }
    }

    async fn write_descriptor(
        &self,
        driver: &dyn BleDriver,
        handle: Option<&ConnectionHandle>,
        characteristic: &CharacteristicRef,
        value: DescriptorValue,
    ) -> Result<(), DriverError> {
        let Some(handle) = handle else {
            InvariantViolation::NoConnectionHandle {
                operation: "write_descriptor",
            }
            .raise()
        };
        if !characteristic.has_descriptor(self.descriptor) {
            warn!(
                characteristic = %characteristic.uuid(),
                "characteristic has no configuration descriptor; nothing written"
            );
            return Ok(());
        }

        driver
            .write_descriptor(handle, characteristic, self.descriptor, &value.bytes())
            .await
    }
}

fn log_gatt_table(services: &[ServiceInfo]) {
    if services.is_empty() {
        debug!("no services discovered");
        return;
    }
    for service in services {
        debug!(service = %service.uuid(), primary = service.is_primary(), "discovered service");
        for characteristic in service.characteristics() {
            trace!(
                characteristic = %characteristic.uuid(),
                properties = %characteristic.properties().labels().join(","),
                descriptors = characteristic.descriptors().len(),
                "discovered characteristic"
            );
        }
    }
}
