use tracing::{debug, info, instrument, warn};

use crate::error::DriverError;
use crate::event::{EventChannel, StatusEvent};
use crate::hw::{BleDriver, DeviceAddress, DiscoveredDevice};

/// Scans for one peripheral by hardware address.
#[derive(Debug)]
pub(crate) struct DeviceScanner {
    target: DeviceAddress,
    scanning: bool,
}

impl DeviceScanner {
    pub(crate) fn new(target: DeviceAddress) -> Self {
        Self {
            target,
            scanning: false,
        }
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Begins an unfiltered driver scan.
    ///
    /// Returns `false` when a scan was already running.
    #[instrument(skip_all, level = "debug", fields(target = %self.target))]
    pub(crate) async fn start(
        &mut self,
        driver: &dyn BleDriver,
        events: &EventChannel,
    ) -> Result<bool, DriverError> {
        if self.scanning {
            debug!("scan already running");
            return Ok(false);
        }

        events.emit(StatusEvent::loading("Scanning..."));
        driver.start_scan().await?;
        self.scanning = true;
        Ok(true)
    }

    /// Claims a scan result if it is the target and a scan is running.
    ///
    /// A claimed result ends the scan; later results are ignored.
    pub(crate) async fn claim(&mut self, driver: &dyn BleDriver, device: &DiscoveredDevice) -> bool {
        if !self.scanning || !self.target.matches(device.address()) {
            return false;
        }

        info!(address = %device.address(), rssi = ?device.rssi(), "found target device");
        self.stop(driver).await;
        true
    }

    pub(crate) async fn stop(&mut self, driver: &dyn BleDriver) {
        self.scanning = false;
        if let Err(error) = driver.stop_scan().await {
            warn!(%error, "failed to stop scan cleanly");
        }
    }
}
