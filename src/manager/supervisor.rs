use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::negotiator::{CapabilityNegotiator, Subscription};
use super::relay::NotificationRelay;
use super::scanner::DeviceScanner;
use crate::error::DriverError;
use crate::event::{ConnectionState, EventChannel, SensorPayload, StatusEvent};
use crate::hw::{
    BleDriver, ConnectionHandle, DiscoveredDevice, DriverEvent, GattStatus, HandleId, LinkState,
};
use crate::protocol::SensorProfile;

const SCAN_UNAVAILABLE: &str = "Could not start scanning";
const RETRIES_EXHAUSTED: &str = "Could not connect to device";
const PUBLISHER_MISSING: &str = "Could not find sensor publisher";

/// Internal pipeline phase.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Phase {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Negotiating,
    Streaming,
    Disconnected,
    Failed,
    Closed,
}

impl Phase {
    pub(crate) fn connection_state(self) -> ConnectionState {
        match self {
            Self::Idle | Self::Failed => ConnectionState::Uninitialized,
            Self::Scanning | Self::Connecting | Self::Negotiating => ConnectionState::Initializing,
            Self::Streaming => ConnectionState::Connected,
            Self::Disconnected | Self::Closed => ConnectionState::Disconnected,
        }
    }
}

/// Bounded count of connection attempts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct RetryCounter {
    current: u32,
    max: u32,
}

impl RetryCounter {
    pub(crate) fn new(max: u32) -> Self {
        Self { current: 1, max }
    }

    pub(crate) fn reset(&mut self) {
        self.current = 1;
    }

    pub(crate) fn current(self) -> u32 {
        self.current
    }

    pub(crate) fn max(self) -> u32 {
        self.max
    }

    /// Consumes one retry, returning the attempt number to announce.
    pub(crate) fn advance(&mut self) -> Option<u32> {
        if self.current > self.max {
            return None;
        }
        let attempt = self.current;
        self.current += 1;
        Some(attempt)
    }
}

/// Owns the live handle and drives every connection transition.
#[derive(Debug)]
pub(crate) struct ConnectionSupervisor {
    driver: Arc<dyn BleDriver>,
    events: EventChannel,
    state: watch::Sender<ConnectionState>,
    phase: Phase,
    handle: Option<ConnectionHandle>,
    retries: RetryCounter,
    scanner: DeviceScanner,
    negotiator: CapabilityNegotiator,
    relay: NotificationRelay,
    restart_on_disconnect: bool,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        driver: Arc<dyn BleDriver>,
        profile: &SensorProfile,
        events: EventChannel,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            driver,
            events,
            state,
            phase: Phase::Idle,
            handle: None,
            retries: RetryCounter::new(profile.max_attempts()),
            scanner: DeviceScanner::new(profile.address().clone()),
            negotiator: CapabilityNegotiator::new(profile),
            relay: NotificationRelay::default(),
            restart_on_disconnect: false,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn retries(&self) -> RetryCounter {
        self.retries
    }

    #[instrument(skip(self), level = "debug", fields(phase = %self.phase))]
    pub(crate) async fn start(&mut self) {
        self.retries.reset();
        self.restart_on_disconnect = false;
        self.begin_scan().await;
    }

    #[instrument(skip(self), level = "debug", fields(phase = %self.phase))]
    pub(crate) async fn disconnect(&mut self) {
        let Some(handle) = self.handle.as_ref() else {
            debug!("no connection to disconnect");
            return;
        };
        if let Err(error) = self.driver.disconnect(handle).await {
            warn!(%error, "disconnect request was rejected");
        }
    }

    #[instrument(skip(self), level = "debug", fields(phase = %self.phase))]
    pub(crate) async fn reconnect(&mut self) {
        let Some(handle) = self.handle.as_ref() else {
            debug!("no connection handle to reconnect; starting over");
            self.start().await;
            return;
        };
        let result = self.driver.reconnect(handle).await;
        match result {
            Ok(()) => self.set_phase(Phase::Connecting),
            Err(error) => self.attempt_failed(&error.to_string()).await,
        }
    }

    #[instrument(skip(self), level = "debug", fields(phase = %self.phase))]
    pub(crate) async fn restart(&mut self) {
        let Some(handle) = self.handle.as_ref() else {
            self.start().await;
            return;
        };
        self.restart_on_disconnect = true;
        if let Err(error) = self.driver.disconnect(handle).await {
            warn!(%error, "disconnect request was rejected; starting over directly");
            self.start().await;
        }
    }

    /// Stops scanning, releases the subscription and the handle. Terminal.
    #[instrument(skip(self), level = "debug", fields(phase = %self.phase))]
    pub(crate) async fn close(&mut self) {
        if self.scanner.is_scanning() {
            self.scanner.stop(&*self.driver).await;
        }
        if let Some(handle) = self.handle.as_ref() {
            self.negotiator.release(&*self.driver, handle).await;
        }
        self.release_handle().await;
        self.set_phase(Phase::Closed);
    }

    /// Applies one driver completion.
    pub(crate) async fn handle_event(&mut self, event: DriverEvent) {
        if self.phase == Phase::Closed {
            debug!(?event, "ignoring driver completion after close");
            return;
        }

        match event {
            DriverEvent::ScanResult { device } => self.on_scan_result(device).await,
            DriverEvent::ConnectionStateChanged {
                handle,
                status,
                state,
            } if self.is_live(handle) => self.on_link_changed(status, state).await,
            DriverEvent::ServicesDiscovered { handle, status } if self.is_live(handle) => {
                self.on_services_discovered(status).await;
            }
            DriverEvent::MtuChanged {
                handle,
                mtu,
                status,
            } if self.is_live(handle) => self.on_mtu_changed(mtu, status).await,
            DriverEvent::CharacteristicChanged {
                handle,
                characteristic,
                value,
            } if self.is_live(handle) => {
                self.relay.forward(&self.events, characteristic, value);
            }
            stale => debug!(event = ?stale, "dropping completion for a released handle"),
        }
    }

    fn is_live(&self, handle: HandleId) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|live| live.id() == handle)
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
        let next = phase.connection_state();
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn release_handle(&mut self) {
        self.relay.clear();
        if let Some(handle) = self.handle.take() {
            debug!(handle = %handle.id(), "releasing connection handle");
            self.driver.close_handle(handle).await;
        }
    }

    async fn begin_scan(&mut self) {
        self.release_handle().await;
        self.set_phase(Phase::Scanning);
        match self.scanner.start(&*self.driver, &self.events).await {
            Ok(true) => info!("scanning for sensor"),
            Ok(false) => {}
            Err(error) => {
                warn!(%error, "scan request was rejected");
                self.fail(SCAN_UNAVAILABLE);
            }
        }
    }

    fn fail(&mut self, message: &str) {
        self.events.emit(StatusEvent::error(message));
        self.set_phase(Phase::Failed);
    }

    async fn on_scan_result(&mut self, device: DiscoveredDevice) {
        if !self.scanner.claim(&*self.driver, &device).await {
            return;
        }

        self.events.emit(StatusEvent::loading("Connecting to device..."));
        self.set_phase(Phase::Connecting);
        match self.driver.connect(&device).await {
            Ok(handle) => {
                debug!(handle = %handle.id(), "connection requested");
                self.handle = Some(handle);
            }
            Err(error) => self.attempt_failed(&error.to_string()).await,
        }
    }

    async fn on_link_changed(&mut self, status: GattStatus, state: LinkState) {
        match (status, state) {
            (GattStatus::Success, LinkState::Connected) => {
                self.events.emit(StatusEvent::loading("Discovering services..."));
                self.set_phase(Phase::Negotiating);
                let result = match self.handle.as_ref() {
                    Some(handle) => self.negotiator.discover(&*self.driver, handle).await,
                    None => Ok(()),
                };
                if let Err(error) = result {
                    self.attempt_failed(&error.to_string()).await;
                }
            }
            (GattStatus::Success, LinkState::Disconnected) => {
                info!("sensor disconnected");
                self.events.emit(StatusEvent::success(SensorPayload::disconnected()));
                self.release_handle().await;
                self.set_phase(Phase::Disconnected);
                if std::mem::take(&mut self.restart_on_disconnect) {
                    self.start().await;
                }
            }
            (GattStatus::Failure(_), _) => {
                self.attempt_failed(&status.to_string()).await;
            }
        }
    }

    async fn on_services_discovered(&mut self, status: GattStatus) {
        if self.phase != Phase::Negotiating {
            debug!(phase = %self.phase, "unexpected discovery completion");
            return;
        }
        if !status.is_success() {
            self.attempt_failed(&format!("service discovery {status}")).await;
            return;
        }

        self.events.emit(StatusEvent::loading("Adjusting transport size..."));
        let result = match self.handle.as_ref() {
            Some(handle) => self.negotiator.adjust_transport(&*self.driver, handle).await,
            None => Ok(()),
        };
        if let Err(error) = result {
            self.attempt_failed(&error.to_string()).await;
        }
    }

    async fn on_mtu_changed(&mut self, mtu: u16, status: GattStatus) {
        if self.phase != Phase::Negotiating {
            debug!(phase = %self.phase, "unexpected MTU completion");
            return;
        }
        if status.is_success() {
            debug!(mtu, "transport size adjusted");
        } else {
            warn!(%status, "MTU request failed; continuing with the default size");
        }

        let result = self
            .negotiator
            .subscribe(&*self.driver, self.handle.as_ref())
            .await;
        self.on_subscription(result).await;
    }

    async fn on_subscription(&mut self, result: Result<Subscription, DriverError>) {
        match result {
            Ok(Subscription::Enabled {
                characteristic,
                mode,
            }) => {
                info!(%characteristic, %mode, "streaming sensor payloads");
                self.relay.subscribe(characteristic);
                self.set_phase(Phase::Streaming);
            }
            Ok(Subscription::Unsupported) => {}
            Ok(Subscription::CharacteristicMissing) => {
                warn!("sensor characteristic not found");
                self.fail(PUBLISHER_MISSING);
            }
            Err(error) => self.attempt_failed(&error.to_string()).await,
        }
    }

    /// Releases the handle, then either rescans or gives up.
    async fn attempt_failed(&mut self, reason: &str) {
        // A restart requested on the failed link is superseded by the rescan.
        self.restart_on_disconnect = false;
        self.release_handle().await;
        match self.retries.advance() {
            Some(attempt) => {
                info!(
                    reason,
                    attempt,
                    max = self.retries.max(),
                    "connection attempt failed; retrying"
                );
                self.events.emit(StatusEvent::loading(format!(
                    "Attempting to connect {attempt}/{}",
                    self.retries.max()
                )));
                self.begin_scan().await;
            }
            None => {
                warn!(reason, "connection attempts exhausted");
                self.fail(RETRIES_EXHAUSTED);
            }
        }
    }
}
