//! Connection manager for one BLE sensor.
//!
//! [`ConnectionManager`] scans for the sensor by hardware address, connects,
//! negotiates the transport, subscribes to the sensor characteristic, and
//! republishes every change as a [`SensorEvent`](crate::SensorEvent).

mod negotiator;
mod relay;
mod scanner;
mod supervisor;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use self::supervisor::ConnectionSupervisor;
use crate::error::InvariantViolation;
use crate::event::{ConnectionState, EventChannel, EventStream};
use crate::hw::{BleDriver, DriverCallbacks, DriverEvent};
use crate::protocol::SensorProfile;

/// Facade over the scan, connect, negotiate, and relay pipeline.
///
/// Must be created inside a tokio runtime. Call [`ConnectionManager::close`]
/// once when done.
///
/// ```no_run
/// # async fn demo() -> anyhow::Result<()> {
/// use std::sync::Arc;
///
/// use tokio_stream::StreamExt;
///
/// let driver = Arc::new(sensorlink::BtleplugDriver::new().await?);
/// let manager = sensorlink::ConnectionManager::new(driver);
/// let mut events = manager.subscribe();
/// manager.start().await;
/// while let Some(event) = events.next().await {
///     println!("{event:?}");
/// }
/// manager.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionManager {
    supervisor: Arc<Mutex<ConnectionSupervisor>>,
    events: EventChannel,
    state: watch::Receiver<ConnectionState>,
    scope: CancellationToken,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Creates a manager for the default sensor profile.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new(driver: Arc<dyn BleDriver>) -> Self {
        Self::with_profile(driver, SensorProfile::default())
    }

    /// Creates a manager for a specific sensor profile.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn with_profile(driver: Arc<dyn BleDriver>, profile: SensorProfile) -> Self {
        let events = EventChannel::new();
        let (state_sender, state) = watch::channel(ConnectionState::default());
        let (callbacks, completions) = DriverCallbacks::channel();
        driver.attach(callbacks);

        let supervisor = Arc::new(Mutex::new(ConnectionSupervisor::new(
            driver,
            &profile,
            events.clone(),
            state_sender,
        )));
        let scope = CancellationToken::new();
        tokio::spawn(drain_completions(
            Arc::clone(&supervisor),
            completions,
            scope.clone(),
        ));

        Self {
            supervisor,
            events,
            state,
            scope,
            closed: AtomicBool::new(false),
        }
    }

    /// Events published from now on. Earlier events are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every connection state change.
    #[must_use]
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Resets the retry budget and scans for the sensor again.
    #[instrument(skip(self), level = "info")]
    pub async fn start(&self) {
        if self.ignored_after_close("start") {
            return;
        }
        self.supervisor.lock().await.start().await;
    }

    /// Asks the driver to drop the current link, if any.
    #[instrument(skip(self), level = "info")]
    pub async fn disconnect(&self) {
        if self.ignored_after_close("disconnect") {
            return;
        }
        self.supervisor.lock().await.disconnect().await;
    }

    /// Re-establishes the link on the current handle without scanning.
    ///
    /// Starts over from scanning when no handle is held.
    ///
    /// # Panics
    ///
    /// Panics when called after [`ConnectionManager::close`].
    #[instrument(skip(self), level = "info")]
    pub async fn reconnect(&self) {
        if self.closed.load(Ordering::SeqCst) {
            InvariantViolation::UsedAfterClose {
                operation: "reconnect",
            }
            .raise();
        }
        self.supervisor.lock().await.reconnect().await;
    }

    /// Drops the current link and starts over from scanning once it is down.
    #[instrument(skip(self), level = "info")]
    pub async fn restart(&self) {
        if self.ignored_after_close("restart") {
            return;
        }
        self.supervisor.lock().await.restart().await;
    }

    /// Stops scanning, releases the subscription and handle, then ends the
    /// manager's background work. Later calls are no-ops.
    #[instrument(skip(self), level = "info")]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("connection manager already closed");
            return;
        }
        self.supervisor.lock().await.close().await;
        self.scope.cancel();
    }

    fn ignored_after_close(&self, operation: &'static str) -> bool {
        let closed = self.closed.load(Ordering::SeqCst);
        if closed {
            warn!(operation, "connection manager is closed; ignoring call");
        }
        closed
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!("connection manager dropped without close; cancelling background work");
        }
        self.scope.cancel();
    }
}

/// Applies driver completions in arrival order until the scope ends.
async fn drain_completions(
    supervisor: Arc<Mutex<ConnectionSupervisor>>,
    mut completions: mpsc::UnboundedReceiver<DriverEvent>,
    scope: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = scope.cancelled() => break,
            completion = completions.recv() => {
                let Some(event) = completion else {
                    break;
                };
                supervisor.lock().await.handle_event(event).await;
            }
        }
    }
    debug!("driver completion loop stopped");
}
