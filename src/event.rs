use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Serialize;
use serde_with::serde_as;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, trace};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Externally visible lifecycle phase of the sensor link.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Initializing,
    Connected,
    Disconnected,
}

/// Raw sensor bytes with the link state they were observed in.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SensorPayload {
    #[serde_as(as = "serde_with::hex::Hex")]
    bytes: Vec<u8>,
    connection_state: ConnectionState,
}

impl SensorPayload {
    /// A payload received from the subscribed characteristic.
    #[must_use]
    pub fn connected(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            connection_state: ConnectionState::Connected,
        }
    }

    /// The synthetic payload published when the link goes down.
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            bytes: Vec::new(),
            connection_state: ConnectionState::Disconnected,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }
}

/// One status update from the connection pipeline.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusEvent<T> {
    /// Work is in progress.
    Loading { message: String },
    /// A step completed with a value.
    Success { payload: T },
    /// The pipeline stopped and will not retry on its own.
    Error { message: String },
}

impl<T> StatusEvent<T> {
    pub fn loading(message: impl Into<String>) -> Self {
        Self::Loading {
            message: message.into(),
        }
    }

    pub fn success(payload: T) -> Self {
        Self::Success { payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

pub type SensorEvent = StatusEvent<SensorPayload>;

/// Multi-subscriber broadcast of sensor events.
///
/// Subscribers only see events published after they subscribed.
#[derive(Debug, Clone)]
pub(crate) struct EventChannel {
    sender: broadcast::Sender<SensorEvent>,
}

impl EventChannel {
    pub(crate) fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn emit(&self, event: SensorEvent) {
        trace!(?event, "emitting sensor event");
        if self.sender.send(event).is_err() {
            trace!("no subscribers attached; event dropped");
        }
    }

    pub(crate) fn subscribe(&self) -> EventStream {
        EventStream {
            inner: BroadcastStream::new(self.sender.subscribe()),
        }
    }
}

/// Stream of sensor events for one subscriber.
///
/// A subscriber that falls behind skips the overwritten events.
#[derive(Debug)]
pub struct EventStream {
    inner: BroadcastStream<SensorEvent>,
}

impl Stream for EventStream {
    type Item = SensorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    debug!(skipped, "event subscriber lagged; skipping missed events");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
