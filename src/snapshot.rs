use crate::event::{ConnectionState, SensorEvent, StatusEvent};
use crate::sample::{AccelerationSample, SampleDecoder};

/// Consumer-side view of the sensor link, folded from status events.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SensorSnapshot {
    connection_state: ConnectionState,
    initializing_message: Option<String>,
    error_message: Option<String>,
    bytes: Vec<u8>,
    payloads_received: usize,
}

impl SensorSnapshot {
    /// Applies one event.
    pub fn apply(&mut self, event: &SensorEvent) {
        match event {
            StatusEvent::Loading { message } => {
                self.initializing_message = Some(message.clone());
                self.connection_state = ConnectionState::Initializing;
            }
            StatusEvent::Success { payload } => {
                self.connection_state = payload.connection_state();
                self.bytes = payload.bytes().to_vec();
                if payload.connection_state() == ConnectionState::Connected {
                    self.payloads_received += 1;
                }
            }
            StatusEvent::Error { message } => {
                self.error_message = Some(message.clone());
                self.connection_state = ConnectionState::Uninitialized;
            }
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    #[must_use]
    pub fn initializing_message(&self) -> Option<&str> {
        self.initializing_message.as_deref()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Bytes of the most recent payload.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of sensor payloads received while connected.
    #[must_use]
    pub fn payloads_received(&self) -> usize {
        self.payloads_received
    }

    /// Decodes the most recent payload, if it holds a full sample.
    #[must_use]
    pub fn latest_sample(&self) -> Option<AccelerationSample> {
        SampleDecoder::decode(&self.bytes).ok()
    }
}
