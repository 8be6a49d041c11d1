use thiserror::Error;
use tracing::error;

use crate::hw::HandleId;

/// Errors returned by BLE driver requests.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("device `{id}` is not known to the driver; scan again")]
    UnknownDevice { id: String },
    #[error("connection handle {handle} is not open")]
    UnknownHandle { handle: HandleId },
    #[error("characteristic {uuid} is not present on the connected device")]
    UnknownCharacteristic { uuid: uuid::Uuid },
    #[error("driver callbacks were not attached before use")]
    NotAttached,
}

/// Lifecycle defects: operations that can only happen through misuse of the manager.
///
/// These are never delivered as stream events. [`InvariantViolation::raise`] logs and panics.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum InvariantViolation {
    #[error("`{operation}` requires a live connection handle but none is held")]
    NoConnectionHandle { operation: &'static str },
    #[error("`{operation}` called after the connection manager was closed")]
    UsedAfterClose { operation: &'static str },
}

impl InvariantViolation {
    /// Fails loudly.
    #[track_caller]
    pub(crate) fn raise(self) -> ! {
        error!(violation = %self, "connection manager invariant violated");
        panic!("{self}");
    }
}

/// Errors returned when parsing fake driver fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake scan fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("invalid device address `{value}`")]
    InvalidAddress { value: String },
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("hex payload length must be even")]
    InvalidHexLength,
    #[error("hex payload contains invalid byte `{value}`")]
    InvalidHexByte { value: String },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Terminal outcomes of the `watch` command.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("sensor pipeline stopped: {message}")]
    PipelineFailed { message: String },
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
