mod app;
mod cli;
mod error;
mod event;
mod hw;
mod manager;
mod protocol;
mod sample;
mod snapshot;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    DriverSource, RunOptions, fake_driver, real_driver, run, run_with_clients, run_with_options,
};
pub use cli::{Args, Command, FakeArgs, LogLevel, OutputFormat, WatchArgs};
pub use error::{DriverError, FixtureError, InvariantViolation, WatchError};
pub use event::{ConnectionState, EventStream, SensorEvent, SensorPayload, StatusEvent};
pub use hw::{
    BleDriver, BtleplugDriver, CharacteristicProperties, CharacteristicRef, ConnectionHandle,
    DeviceAddress, DiscoveredDevice, DriverCall, DriverCallbacks, DriverEvent, FakeDriver,
    FakeDriverConfig, FakeNotifyMode, GattStatus, HandleId, LinkState, NotificationPayloads,
    ScanFixture, ServiceInfo,
};
pub use manager::ConnectionManager;
pub use protocol::{
    CLIENT_CONFIG_DESCRIPTOR_UUID, DescriptorValue, MAX_CONNECTION_ATTEMPTS, REQUESTED_ATT_MTU,
    SENSOR_CHARACTERISTIC_UUID, SENSOR_SERVICE_UUID, SensorProfile, TARGET_DEVICE_ADDRESS,
};
pub use sample::{AccelerationSample, SampleDecodeError, SampleDecoder};
pub use snapshot::SensorSnapshot;
pub use terminal::TerminalClient;
