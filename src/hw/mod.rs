mod btleplug_backend;
mod driver;
mod fake_backend;
mod model;

pub use self::btleplug_backend::BtleplugDriver;
pub use self::driver::{
    BleDriver, ConnectionHandle, DriverCallbacks, DriverEvent, GattStatus, HandleId, LinkState,
};
pub use self::fake_backend::{
    DriverCall, FakeDriver, FakeDriverConfig, FakeNotifyMode, NotificationPayloads, ScanFixture,
};
pub use self::model::{
    CharacteristicProperties, CharacteristicRef, DeviceAddress, DiscoveredDevice, ServiceInfo,
};
