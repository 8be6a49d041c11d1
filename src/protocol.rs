use bon::Builder;
use strum_macros::{Display, EnumIter};
use uuid::{Uuid, uuid};

use crate::hw::DeviceAddress;

/// Hardware address of the sensor unit this crate talks to.
pub const TARGET_DEVICE_ADDRESS: &str = "ED:2A:4E:FD:81:0E";

/// Service exposing the accelerometer publisher.
pub const SENSOR_SERVICE_UUID: Uuid = uuid!("00000000-0001-11e1-9ab4-0002a5d5c51b");

/// Characteristic publishing raw accelerometer samples.
pub const SENSOR_CHARACTERISTIC_UUID: Uuid = uuid!("00000011-0002-11e1-ac36-0002a5d5c51b");

/// Client characteristic configuration descriptor (CCCD, `0x2902`).
pub const CLIENT_CONFIG_DESCRIPTOR_UUID: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Largest ATT MTU a client may request.
pub const REQUESTED_ATT_MTU: u16 = 517;

/// Connection attempts made before giving up.
pub const MAX_CONNECTION_ATTEMPTS: u32 = 5;

/// Values written to a CCCD.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum DescriptorValue {
    #[strum(to_string = "notification")]
    EnableNotification,
    #[strum(to_string = "indication")]
    EnableIndication,
    #[strum(to_string = "disabled")]
    Disable,
}

impl DescriptorValue {
    /// Little-endian CCCD payload for this value.
    #[must_use]
    pub fn bytes(self) -> [u8; 2] {
        match self {
            Self::EnableNotification => [0x01, 0x00],
            Self::EnableIndication => [0x02, 0x00],
            Self::Disable => [0x00, 0x00],
        }
    }

    /// Maps a raw CCCD payload back to a known value.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <Self as strum::IntoEnumIterator>::iter().find(|value| value.bytes() == bytes)
    }
}

/// Identifiers and limits describing the sensor peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct SensorProfile {
    #[builder(default = DeviceAddress::from_static(TARGET_DEVICE_ADDRESS))]
    address: DeviceAddress,
    #[builder(default = SENSOR_SERVICE_UUID)]
    service_uuid: Uuid,
    #[builder(default = SENSOR_CHARACTERISTIC_UUID)]
    characteristic_uuid: Uuid,
    #[builder(default = CLIENT_CONFIG_DESCRIPTOR_UUID)]
    descriptor_uuid: Uuid,
    #[builder(default = REQUESTED_ATT_MTU)]
    mtu: u16,
    #[builder(default = MAX_CONNECTION_ATTEMPTS)]
    max_attempts: u32,
}

impl Default for SensorProfile {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SensorProfile {
    #[must_use]
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    #[must_use]
    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    #[must_use]
    pub fn characteristic_uuid(&self) -> Uuid {
        self.characteristic_uuid
    }

    #[must_use]
    pub fn descriptor_uuid(&self) -> Uuid {
        self.descriptor_uuid
    }

    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DescriptorValue::EnableNotification, [0x01, 0x00])]
    #[case(DescriptorValue::EnableIndication, [0x02, 0x00])]
    #[case(DescriptorValue::Disable, [0x00, 0x00])]
    fn descriptor_values_match_cccd_encoding(
        #[case] value: DescriptorValue,
        #[case] expected: [u8; 2],
    ) {
        assert_eq!(expected, value.bytes());
        assert_eq!(Some(value), DescriptorValue::from_bytes(&expected));
    }

    #[test]
    fn default_profile_targets_the_sensor_unit() {
        let profile = SensorProfile::default();

        assert_eq!("ED:2A:4E:FD:81:0E", profile.address().as_str());
        assert_eq!(517, profile.mtu());
        assert_eq!(5, profile.max_attempts());
        assert_eq!(
            "00000011-0002-11e1-ac36-0002a5d5c51b",
            profile.characteristic_uuid().to_string()
        );
    }

    #[test]
    fn builder_overrides_only_the_address() {
        let address: DeviceAddress = "aa:bb:cc:dd:ee:ff".parse().expect("address should parse");
        let profile = SensorProfile::builder().address(address).build();

        assert_eq!("AA:BB:CC:DD:EE:FF", profile.address().as_str());
        assert_eq!(SENSOR_SERVICE_UUID, profile.service_uuid());
    }
}
