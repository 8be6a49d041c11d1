use std::fmt;
use std::str::FromStr;

use serde_with::SerializeDisplay;
use uuid::Uuid;

use crate::error::FixtureError;

/// Hardware address in colon-separated, upper-case hex form.
#[derive(Debug, Clone, Eq, PartialEq, Hash, SerializeDisplay)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub(crate) fn from_static(value: &'static str) -> Self {
        Self(value.to_ascii_uppercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against an address reported by a driver, ignoring case.
    #[must_use]
    pub fn matches(&self, other: &DeviceAddress) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceAddress {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let octets: Vec<&str> = value.split(':').collect();
        let well_formed = octets.len() == 6
            && octets
                .iter()
                .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return Err(FixtureError::InvalidAddress {
                value: value.to_string(),
            });
        }

        Ok(Self(value.to_ascii_uppercase()))
    }
}

/// A peripheral reported by a driver scan.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiscoveredDevice {
    id: String,
    address: DeviceAddress,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Creates a discovered-device record. `id` is the driver's own peripheral key.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        address: DeviceAddress,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            id: id.into(),
            address,
            local_name,
            rssi,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }
}

/// Capabilities a characteristic declares.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Property labels in the order they are usually listed.
    #[must_use]
    pub fn labels(self) -> Vec<&'static str> {
        let mut labels = Vec::with_capacity(4);
        if self.read {
            labels.push("read");
        }
        if self.write {
            labels.push("write");
        }
        if self.notify {
            labels.push("notify");
        }
        if self.indicate {
            labels.push("indicate");
        }
        if labels.is_empty() {
            labels.push("none");
        }
        labels
    }
}

/// A characteristic discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicRef {
    service_uuid: Uuid,
    uuid: Uuid,
    properties: CharacteristicProperties,
    descriptors: Vec<Uuid>,
}

impl CharacteristicRef {
    #[must_use]
    pub fn new(
        service_uuid: Uuid,
        uuid: Uuid,
        properties: CharacteristicProperties,
        descriptors: Vec<Uuid>,
    ) -> Self {
        Self {
            service_uuid,
            uuid,
            properties,
            descriptors,
        }
    }

    #[must_use]
    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// Returns whether the characteristic carries a descriptor with this UUID.
    #[must_use]
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }

    #[must_use]
    pub fn descriptors(&self) -> &[Uuid] {
        &self.descriptors
    }
}

/// A GATT service with its discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    uuid: Uuid,
    primary: bool,
    characteristics: Vec<CharacteristicRef>,
}

impl ServiceInfo {
    #[must_use]
    pub fn new(uuid: Uuid, primary: bool, characteristics: Vec<CharacteristicRef>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicRef] {
        &self.characteristics
    }

    /// Finds a characteristic of this service by UUID.
    #[must_use]
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicRef> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ed:2a:4e:fd:81:0e", "ED:2A:4E:FD:81:0E")]
    #[case(" AA:BB:CC:DD:EE:FF ", "AA:BB:CC:DD:EE:FF")]
    fn address_parsing_normalises_case(#[case] raw: &str, #[case] expected: &str) {
        let address: DeviceAddress = raw.parse().expect("address should parse");
        assert_eq!(expected, address.as_str());
    }

    #[rstest]
    #[case("AA:BB:CC")]
    #[case("AA:BB:CC:DD:EE:GG")]
    #[case("AABBCCDDEEFF")]
    fn address_parsing_rejects_malformed_values(#[case] raw: &str) {
        let result = raw.parse::<DeviceAddress>();
        assert_matches!(result, Err(FixtureError::InvalidAddress { .. }));
    }

    #[test]
    fn address_matching_ignores_case() {
        let target = DeviceAddress::from_static("ED:2A:4E:FD:81:0E");
        let reported: DeviceAddress = "ed:2a:4e:fd:81:0e".parse().expect("address should parse");
        assert!(target.matches(&reported));
    }

    #[test]
    fn property_labels_fall_back_to_none() {
        assert_eq!(vec!["none"], CharacteristicProperties::default().labels());
        let props = CharacteristicProperties {
            notify: true,
            indicate: true,
            ..CharacteristicProperties::default()
        };
        assert_eq!(vec!["notify", "indicate"], props.labels());
    }
}
