use std::fmt::{self, Display, Formatter};

use crate::protocol::SensorProfile;

use super::painter::Painter;
use super::table::Table;

/// Renders the identifiers and limits used to reach the sensor.
pub(crate) struct ProfileView<'a> {
    profile: &'a SensorProfile,
    painter: &'a Painter,
}

impl<'a> ProfileView<'a> {
    pub(crate) fn new(profile: &'a SensorProfile, painter: &'a Painter) -> Self {
        Self { profile, painter }
    }
}

impl Display for ProfileView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("address", self.painter.value(self.profile.address().as_str())),
                ("service", self.profile.service_uuid().to_string()),
                ("characteristic", self.profile.characteristic_uuid().to_string()),
                ("descriptor", self.profile.descriptor_uuid().to_string()),
                ("mtu", self.profile.mtu().to_string()),
                ("max_attempts", self.profile.max_attempts().to_string()),
            ],
        );
        write!(f, "{}", self.painter.heading("Sensor profile:"))?;
        write!(f, "\n{table}")
    }
}
