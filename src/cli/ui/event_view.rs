use std::fmt::{self, Display, Formatter};

use crate::event::{ConnectionState, SensorEvent, StatusEvent};
use crate::sample::SampleDecoder;
use crate::utils::format_hex;

use super::painter::Painter;

/// Renders a single sensor event line.
pub(crate) struct EventView<'a> {
    index: usize,
    event: &'a SensorEvent,
    painter: &'a Painter,
}

impl<'a> EventView<'a> {
    pub(crate) fn new(index: usize, event: &'a SensorEvent, painter: &'a Painter) -> Self {
        Self {
            index,
            event,
            painter,
        }
    }
}

impl Display for EventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        match self.event {
            StatusEvent::Loading { message } => {
                write!(f, "{index_label} {} {message}", self.painter.value("loading"))
            }
            StatusEvent::Error { message } => {
                write!(
                    f,
                    "{index_label} {} {}",
                    self.painter.error("error"),
                    self.painter.error(message)
                )
            }
            StatusEvent::Success { payload }
                if payload.connection_state() == ConnectionState::Disconnected =>
            {
                write!(
                    f,
                    "{index_label} {}",
                    self.painter.state(payload.connection_state())
                )
            }
            StatusEvent::Success { payload } => {
                let raw = self
                    .painter
                    .muted(format!("raw={}", format_hex(payload.bytes())));
                match SampleDecoder::decode(payload.bytes()) {
                    Ok(sample) => write!(
                        f,
                        "{index_label} {} {} {raw}",
                        self.painter.success("payload"),
                        self.painter.value(sample.to_string())
                    ),
                    Err(error) => write!(
                        f,
                        "{index_label} {} {} {raw}",
                        self.painter.success("payload"),
                        self.painter.warning(error.to_string())
                    ),
                }
            }
        }
    }
}
