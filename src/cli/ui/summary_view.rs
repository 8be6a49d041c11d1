use std::fmt::{self, Display, Formatter};

use crate::cli::watch::{WatchStopReason, WatchSummary};

use super::painter::Painter;
use super::table::Table;

/// Renders the end-of-watch summary.
pub(crate) struct SummaryView<'a> {
    summary: &'a WatchSummary,
    painter: &'a Painter,
}

impl<'a> SummaryView<'a> {
    pub(crate) fn new(summary: &'a WatchSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for SummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = self.summary.stop_reason().to_string();
        let stop_reason = match self.summary.stop_reason() {
            WatchStopReason::ReachedLimit(_) => self.painter.success(reason),
            WatchStopReason::Interrupted | WatchStopReason::EventStreamClosed => {
                self.painter.warning(reason)
            }
            WatchStopReason::PipelineFailed => self.painter.error(reason),
        };

        let mut rows = vec![
            (
                "connection_state",
                self.painter.state(self.summary.connection_state()),
            ),
            (
                "payloads_received",
                self.summary.payloads_received().to_string(),
            ),
            (
                "latest_sample",
                self.summary.latest_sample().map_or_else(
                    || self.painter.muted("<none>"),
                    |sample| self.painter.value(sample.to_string()),
                ),
            ),
        ];
        if let Some(message) = self.summary.error_message() {
            rows.push(("error", self.painter.error(message)));
        }

        write!(f, "{} {stop_reason}", self.painter.heading("Stopped:"))?;
        write!(f, "\n{}", Table::key_value(self.painter, rows))
    }
}
