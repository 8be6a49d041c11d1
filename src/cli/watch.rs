use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument};

use crate::error::WatchError;
use crate::event::ConnectionState;
use crate::hw::BleDriver;
use crate::manager::ConnectionManager;
use crate::protocol::SensorProfile;
use crate::sample::AccelerationSample;
use crate::snapshot::SensorSnapshot;
use crate::terminal::TerminalClient;

use super::command::OutputFormat;
use super::ui::{EventView, Painter, SummaryView};

/// Arguments for the `watch` command.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many sensor payloads. If omitted, watch until Ctrl+C.
    #[arg(long)]
    max_payloads: Option<usize>,
}

impl WatchArgs {
    /// Creates watch arguments with an optional payload limit.
    #[must_use]
    pub fn new(max_payloads: Option<usize>) -> Self {
        Self { max_payloads }
    }

    #[must_use]
    pub(crate) fn max_payloads(&self) -> Option<usize> {
        self.max_payloads
    }
}

/// Why a watch session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub(crate) enum WatchStopReason {
    #[display("reached limit of {_0} payload(s)")]
    ReachedLimit(usize),
    #[display("interrupted")]
    Interrupted,
    #[display("event stream closed")]
    EventStreamClosed,
    #[display("connection pipeline failed")]
    PipelineFailed,
}

/// Final state of a watch session.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub(crate) struct WatchSummary {
    #[serde_as(as = "DisplayFromStr")]
    stop_reason: WatchStopReason,
    connection_state: ConnectionState,
    payloads_received: usize,
    latest_sample: Option<AccelerationSample>,
    error_message: Option<String>,
}

impl WatchSummary {
    pub(crate) fn new(stop_reason: WatchStopReason, snapshot: &SensorSnapshot) -> Self {
        Self {
            stop_reason,
            connection_state: snapshot.connection_state(),
            payloads_received: snapshot.payloads_received(),
            latest_sample: snapshot.latest_sample(),
            error_message: snapshot.error_message().map(str::to_owned),
        }
    }

    pub(crate) fn stop_reason(&self) -> WatchStopReason {
        self.stop_reason
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub(crate) fn payloads_received(&self) -> usize {
        self.payloads_received
    }

    pub(crate) fn latest_sample(&self) -> Option<AccelerationSample> {
        self.latest_sample
    }

    pub(crate) fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// Executes the `watch` command.
#[instrument(skip_all, level = "info", fields(address = %profile.address()))]
pub(crate) async fn run<W>(
    driver: Arc<dyn BleDriver>,
    profile: SensorProfile,
    args: &WatchArgs,
    output: OutputFormat,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let mut snapshot = SensorSnapshot::default();

    let stop_reason = if args.max_payloads() == Some(0) {
        WatchStopReason::ReachedLimit(0)
    } else {
        let manager = ConnectionManager::with_profile(driver, profile);
        let outcome = watch_events(
            &manager,
            args.max_payloads(),
            output,
            &painter,
            &mut snapshot,
            out,
        )
        .await;
        manager.close().await;
        outcome?
    };

    info!(%stop_reason, payloads = snapshot.payloads_received(), "watch stopped");
    let summary = WatchSummary::new(stop_reason, &snapshot);
    match output {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(out, "{}", SummaryView::new(&summary, &painter))?;
        }
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&summary)?)?,
    }

    if stop_reason == WatchStopReason::PipelineFailed {
        let message = snapshot.error_message().unwrap_or_default().to_owned();
        return Err(WatchError::PipelineFailed { message }.into());
    }
    Ok(())
}

async fn watch_events<W>(
    manager: &ConnectionManager,
    max_payloads: Option<usize>,
    output: OutputFormat,
    painter: &Painter,
    snapshot: &mut SensorSnapshot,
    out: &mut W,
) -> Result<WatchStopReason>
where
    W: io::Write,
{
    let mut events = manager.subscribe();
    manager.start().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut index = 0_usize;

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.map_err(|source| WatchError::CtrlC { source })?;
                return Ok(WatchStopReason::Interrupted);
            }
            event = events.next() => {
                let Some(event) = event else {
                    debug!("event stream ended");
                    return Ok(WatchStopReason::EventStreamClosed);
                };
                index += 1;
                snapshot.apply(&event);
                match output {
                    OutputFormat::Pretty => {
                        writeln!(out, "{}", EventView::new(index, &event, painter))?;
                    }
                    OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&event)?)?,
                }

                if event.is_error() {
                    return Ok(WatchStopReason::PipelineFailed);
                }
                if let Some(limit) =
                    max_payloads.filter(|limit| snapshot.payloads_received() >= *limit)
                {
                    return Ok(WatchStopReason::ReachedLimit(limit));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn summary_serializes_stop_reason_as_text() {
        let summary = WatchSummary::new(
            WatchStopReason::ReachedLimit(2),
            &SensorSnapshot::default(),
        );

        assert_eq!(
            json!({
                "stop_reason": "reached limit of 2 payload(s)",
                "connection_state": "uninitialized",
                "payloads_received": 0,
                "latest_sample": null,
                "error_message": null,
            }),
            serde_json::to_value(&summary).expect("summary serializes")
        );
    }
}
