use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::watch::WatchArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{
    DeviceAddress, FakeDriverConfig, FakeNotifyMode, NotificationPayloads, ScanFixture,
};
use crate::protocol::SensorProfile;

/// Command-line options for the sensor link tool.
#[derive(Debug, Parser)]
#[command(
    name = "sensorlink",
    about = "Connect to a BLE accelerometer sensor and stream its payloads."
)]
pub struct Args {
    /// Log level override; defaults to `RUST_LOG`, then `warn`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Hardware address of the sensor unit.
    #[arg(long, global = true)]
    address: Option<DeviceAddress>,
    /// Uses the fake BLE driver with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `address|local_name|rssi;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Connection attempts the fake driver fails before one succeeds.
    #[arg(long, global = true, requires = "fake")]
    fake_connect_failures: Option<usize>,
    /// Change-delivery support of the fake sensor characteristic.
    #[arg(long, global = true, requires = "fake")]
    fake_notify_mode: Option<FakeNotifyMode>,
    /// Leaves the sensor characteristic out of the fake GATT table.
    #[arg(long, global = true, requires = "fake")]
    fake_missing_characteristic: bool,
    /// Fake sensor payloads as comma-separated hexadecimal values.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Artificial fake scan delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use sensorlink::{Args, Command, WatchArgs};
    ///
    /// let profile = Args::new(Command::Profile);
    /// let watch = Args::new(Command::Watch(WatchArgs::new(Some(10))));
    /// let _ = (profile, watch);
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            address: None,
            fake: false,
            fake_scan: None,
            fake_connect_failures: None,
            fake_notify_mode: None,
            fake_missing_characteristic: false,
            fake_notifications: None,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Enables fake driver mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            connect_failures,
            notify_mode,
            missing_characteristic,
            notifications,
            discovery_delay,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_connect_failures = Some(connect_failures);
        self.fake_notify_mode = Some(notify_mode);
        self.fake_missing_characteristic = missing_characteristic;
        self.fake_notifications = notifications;
        self.fake_discovery_delay = Some(discovery_delay);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// The sensor profile, with the address override applied.
    #[must_use]
    pub fn profile(&self) -> SensorProfile {
        SensorProfile::builder()
            .maybe_address(self.address.clone())
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-driver settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI driver configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_connect_failures,
            fake_notify_mode,
            fake_missing_characteristic,
            fake_notifications,
            fake_discovery_delay,
            command,
            ..
        } = self;

        if !fake {
            return Ok((command, None));
        }
        let Some(scan_fixture) = fake_scan else {
            return Err(CliConfigError::MissingFakeScanFixture.into());
        };
        let fake_args = FakeArgs {
            scan_fixture,
            connect_failures: fake_connect_failures.unwrap_or_default(),
            notify_mode: fake_notify_mode.unwrap_or_default(),
            missing_characteristic: fake_missing_characteristic,
            notifications: fake_notifications,
            discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
        };

        Ok((command, Some(fake_args)))
    }
}

/// Fake driver arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(default)]
    connect_failures: usize,
    #[builder(default)]
    notify_mode: FakeNotifyMode,
    #[builder(default)]
    missing_characteristic: bool,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_driver_config(self) -> FakeDriverConfig {
        let Self {
            scan_fixture,
            connect_failures,
            notify_mode,
            missing_characteristic,
            notifications,
            discovery_delay,
        } = self;

        FakeDriverConfig::builder()
            .scan_fixture(scan_fixture)
            .connect_failures(connect_failures)
            .notify_mode(notify_mode)
            .missing_characteristic(missing_characteristic)
            .maybe_notifications(notifications)
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for the sensor, connect, and print every status event and payload.
    Watch(WatchArgs),
    /// Print the sensor profile this tool connects with.
    Profile,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering of command output.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured, human-readable lines and tables.
    Pretty,
    /// One JSON document per line.
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
