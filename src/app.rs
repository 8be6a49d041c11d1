use std::io;
use std::sync::Arc;

use anyhow::Result;
use bon::Builder;
use tracing::{debug, instrument};

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{BleDriver, BtleplugDriver, FakeDriver};
use crate::protocol::SensorProfile;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a driver backed by the first local Bluetooth adapter.
///
/// # Errors
///
/// Returns an error if no adapter is available.
pub async fn real_driver() -> Result<Arc<dyn BleDriver>> {
    let driver = BtleplugDriver::new().await?;
    Ok(Arc::new(driver))
}

/// Creates a driver backed by fake BLE fixtures.
#[must_use]
pub fn fake_driver(fake_args: FakeArgs) -> Arc<dyn BleDriver> {
    Arc::new(FakeDriver::new(fake_args.into_driver_config()))
}

/// Where a command gets its BLE driver from.
///
/// The driver is only built for commands that talk to the sensor.
pub enum DriverSource {
    /// The first local Bluetooth adapter.
    Real,
    /// Fake fixtures configured from CLI arguments.
    Fake(FakeArgs),
    /// A driver built by the caller.
    Custom(Arc<dyn BleDriver>),
}

impl DriverSource {
    async fn into_driver(self) -> Result<Arc<dyn BleDriver>> {
        match self {
            Self::Real => real_driver().await,
            Self::Fake(fake_args) => Ok(fake_driver(fake_args)),
            Self::Custom(driver) => Ok(driver),
        }
    }
}

impl From<Option<FakeArgs>> for DriverSource {
    fn from(fake_args: Option<FakeArgs>) -> Self {
        fake_args.map_or(Self::Real, Self::Fake)
    }
}

impl From<Arc<dyn BleDriver>> for DriverSource {
    fn from(driver: Arc<dyn BleDriver>) -> Self {
        Self::Custom(driver)
    }
}

/// Telemetry, output, and sensor settings for one command run.
#[derive(Debug, Clone, Builder)]
pub struct RunOptions {
    log_level: Option<LogLevel>,
    #[builder(default = OutputFormat::Pretty)]
    output_format: OutputFormat,
    #[builder(default)]
    profile: SensorProfile,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs the CLI command with default options.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = sensorlink::Args::try_parse_from([
///     "sensorlink",
///     "--fake",
///     "--fake-scan",
///     "ED:2A:4E:FD:81:0E|Sensor|-43",
///     "watch",
///     "--max-payloads",
///     "1",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let mut out = Vec::new();
/// sensorlink::run(command, &mut out, maybe_fake_args.into()).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the connection pipeline
/// fails, or output writing fails.
pub async fn run<W>(command: Command, out: &mut W, driver: DriverSource) -> Result<()>
where
    W: io::Write,
{
    run_with_options(command, out, driver, RunOptions::default()).await
}

/// Runs the CLI command with explicit options.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the connection pipeline
/// fails, or output writing fails.
pub async fn run_with_options<W>(
    command: Command,
    out: &mut W,
    driver: DriverSource,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, driver, options).await
}

/// Runs the CLI command with injected clients.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// struct FakeTerminal;
/// impl sensorlink::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let options = sensorlink::RunOptions::builder()
///     .output_format(sensorlink::OutputFormat::Json)
///     .build();
/// let mut out = Vec::new();
/// sensorlink::run_with_clients(
///     sensorlink::Command::Profile,
///     &mut out,
///     &FakeTerminal,
///     sensorlink::DriverSource::Real,
///     options,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the connection pipeline
/// fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, driver, options),
    level = "info",
    fields(command = %command_name(&command), log_level = ?options.log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    driver: DriverSource,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "sensorlink",
        terminal_client.stderr_is_terminal(),
        options.log_level.map(LogLevel::as_level_filter),
    )?;

    let RunOptions {
        output_format,
        profile,
        ..
    } = options;
    match command {
        Command::Profile => {
            crate::cli::profile::run(&profile, output_format, out, terminal_client)
        }
        Command::Watch(args) => {
            let driver = driver.into_driver().await?;
            debug!(address = %profile.address(), "driver ready");
            crate::cli::watch::run(driver, profile, &args, output_format, out, terminal_client)
                .await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Watch(_args) => "watch",
        Command::Profile => "profile",
    }
}
