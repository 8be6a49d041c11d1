use std::io;

use anyhow::Result;
use serde_json::json;

use crate::protocol::SensorProfile;
use crate::terminal::TerminalClient;

use super::command::OutputFormat;
use super::ui::{Painter, ProfileView};

/// Executes the `profile` command.
pub(crate) fn run<W>(
    profile: &SensorProfile,
    output: OutputFormat,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
) -> Result<()>
where
    W: io::Write,
{
    match output {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", ProfileView::new(profile, &painter))?;
        }
        OutputFormat::Json => {
            let document = json!({
                "address": profile.address().as_str(),
                "service_uuid": profile.service_uuid().to_string(),
                "characteristic_uuid": profile.characteristic_uuid().to_string(),
                "descriptor_uuid": profile.descriptor_uuid().to_string(),
                "mtu": profile.mtu(),
                "max_attempts": profile.max_attempts(),
            });
            writeln!(out, "{document}")?;
        }
    }
    Ok(())
}
