use serde::Serialize;
use tickvault_core::EnvelopeError;

use super::{CommandResult, COMMANDS, EXTENSIONS};

pub const SERVICE_NAME: &str = "tickvault";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
struct Discovery {
    service: &'static str,
    version: &'static str,
    commands: &'static [&'static str],
    extensions: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct Version {
    service: &'static str,
    version: &'static str,
}

pub fn discover() -> Result<CommandResult, EnvelopeError> {
    let data = Discovery {
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        commands: COMMANDS,
        extensions: EXTENSIONS,
    };
    CommandResult::new(&data, COMMANDS.len())
}

pub fn version() -> Result<CommandResult, EnvelopeError> {
    let data = Version {
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
    };
    CommandResult::new(&data, 1)
}
