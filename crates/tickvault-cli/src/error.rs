use std::net::SocketAddr;

use thiserror::Error;
use tickvault_core::{EnvelopeError, ErrorCode};

use crate::commands::failure;

/// Process-level failures. Request failures never surface here; they are
/// rendered as error envelopes instead.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[source] tickvault_core::CoreError),

    #[error("failed to open warehouse: {0}")]
    Startup(#[source] tickvault_core::CoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Startup(_) => 10,
            Self::Bind { .. } => 1,
            Self::Serialization(_) => 10,
            Self::Io(_) => 1,
        }
    }

    /// Error body for a one-shot request that failed before reaching its
    /// command. The code's exit status matches [`CliError::exit_code`].
    pub fn envelope_error(&self) -> EnvelopeError {
        match self {
            Self::Config(_) => failure(ErrorCode::InvalidArguments, self.to_string())
                .with_hint("check the TICKVAULT_* environment variables"),
            Self::Startup(_) => failure(ErrorCode::InternalError, self.to_string()).with_hint(
                "check TICKVAULT_HOME; while 'tickvault serve' holds the warehouse, send requests over IPC",
            ),
            _ => failure(ErrorCode::InternalError, self.to_string()),
        }
    }
}
