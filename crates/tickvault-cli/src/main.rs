mod cli;
mod commands;
mod error;
mod ipc;
mod metadata;
mod output;
mod service;

use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use serde_json::Value;
use tickvault_core::{Envelope, ErrorCode, TickvaultConfig};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::commands::failure;
use crate::error::CliError;
use crate::service::{rejection, Request, Service};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(%error, "tickvault failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TICKVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return reject_arguments(&error),
    };
    let request = cli
        .request()
        .map(|(command, parameters)| Request::new(command, parameters));

    if let Some(envelope) = request.as_ref().and_then(Service::answer_without_storage) {
        return emit(&envelope, cli.pretty);
    }

    let service = match open_service(&cli) {
        Ok(service) => Arc::new(service),
        Err(error) if request.is_some() => {
            tracing::error!(%error, "startup failed");
            return emit(&rejection(error.envelope_error()), cli.pretty);
        }
        Err(error) => return Err(error),
    };

    let Some(request) = request else {
        let Command::Serve(args) = &cli.command else {
            return Ok(ExitCode::SUCCESS);
        };
        let listener = tokio::net::TcpListener::bind(args.listen)
            .await
            .map_err(|source| CliError::Bind {
                addr: args.listen,
                source,
            })?;
        tracing::info!(addr = %args.listen, "ipc service listening");
        ipc::serve(service, listener, async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!(%error, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
        return Ok(ExitCode::SUCCESS);
    };

    let envelope = service.handle_isolated(request).await;
    emit(&envelope, cli.pretty)
}

fn open_service(cli: &Cli) -> Result<Service, CliError> {
    let mut config = TickvaultConfig::from_env().map_err(CliError::Config)?;
    if let Some(home) = &cli.home {
        config.home = Some(home.clone());
    }
    Service::open(config).map_err(CliError::Startup)
}

fn emit(envelope: &Envelope<Value>, pretty: bool) -> Result<ExitCode, CliError> {
    output::render(envelope, pretty)?;
    Ok(match &envelope.error {
        Some(error) => ExitCode::from(error.code.exit_code()),
        None => ExitCode::SUCCESS,
    })
}

/// Help and version requests print as clap renders them; anything else is
/// an `INVALID_ARGUMENTS` envelope.
fn reject_arguments(error: &clap::Error) -> Result<ExitCode, CliError> {
    if matches!(
        error.kind(),
        ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
    ) {
        error.print()?;
        return Ok(ExitCode::SUCCESS);
    }

    let rendered = error.to_string();
    let message = rendered
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string();
    let envelope = rejection(
        failure(ErrorCode::InvalidArguments, message).with_hint("run 'tickvault --help' for usage"),
    );
    emit(&envelope, false)
}
