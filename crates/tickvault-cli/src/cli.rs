//! CLI argument definitions for tickvault.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `discover` | List the command surface |
//! | `version` | Service name and version |
//! | `get-bars` | Bars for a symbol and inclusive date range |
//! | `get-options` | Option chain for one expiry |
//! | `provider-status` | Provider availability, health and rate budget |
//! | `acquire` | Fetch bars from providers and import them |
//! | `acquire-options` | Fetch an option chain and import it |
//! | `verify` | Audit stored partitions |
//! | `serve` | Run the length-prefixed JSON IPC service |
//!
//! # Examples
//!
//! ```bash
//! tickvault get-bars --symbol SPY --from 2024-01-15 --to 2024-01-15 --granularity 1d
//! tickvault acquire --symbol SPY --from 2024-01-01 --to 2024-01-31 --timeout-ms 30000
//! tickvault serve --listen 127.0.0.1:7878
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

#[derive(Debug, Parser)]
#[command(
    name = "tickvault",
    author,
    version,
    about = "Partitioned market data store with multi-provider acquisition"
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Request deadline in milliseconds. Defaults per command.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Warehouse home directory. Overrides TICKVAULT_HOME.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List available commands.
    Discover,

    /// Print service name and version.
    Version,

    /// Read bars from the local warehouse.
    ///
    ///   tickvault get-bars --symbol SPY --from 2024-01-02 --to 2024-01-31 --granularity 1d
    GetBars(BarsArgs),

    /// Read an option chain from the local warehouse.
    GetOptions(OptionsArgs),

    /// Show provider availability, health and remaining rate budget.
    ProviderStatus,

    /// Fetch bars from the first provider that can serve them and import them.
    Acquire(BarsArgs),

    /// Fetch an option chain and import it.
    AcquireOptions(OptionsArgs),

    /// Verify stored partitions against their catalog entries.
    Verify(VerifyArgs),

    /// Serve requests over TCP using 4-byte length-prefixed JSON frames.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct BarsArgs {
    /// Ticker symbol (e.g. SPY, BRK.B).
    #[arg(long)]
    pub symbol: String,

    /// First date, inclusive (YYYY-MM-DD).
    #[arg(long)]
    pub from: String,

    /// Last date, inclusive (YYYY-MM-DD).
    #[arg(long)]
    pub to: String,

    /// Bar size: 1m, 5m, 1h or 1d.
    #[arg(long, default_value = "1d")]
    pub granularity: String,
}

#[derive(Debug, Args)]
pub struct OptionsArgs {
    #[arg(long)]
    pub symbol: String,

    /// Expiry date (YYYY-MM-DD).
    #[arg(long)]
    pub date: String,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Only audit this symbol's partitions.
    #[arg(long)]
    pub symbol: Option<String>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:7878")]
    pub listen: SocketAddr,
}

impl Cli {
    /// Wire name and parameters of a request command. `None` for `serve`.
    pub fn request(&self) -> Option<(&'static str, Map<String, Value>)> {
        let mut parameters = Map::new();
        let name = match &self.command {
            Command::Discover => "discover",
            Command::Version => "version",
            Command::ProviderStatus => "provider-status",
            Command::GetBars(args) => {
                bars_parameters(args, &mut parameters);
                "get-bars"
            }
            Command::Acquire(args) => {
                bars_parameters(args, &mut parameters);
                "acquire"
            }
            Command::GetOptions(args) => {
                options_parameters(args, &mut parameters);
                "get-options"
            }
            Command::AcquireOptions(args) => {
                options_parameters(args, &mut parameters);
                "acquire-options"
            }
            Command::Verify(args) => {
                if let Some(symbol) = &args.symbol {
                    parameters.insert(String::from("symbol"), Value::from(symbol.as_str()));
                }
                "verify"
            }
            Command::Serve(_) => return None,
        };
        if let Some(timeout_ms) = self.timeout_ms {
            parameters.insert(String::from("timeoutMs"), Value::from(timeout_ms));
        }
        Some((name, parameters))
    }
}

fn bars_parameters(args: &BarsArgs, parameters: &mut Map<String, Value>) {
    parameters.insert(String::from("symbol"), Value::from(args.symbol.as_str()));
    parameters.insert(String::from("from"), Value::from(args.from.as_str()));
    parameters.insert(String::from("to"), Value::from(args.to.as_str()));
    parameters.insert(String::from("granularity"), Value::from(args.granularity.as_str()));
}

fn options_parameters(args: &OptionsArgs, parameters: &mut Map<String, Value>) {
    parameters.insert(String::from("symbol"), Value::from(args.symbol.as_str()));
    parameters.insert(String::from("date"), Value::from(args.date.as_str()));
}
