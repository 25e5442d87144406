//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use nscabuf_core::ServiceState;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5667";

#[derive(Parser, Debug)]
#[command(
    name = "nscabuf",
    version,
    about = "Buffering NSCA proxy: debounces and de-flaps passive check results"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the proxy (listener + decision loop + publisher)
    Daemon(DaemonOpts),
    /// Validate a config file and print the effective settings
    CheckConfig(CheckConfigOpts),
    /// Submit one check result to a running proxy
    Send(SendOpts),
}

#[derive(clap::Args, Debug)]
pub struct DaemonOpts {
    /// JSON config file
    #[arg(long, short = 'c', env = "NSCABUF_CONFIG")]
    pub config: PathBuf,

    /// Address to accept check results on
    #[arg(long, short = 'l', env = "NSCABUF_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Also answer HTTP health checks on this address
    #[arg(long, env = "NSCABUF_HEALTH_LISTEN")]
    pub health_listen: Option<String>,

    /// Log every decision, including held ones (overrides NSCABUF_LOG)
    #[arg(long, env = "NSCABUF_TRACE")]
    pub trace: bool,
}

#[derive(clap::Args, Debug)]
pub struct CheckConfigOpts {
    #[arg(long, short = 'c', env = "NSCABUF_CONFIG")]
    pub config: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct SendOpts {
    /// Proxy address
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub addr: String,

    #[arg(long)]
    pub host: String,

    #[arg(long)]
    pub service: String,

    /// OK, WARNING, CRITICAL, UNKNOWN or the numeric code
    #[arg(long)]
    pub state: ServiceState,

    /// Plugin output
    #[arg(long, short = 'm', default_value = "")]
    pub message: String,
}
