// negotiator-guest: communicate with the KVM/QEMU host from inside a
// guest, or run the daemon that lets the host call into this guest.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::error;

mod agent;
mod commands;
mod device;

#[derive(Parser)]
#[command(
    name = "negotiator-guest",
    about = "Communicate with the KVM/QEMU host from inside a guest system"
)]
struct Cli {
    /// Seconds before a remote call without a response times out (0 disables the limit)
    #[arg(
        short,
        long,
        global = true,
        default_value_t = negotiator_common::config::DEFAULT_TIMEOUT_SECS
    )]
    timeout: u64,

    /// Character device to use instead of automatic virtio port discovery
    #[arg(short, long, global = true)]
    character_device: Option<PathBuf>,

    /// Increase logging verbosity (can be repeated)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (can be repeated)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let options =
        commands::Options { timeout: cli.timeout, character_device: cli.character_device };
    match commands::run(cli.command, options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(?error, "caught a fatal error, terminating");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match 1 + i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
