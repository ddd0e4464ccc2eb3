// negotiator-host: communicate with KVM/QEMU guests through the agent
// running inside them.

use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::error;

mod channel;
mod commands;
mod supervisor;
mod virsh;
mod worker;

#[derive(Parser)]
#[command(
    name = "negotiator-host",
    about = "Communicate with KVM/QEMU guests through the negotiator agent running inside them"
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

    match commands::run(cli.command, cli.timeout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if let Some(discovery) = error.downcast_ref::<virsh::GuestDiscoveryError>() {
                // Libvirt being down is routine, keep the log readable.
                error!("{discovery}");
            } else {
                error!(?error, "caught a fatal error, terminating");
            }
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
