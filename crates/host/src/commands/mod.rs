// CLI subcommand dispatch.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

pub mod daemon;
pub mod execute;
pub mod list_commands;
pub mod list_guests;

#[derive(Subcommand)]
pub enum Command {
    /// List running guests that expose the negotiator channel
    ListGuests,
    /// List the commands a guest exposes to its host
    ListCommands(list_commands::ListCommandsArgs),
    /// Execute a command inside a guest and print its output
    Execute(execute::ExecuteArgs),
    /// Run the supervisor that answers guest-to-host calls in real time
    Daemon,
    /// Serve one guest channel (spawned by the daemon)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args)]
pub struct WorkerArgs {
    /// Name of the guest to serve
    #[arg(long)]
    pub guest: String,

    /// UNIX socket of the guest-to-host channel
    #[arg(long)]
    pub socket: PathBuf,
}

pub async fn run(command: Command, timeout_secs: u64) -> Result<()> {
    match command {
        Command::ListGuests => list_guests::run().await,
        Command::ListCommands(args) => list_commands::run(args, timeout_secs).await,
        Command::Execute(args) => execute::run(args, timeout_secs).await,
        Command::Daemon => daemon::run().await,
        Command::Worker(args) => crate::worker::run(&args.guest, args.socket).await,
    }
}

/// Bound a remote operation by the caller-supplied timeout. A timeout of
/// zero disables the limit.
pub(crate) async fn with_timeout<T>(
    timeout_secs: u64,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    if timeout_secs == 0 {
        operation.await
    } else {
        tokio::time::timeout(Duration::from_secs(timeout_secs), operation)
            .await
            .with_context(|| format!("remote call timed out after {timeout_secs} seconds"))?
    }
}
