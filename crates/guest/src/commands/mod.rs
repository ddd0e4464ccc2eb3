// CLI subcommand dispatch.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;

use negotiator_common::config::VIRTIO_PORTS_DIRECTORY;

use crate::device;

pub mod daemon;
pub mod execute;
pub mod list_commands;

#[derive(Subcommand)]
pub enum Command {
    /// List the commands the host exposes to this guest
    ListCommands,
    /// Execute a command on the host and print its output
    Execute(execute::ExecuteArgs),
    /// Run the guest daemon that answers host-to-guest calls
    Daemon,
    /// Wait for SIGIO and exit (spawned during blocking reads)
    #[command(hide = true)]
    WaitForRead,
}

/// Global options shared by the subcommands.
pub struct Options {
    pub timeout: u64,
    pub character_device: Option<PathBuf>,
}

pub async fn run(command: Command, options: Options) -> Result<()> {
    match command {
        Command::ListCommands => list_commands::run(&options).await,
        Command::Execute(args) => execute::run(args, &options).await,
        Command::Daemon => daemon::run(&options).await,
        Command::WaitForRead => device::wait_for_read(),
    }
}

/// The character device for `channel_name`, honoring the CLI override.
pub(crate) fn select_device(options: &Options, channel_name: &str) -> Result<PathBuf> {
    match &options.character_device {
        Some(device) => Ok(device.clone()),
        None => Ok(device::find_character_device(
            Path::new(VIRTIO_PORTS_DIRECTORY),
            channel_name,
        )?),
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
