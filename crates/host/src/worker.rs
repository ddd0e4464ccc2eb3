// Worker processes: one per guest, each serving that guest's
// guest-to-host channel in isolation from its peers and the supervisor.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::channel::{GuestChannel, GuestChannelInitializationError};

/// Entry point of a worker process: serve one guest until its channel
/// closes.
///
/// Always returns `Ok`; failures are logged and lead to a respawn by the
/// supervisor on a later reconciliation pass.
pub async fn run(guest_name: &str, socket: PathBuf) -> Result<()> {
    match GuestChannel::open(guest_name, Some(socket)).await {
        Ok(mut channel) => match channel.serve().await {
            Ok(()) => info!(guest = guest_name, "guest disconnected, worker exiting"),
            Err(error) => {
                error!(guest = guest_name, %error, "protocol error, worker exiting");
            }
        },
        Err(error) if error.downcast_ref::<GuestChannelInitializationError>().is_some() => {
            // A known transient, no need for a backtrace.
            error!(
                guest = guest_name,
                %error,
                "failed to initialize channel to guest (worker will respawn in a bit)"
            );
        }
        Err(error) => {
            error!(
                guest = guest_name,
                error = ?error,
                "caught unexpected error while connecting to guest (worker will respawn in a bit)"
            );
        }
    }
    Ok(())
}

/// A running worker owned by the supervisor.
#[async_trait]
pub trait WorkerHandle: Send {
    /// Whether the worker is still running.
    fn is_alive(&mut self) -> bool;

    /// Kill the worker and reap it.
    async fn terminate(&mut self);
}

/// Spawns workers. The supervisor is generic over this so reconciliation
/// can be exercised without forking processes.
#[async_trait]
pub trait WorkerLauncher: Send {
    async fn spawn(&mut self, guest_name: &str, socket: &Path) -> Result<Box<dyn WorkerHandle>>;
}

/// Launches each worker as a subprocess of the current binary running the
/// hidden `worker` subcommand. A wedged script or hung read inside one
/// guest's worker cannot stall the supervisor or the other guests.
pub struct ProcessLauncher;

struct WorkerProcess {
    child: Child,
}

#[async_trait]
impl WorkerHandle for WorkerProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) {
        if let Err(error) = self.child.kill().await {
            warn!(%error, "failed to kill worker process");
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn spawn(&mut self, guest_name: &str, socket: &Path) -> Result<Box<dyn WorkerHandle>> {
        let binary =
            std::env::current_exe().context("failed to locate the negotiator-host binary")?;
        let mut command = Command::new(binary);
        command
            .arg("worker")
            .arg("--guest")
            .arg(guest_name)
            .arg("--socket")
            .arg(socket)
            .stdin(Stdio::null())
            // If the supervisor dies unexpectedly the workers go with it.
            .kill_on_drop(true);
        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn worker for guest `{guest_name}`"))?;
        info!(guest = guest_name, pid = child.id().unwrap_or_default(), "spawned worker process");
        Ok(Box::new(WorkerProcess { child }))
    }
}
