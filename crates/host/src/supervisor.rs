// Reconciliation loop that keeps one worker process per running guest.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use negotiator_common::config::{GUEST_TO_HOST_CHANNEL_NAME, SUPERVISOR_INTERVAL_SECS};
use negotiator_common::shutdown::Shutdown;

use crate::virsh::GuestDiscoveryError;
use crate::worker::{WorkerHandle, WorkerLauncher};

/// What the supervisor needs from the hypervisor control tool.
#[async_trait]
pub trait Hypervisor: Send {
    /// Names of the guests that are currently running.
    async fn running_guests(&self) -> Result<Vec<String>, GuestDiscoveryError>;

    /// Channel name to UNIX socket path map for one guest.
    async fn channels_of_guest(&self, guest_name: &str) -> Result<HashMap<String, PathBuf>>;
}

/// Owns the per-guest workers and reconciles them against the set of
/// running guests.
///
/// Guests that turn out not to expose the guest-to-host channel are added
/// to an ignore set so the supervisor stops shelling out for them on every
/// pass. The set only grows; restarting the daemon clears it.
pub struct Supervisor<H, L> {
    hypervisor: H,
    launcher: L,
    workers: HashMap<String, Box<dyn WorkerHandle>>,
    guests_to_ignore: HashSet<String>,
    interval: Duration,
}

impl<H: Hypervisor, L: WorkerLauncher> Supervisor<H, L> {
    pub fn new(hypervisor: H, launcher: L) -> Self {
        Self {
            hypervisor,
            launcher,
            workers: HashMap::new(),
            guests_to_ignore: HashSet::new(),
            interval: Duration::from_secs(SUPERVISOR_INTERVAL_SECS),
        }
    }

    /// Reconcile until shutdown is requested, then terminate every worker.
    pub async fn run(&mut self, shutdown: Shutdown) -> Result<()> {
        info!("host daemon started");
        loop {
            if let Err(error) = self.tick().await {
                // Libvirt being down is routine; one line, then retry on
                // the next pass.
                error!(%error, "skipping reconciliation pass");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.requested() => break,
            }
        }
        self.terminate_all().await;
        info!("host daemon stopped");
        Ok(())
    }

    /// One reconciliation pass: clean up dead workers, then spawn missing
    /// ones.
    pub async fn tick(&mut self) -> Result<(), GuestDiscoveryError> {
        debug!("synchronizing workers to running guests");
        let running: HashSet<String> =
            self.hypervisor.running_guests().await?.into_iter().collect();
        self.cleanup_workers(&running).await;
        self.spawn_workers(&running).await;
        Ok(())
    }

    /// Drop crashed workers and terminate workers whose guest stopped.
    async fn cleanup_workers(&mut self, running: &HashSet<String>) {
        let guest_names: Vec<String> = self.workers.keys().cloned().collect();
        for guest_name in guest_names {
            let Some(worker) = self.workers.get_mut(&guest_name) else {
                continue;
            };
            if !worker.is_alive() {
                warn!(guest = %guest_name, "cleaning up crashed worker");
                self.workers.remove(&guest_name);
                continue;
            }
            if !running.contains(&guest_name) {
                info!(guest = %guest_name, "terminating worker because guest is no longer running");
                if let Some(mut worker) = self.workers.remove(&guest_name) {
                    worker.terminate().await;
                }
            }
        }
    }

    /// Spawn workers for running guests that lack one, quarantining guests
    /// that do not expose the guest-to-host channel.
    async fn spawn_workers(&mut self, running: &HashSet<String>) {
        let mut candidates: Vec<String> = running
            .iter()
            .filter(|guest_name| !self.guests_to_ignore.contains(*guest_name))
            .cloned()
            .collect();
        candidates.sort();

        for guest_name in candidates {
            if self.workers.contains_key(&guest_name) {
                continue;
            }
            let channels = match self.hypervisor.channels_of_guest(&guest_name).await {
                Ok(channels) => channels,
                Err(error) => {
                    // The guest may have stopped between the listing and
                    // the XML dump; try again next pass.
                    warn!(
                        guest = %guest_name,
                        error = ?error,
                        "failed to inspect guest channels"
                    );
                    continue;
                }
            };
            match channels.get(GUEST_TO_HOST_CHANNEL_NAME) {
                Some(socket) => {
                    info!(guest = %guest_name, "initializing worker for guest");
                    match self.launcher.spawn(&guest_name, socket).await {
                        Ok(worker) => {
                            self.workers.insert(guest_name, worker);
                        }
                        Err(error) => {
                            warn!(
                                guest = %guest_name,
                                error = ?error,
                                "failed to spawn worker"
                            );
                        }
                    }
                }
                None => {
                    // Don't keep dumping XML for guests that will never
                    // participate.
                    info!(guest = %guest_name, "guest does not support negotiator, adding to ignore list");
                    self.guests_to_ignore.insert(guest_name);
                }
            }
        }
    }

    async fn terminate_all(&mut self) {
        for (guest_name, mut worker) in self.workers.drain() {
            info!(guest = %guest_name, "terminating worker");
            worker.terminate().await;
        }
    }
}
