// Run the guest daemon: serve host-to-guest calls on the virtio channel.

use anyhow::{Context, Result};
use tracing::info;

use negotiator_common::config::HOST_TO_GUEST_CHANNEL_NAME;
use negotiator_common::shutdown::{trigger_on_termination, Shutdown};

use crate::agent::GuestAgent;

use super::Options;

pub async fn run(options: &Options) -> Result<()> {
    let shutdown = Shutdown::new();
    trigger_on_termination(shutdown.clone()).context("failed to install signal handlers")?;

    let device = super::select_device(options, HOST_TO_GUEST_CHANNEL_NAME)?;
    info!(device = %device.display(), "guest daemon started");

    // Retrying EBUSY covers the previous daemon (or its read waiter) still
    // winding down when this one starts.
    let mut agent = GuestAgent::open(&device, true, shutdown.clone()).await?;
    let result = tokio::select! {
        result = agent.serve() => result,
        _ = shutdown.requested() => {
            info!("guest daemon stopped");
            return Ok(());
        }
    };
    match result {
        Ok(()) => Ok(()),
        Err(_) if shutdown.is_requested() => {
            info!("guest daemon stopped");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}
