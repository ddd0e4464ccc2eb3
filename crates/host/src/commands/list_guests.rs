// List the running guests the host can talk to.

use anyhow::Result;
use tracing::warn;

use negotiator_common::config::HOST_TO_GUEST_CHANNEL_NAME;

use crate::virsh;

pub async fn run() -> Result<()> {
    for guest_name in find_supported_guests().await? {
        println!("{guest_name}");
    }
    Ok(())
}

/// Names of the running guests whose domain XML carries the host-to-guest
/// channel, sorted.
async fn find_supported_guests() -> Result<Vec<String>> {
    let mut running = virsh::find_running_guests().await?;
    running.sort();

    let mut supported = Vec::new();
    for guest_name in running {
        let channels = match virsh::find_channels_of_guest(&guest_name).await {
            Ok(channels) => channels,
            Err(error) => {
                warn!(
                    guest = %guest_name,
                    error = ?error,
                    "failed to inspect guest channels"
                );
                continue;
            }
        };
        if channels.contains_key(HOST_TO_GUEST_CHANNEL_NAME) {
            supported.push(guest_name);
        }
    }
    Ok(supported)
}
