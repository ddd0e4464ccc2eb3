// List the commands the host exposes to this guest.

use anyhow::{Context, Result};
use serde_json::Map;

use negotiator_common::config::GUEST_TO_HOST_CHANNEL_NAME;
use negotiator_common::shutdown::Shutdown;

use crate::agent::GuestAgent;

use super::Options;

pub async fn run(options: &Options) -> Result<()> {
    let device = super::select_device(options, GUEST_TO_HOST_CHANNEL_NAME)?;
    let result = super::with_timeout(options.timeout, async {
        let mut agent = GuestAgent::open(&device, false, Shutdown::new()).await?;
        Ok(agent.call("list_commands", Vec::new(), Map::new()).await?)
    })
    .await?;

    let mut names = result
        .as_array()
        .context("the host returned something other than a list of command names")?
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .context("the host returned a non-string command name")
        })
        .collect::<Result<Vec<String>>>()?;
    // Wire order is unspecified; sort for the terminal.
    names.sort();
    for name in names {
        println!("{name}");
    }
    Ok(())
}
