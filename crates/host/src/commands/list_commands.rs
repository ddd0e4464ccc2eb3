// List the commands a guest exposes to its host.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Map;

use crate::channel::GuestChannel;

#[derive(Args)]
pub struct ListCommandsArgs {
    /// Name of the guest to query
    pub guest: String,
}

pub async fn run(args: ListCommandsArgs, timeout_secs: u64) -> Result<()> {
    let result = super::with_timeout(timeout_secs, async {
        let mut channel = GuestChannel::open(&args.guest, None).await?;
        Ok(channel.call("list_commands", Vec::new(), Map::new()).await?)
    })
    .await?;

    let mut names = result
        .as_array()
        .context("the guest returned something other than a list of command names")?
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .context("the guest returned a non-string command name")
        })
        .collect::<Result<Vec<String>>>()?;
    // Wire order is unspecified; sort for the terminal.
    names.sort();
    for name in names {
        println!("{name}");
    }
    Ok(())
}
