// Execute a command on the host and copy its output to stdout.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Map, Value};

use negotiator_common::config::GUEST_TO_HOST_CHANNEL_NAME;
use negotiator_common::shutdown::Shutdown;

use crate::agent::GuestAgent;

use super::Options;

#[derive(Args)]
pub struct ExecuteArgs {
    /// Command name and arguments (resolved on the host)
    #[arg(required = true, trailing_var_arg = true)]
    pub argv: Vec<String>,
}

pub async fn run(args: ExecuteArgs, options: &Options) -> Result<()> {
    let device = super::select_device(options, GUEST_TO_HOST_CHANNEL_NAME)?;
    let argv: Vec<Value> = args.argv.iter().map(|argument| json!(argument)).collect();
    let mut kw = Map::new();
    kw.insert("capture".to_string(), json!(true));

    let result = super::with_timeout(options.timeout, async {
        let mut agent = GuestAgent::open(&device, false, Shutdown::new()).await?;
        Ok(agent.call("execute", argv, kw).await?)
    })
    .await?;

    let output = result.as_str().context("the host returned non-string command output")?;
    println!("{}", output.trim_end());
    Ok(())
}
