// Execute a command inside a guest and copy its output to stdout.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Map, Value};

use crate::channel::GuestChannel;

#[derive(Args)]
pub struct ExecuteArgs {
    /// Name of the guest to run the command in
    pub guest: String,

    /// Command name and arguments (resolved inside the guest)
    #[arg(required = true, trailing_var_arg = true)]
    pub argv: Vec<String>,
}

pub async fn run(args: ExecuteArgs, timeout_secs: u64) -> Result<()> {
    let argv: Vec<Value> = args.argv.iter().map(|argument| json!(argument)).collect();
    let mut kw = Map::new();
    kw.insert("capture".to_string(), json!(true));

    let result = super::with_timeout(timeout_secs, async {
        let mut channel = GuestChannel::open(&args.guest, None).await?;
        Ok(channel.call("execute", argv, kw).await?)
    })
    .await?;

    let output = result.as_str().context("the guest returned non-string command output")?;
    println!("{}", output.trim_end());
    Ok(())
}
