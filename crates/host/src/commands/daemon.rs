// Run the host daemon: the supervisor that keeps one worker per guest.

use anyhow::{Context, Result};

use negotiator_common::shutdown::{trigger_on_termination, Shutdown};

use crate::supervisor::Supervisor;
use crate::virsh::Virsh;
use crate::worker::ProcessLauncher;

pub async fn run() -> Result<()> {
    let shutdown = Shutdown::new();
    trigger_on_termination(shutdown.clone()).context("failed to install signal handlers")?;

    let mut supervisor = Supervisor::new(Virsh, ProcessLauncher);
    supervisor.run(shutdown).await
}
