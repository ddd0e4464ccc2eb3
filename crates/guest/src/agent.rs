// The guest agent: an RPC endpoint over the virtio character device.

use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value};

use negotiator_common::commands::CommandCatalog;
use negotiator_common::config::CommandDirs;
use negotiator_common::dispatch::CommandDispatcher;
use negotiator_common::endpoint::Endpoint;
use negotiator_common::error::{CallError, ProtocolError};
use negotiator_common::shutdown::Shutdown;

use crate::device::CharDeviceTransport;

/// The guest half of a negotiator channel.
pub struct GuestAgent {
    endpoint: Endpoint<CharDeviceTransport>,
}

impl GuestAgent {
    /// Open the given character device and speak the protocol over it.
    pub async fn open(device: &Path, retry_busy: bool, shutdown: Shutdown) -> Result<Self> {
        let transport = CharDeviceTransport::open(device, retry_busy, shutdown).await?;
        Ok(Self { endpoint: Endpoint::new(transport) })
    }

    /// Call a method on the agent running on the host.
    pub async fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kw: Map<String, Value>,
    ) -> Result<Value, CallError> {
        self.endpoint.call(method, args, kw).await
    }

    /// Answer host-to-guest calls until a protocol error or shutdown.
    pub async fn serve(&mut self) -> Result<(), ProtocolError> {
        let catalog = CommandCatalog::new(CommandDirs::default());
        let mut dispatcher = CommandDispatcher::new(catalog);
        self.endpoint.serve(&mut dispatcher).await
    }
}
