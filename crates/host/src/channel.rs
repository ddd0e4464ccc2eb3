// Host side of the channel connecting this host to one guest.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use negotiator_common::commands::CommandCatalog;
use negotiator_common::config::{CommandDirs, HOST_TO_GUEST_CHANNEL_NAME};
use negotiator_common::dispatch::CommandDispatcher;
use negotiator_common::endpoint::Endpoint;
use negotiator_common::error::{CallError, ProtocolError};
use negotiator_common::transport::StreamTransport;

use crate::virsh;

/// Failure to set up the transport to a guest.
///
/// The supervisor treats this as a transient condition: the worker logs one
/// line and exits, to be respawned when the guest comes around.
#[derive(Debug, Error)]
pub enum GuestChannelInitializationError {
    #[error("no UNIX socket pathname provided and channel discovery found none for guest `{guest}`")]
    ChannelNotFound { guest: String },

    #[error("guest `{guest}` refused a connection on `{socket}`: {source}")]
    ConnectionRefused {
        guest: String,
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An open RPC endpoint to one guest.
pub struct GuestChannel {
    guest_name: String,
    endpoint: Endpoint<StreamTransport<OwnedReadHalf, OwnedWriteHalf>>,
}

impl GuestChannel {
    /// Connect to a guest.
    ///
    /// Without an explicit socket path the host-to-guest channel socket is
    /// discovered from the guest's domain XML.
    pub async fn open(guest_name: &str, unix_socket: Option<PathBuf>) -> Result<Self> {
        let socket = match unix_socket {
            Some(socket) => socket,
            None => {
                let mut channels = virsh::find_channels_of_guest(guest_name).await?;
                channels.remove(HOST_TO_GUEST_CHANNEL_NAME).ok_or_else(|| {
                    anyhow!(GuestChannelInitializationError::ChannelNotFound {
                        guest: guest_name.to_string(),
                    })
                })?
            }
        };

        debug!(guest = guest_name, socket = %socket.display(), "connecting to UNIX socket");
        let stream = UnixStream::connect(&socket).await.map_err(|source| {
            anyhow!(GuestChannelInitializationError::ConnectionRefused {
                guest: guest_name.to_string(),
                socket: socket.clone(),
                source,
            })
        })?;
        let (read_half, write_half) = stream.into_split();
        let transport = StreamTransport::new(
            read_half,
            write_half,
            format!("UNIX socket {}", socket.display()),
        );
        Ok(Self { guest_name: guest_name.to_string(), endpoint: Endpoint::new(transport) })
    }

    /// Call a method on the agent inside the guest.
    pub async fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kw: Map<String, Value>,
    ) -> Result<Value, CallError> {
        self.endpoint.call(method, args, kw).await
    }

    /// Answer guest-to-host calls until the guest disconnects.
    ///
    /// Commands invoked through this channel see `NEGOTIATOR_GUEST` in
    /// their environment so they can tell which guest is calling.
    pub async fn serve(&mut self) -> Result<(), ProtocolError> {
        let catalog = CommandCatalog::new(CommandDirs::default());
        let mut dispatcher =
            CommandDispatcher::new(catalog).with_env("NEGOTIATOR_GUEST", self.guest_name.as_str());
        self.endpoint.serve(&mut dispatcher).await
    }
}
