// Configuration defaults shared between the host and guest components.

use std::path::PathBuf;

/// Name of the virtio channel used for communication initiated by the guest.
/// The host serves on this channel, the guest calls into it.
pub const GUEST_TO_HOST_CHANNEL_NAME: &str = "negotiator-guest-to-host.0";

/// Name of the virtio channel used for communication initiated by the host.
/// The guest serves on this channel, the host calls into it.
pub const HOST_TO_GUEST_CHANNEL_NAME: &str = "negotiator-host-to-guest.0";

/// Channel names recognized during channel discovery.
pub const SUPPORTED_CHANNEL_NAMES: &[&str] =
    &[GUEST_TO_HOST_CHANNEL_NAME, HOST_TO_GUEST_CHANNEL_NAME];

/// Directory with operator provided command scripts. Entries shadow builtin
/// commands with the same filename.
pub const USER_COMMANDS_DIRECTORY: &str = "/usr/lib/negotiator/commands";

/// Directory with the command scripts shipped alongside the agents.
pub const BUILTIN_COMMANDS_DIRECTORY: &str = "/usr/share/negotiator/commands";

/// Sysfs directory used to resolve virtio port names to character devices
/// inside guests.
pub const VIRTIO_PORTS_DIRECTORY: &str = "/sys/class/virtio-ports";

/// Default number of seconds before a remote call without a response times
/// out. A value of zero disables the limit.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Seconds between two reconciliation passes of the host supervisor.
pub const SUPERVISOR_INTERVAL_SECS: u64 = 10;

/// The pair of directories the command catalog is built from.
#[derive(Debug, Clone)]
pub struct CommandDirs {
    pub builtin: PathBuf,
    pub user: PathBuf,
}

impl Default for CommandDirs {
    fn default() -> Self {
        Self {
            builtin: PathBuf::from(BUILTIN_COMMANDS_DIRECTORY),
            user: PathBuf::from(USER_COMMANDS_DIRECTORY),
        }
    }
}
