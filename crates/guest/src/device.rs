// The virtio character device transport and its blocking-read emulation.

use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::debug;

use negotiator_common::shutdown::Shutdown;
use negotiator_common::transport::ChannelTransport;

const BUSY_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const POLL_FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(
        "failed to find a character device for port `{port}` under `{root}`; \
         check the virtio channel configuration of this guest"
    )]
    PortNotFound { port: String, root: PathBuf },

    #[error("failed to scan `{root}` for virtio ports: {source}")]
    PortScan {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open character device `{device}`: {source}")]
    Open {
        device: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Find the character device for the given virtio port name.
///
/// Scans `root` (`/sys/class/virtio-ports` in production) for an entry
/// whose `name` file matches; the device then lives at `/dev/<entry>`.
pub fn find_character_device(root: &Path, port_name: &str) -> Result<PathBuf, DeviceError> {
    debug!(root = %root.display(), port = port_name, "selecting character device by port name");
    let entries = std::fs::read_dir(root)
        .map_err(|source| DeviceError::PortScan { root: root.to_path_buf(), source })?;
    for entry in entries.flatten() {
        let name_file = entry.path().join("name");
        let Ok(contents) = std::fs::read_to_string(&name_file) else {
            continue;
        };
        if contents.trim() == port_name {
            let device = Path::new("/dev").join(entry.file_name());
            debug!(device = %device.display(), "selected character device");
            return Ok(device);
        }
    }
    Err(DeviceError::PortNotFound { port: port_name.to_string(), root: root.to_path_buf() })
}

/// Transport over the guest side of a virtio channel.
///
/// The device has two quirks. Opening it can transiently fail with EBUSY
/// while a previous reader winds down, and reads return no data instead of
/// blocking while the host side is not connected. `read_line` hides the
/// second quirk behind a signal-assisted wait; see
/// [`CharDeviceTransport::blocking_read_line`].
pub struct CharDeviceTransport {
    file: File,
    buffer: Vec<u8>,
    label: String,
    shutdown: Shutdown,
}

impl CharDeviceTransport {
    /// Open the device in read+write mode.
    ///
    /// With `retry_busy` an EBUSY error is retried indefinitely at a one
    /// second cadence; callers that need bounded time must wrap the open
    /// in a timeout.
    pub async fn open(
        device: &Path,
        retry_busy: bool,
        shutdown: Shutdown,
    ) -> Result<Self, DeviceError> {
        let file = loop {
            match OpenOptions::new().read(true).write(true).open(device).await {
                Ok(file) => break file,
                Err(error) if retry_busy && error.raw_os_error() == Some(libc::EBUSY) => {
                    debug!(device = %device.display(), "device is busy, retrying");
                    tokio::time::sleep(BUSY_RETRY_INTERVAL).await;
                }
                Err(source) => {
                    return Err(DeviceError::Open { device: device.to_path_buf(), source })
                }
            }
        };
        Ok(Self {
            file,
            buffer: Vec::new(),
            label: format!("character device {}", device.display()),
            shutdown,
        })
    }

    /// Emulate a blocking read on a channel that may not be connected.
    ///
    /// A disconnected virtio port reads as empty instead of blocking, and
    /// polling it would pin a CPU. Instead the descriptor is switched to
    /// O_ASYNC, its file owner is pointed at a helper subprocess that exits
    /// on SIGIO, and this process waits for the helper to exit. The helper
    /// must never outlive the wait: the device supports a single reader,
    /// so a leaked helper keeps it busy for the next open.
    async fn blocking_read_line(&mut self) -> io::Result<String> {
        loop {
            let line = self.try_read_line().await?;
            if !line.is_empty() {
                return Ok(line);
            }

            debug!(device = %self.label, "empty read, waiting for the channel to connect");
            self.enable_async_io()?;
            let mut helper = self.spawn_read_waiter()?;
            let outcome = self.wait_for_data(&mut helper).await;
            // Guaranteed cleanup on every path out of the wait.
            let _ = helper.start_kill();
            let _ = helper.wait().await;

            match outcome? {
                Some(line) => return Ok(line),
                None => {
                    // The emulation failed somehow; don't turn into a busy
                    // loop.
                    debug!(device = %self.label, "falling back to a one second polling interval");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_FALLBACK_INTERVAL) => {}
                        _ = self.shutdown.requested() => return Err(shutdown_interrupt()),
                    }
                }
            }
        }
    }

    async fn wait_for_data(&mut self, helper: &mut Child) -> io::Result<Option<String>> {
        self.set_file_owner(helper.id())?;
        // The channel may have connected after the empty read but before
        // the helper existed; check once more before sleeping.
        let line = self.try_read_line().await?;
        if !line.is_empty() {
            return Ok(Some(line));
        }
        tokio::select! {
            _ = helper.wait() => {}
            _ = self.shutdown.requested() => return Err(shutdown_interrupt()),
        }
        let line = self.try_read_line().await?;
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// Take one newline-terminated line out of the buffer, reading more
    /// as long as the device delivers any. An empty string means the
    /// channel is not connected; a connected channel blocks in the read
    /// until data arrives.
    async fn try_read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=position).collect();
                return decode_line(line);
            }
            let mut chunk = [0u8; 4096];
            let count = self.file.read(&mut chunk).await?;
            if count == 0 {
                return Ok(String::new());
            }
            self.buffer.extend_from_slice(&chunk[..count]);
        }
    }

    /// Allow SIGIO delivery for this descriptor.
    fn enable_async_io(&self) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_ASYNC) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Deliver SIGIO for this descriptor to the helper instead of us.
    fn set_file_owner(&self, helper_pid: Option<u32>) -> io::Result<()> {
        let pid = helper_pid.ok_or_else(|| {
            io::Error::other("the read waiter exited before it could own the device")
        })?;
        let fd = self.file.as_raw_fd();
        if unsafe { libc::fcntl(fd, libc::F_SETOWN, pid as libc::c_int) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn spawn_read_waiter(&self) -> io::Result<Child> {
        let binary = std::env::current_exe()?;
        let mut command = Command::new(binary);
        command
            .arg("wait-for-read")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // If this process dies the helper must not survive it.
            .kill_on_drop(true);
        command.spawn()
    }
}

#[async_trait]
impl ChannelTransport for CharDeviceTransport {
    async fn read_line(&mut self) -> io::Result<String> {
        self.blocking_read_line().await
    }

    async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let buffered = len.min(self.buffer.len());
        let mut data: Vec<u8> = self.buffer.drain(..buffered).collect();
        while data.len() < len {
            let mut chunk = vec![0u8; len - data.len()];
            let count = self.file.read(&mut chunk).await?;
            if count == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel disconnected in the middle of a message",
                ));
            }
            data.extend_from_slice(&chunk[..count]);
        }
        Ok(data)
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await
    }

    fn label(&self) -> &str {
        &self.label
    }
}

fn decode_line(line: Vec<u8>) -> io::Result<String> {
    String::from_utf8(line)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame header is not valid UTF-8"))
}

fn shutdown_interrupt() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "shutdown requested")
}

/// Entry point of the hidden `wait-for-read` subcommand.
///
/// Installs a SIGIO handler that exits the process, then sleeps until a
/// signal arrives. The parent points the device's file owner at this
/// process, so the first byte arriving on a freshly connected channel
/// terminates it and wakes the parent.
pub fn wait_for_read() -> ! {
    extern "C" fn exit_on_sigio(_signal: libc::c_int) {
        // Only async-signal-safe calls are allowed in here.
        unsafe { libc::_exit(0) }
    }

    unsafe {
        let handler: extern "C" fn(libc::c_int) = exit_on_sigio;
        libc::signal(libc::SIGIO, handler as libc::sighandler_t);
        loop {
            libc::pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::{find_character_device, CharDeviceTransport, DeviceError};
    use negotiator_common::shutdown::Shutdown;
    use negotiator_common::transport::ChannelTransport;

    fn add_port(root: &Path, entry: &str, port_name: &str) {
        let port_dir = root.join(entry);
        fs::create_dir(&port_dir).expect("port directory should be created");
        fs::write(port_dir.join("name"), format!("{port_name}\n"))
            .expect("name file should be written");
    }

    #[test]
    fn finds_the_device_matching_the_port_name() {
        let root = TempDir::new().expect("temp dir should be created");
        add_port(root.path(), "vport1p1", "org.qemu.guest_agent.0");
        add_port(root.path(), "vport1p2", "negotiator-host-to-guest.0");

        let device = find_character_device(root.path(), "negotiator-host-to-guest.0")
            .expect("device should be found");
        assert_eq!(device, Path::new("/dev/vport1p2"));
    }

    #[test]
    fn missing_ports_are_a_descriptive_error() {
        let root = TempDir::new().expect("temp dir should be created");
        add_port(root.path(), "vport1p1", "org.qemu.guest_agent.0");

        let error = find_character_device(root.path(), "negotiator-guest-to-host.0")
            .expect_err("port should not be found");
        assert!(matches!(error, DeviceError::PortNotFound { .. }));
        assert!(error.to_string().contains("negotiator-guest-to-host.0"));
    }

    #[test]
    fn entries_without_a_name_file_are_skipped() {
        let root = TempDir::new().expect("temp dir should be created");
        fs::create_dir(root.path().join("vport1p1")).expect("port directory should be created");
        add_port(root.path(), "vport1p2", "negotiator-guest-to-host.0");

        let device = find_character_device(root.path(), "negotiator-guest-to-host.0")
            .expect("device should be found");
        assert_eq!(device, Path::new("/dev/vport1p2"));
    }

    // A regular file stands in for the device: reads return its content
    // and then empty, the same shape a disconnected channel produces.
    #[tokio::test]
    async fn buffers_lines_and_exact_reads() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("fake-device");
        fs::write(&path, b"12\nhello world!rest").expect("fake device should be written");

        let mut transport = CharDeviceTransport::open(&path, false, Shutdown::new())
            .await
            .expect("fake device should open");
        assert_eq!(
            transport.try_read_line().await.expect("line should be readable"),
            "12\n"
        );
        assert_eq!(
            transport.read_exact(12).await.expect("payload should be readable"),
            b"hello world!".to_vec()
        );
        assert_eq!(
            transport.read_exact(4).await.expect("remainder should be readable"),
            b"rest".to_vec()
        );
    }

    #[tokio::test]
    async fn an_exhausted_device_reads_as_empty() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("fake-device");
        fs::write(&path, b"").expect("fake device should be written");

        let mut transport = CharDeviceTransport::open(&path, false, Shutdown::new())
            .await
            .expect("fake device should open");
        assert_eq!(transport.try_read_line().await.expect("read should succeed"), "");
    }

    #[tokio::test]
    async fn a_partial_line_is_kept_in_the_buffer() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("fake-device");
        fs::write(&path, b"123").expect("fake device should be written");

        let mut transport = CharDeviceTransport::open(&path, false, Shutdown::new())
            .await
            .expect("fake device should open");
        // No newline yet: reads as "not connected" but the bytes stay put.
        assert_eq!(transport.try_read_line().await.expect("read should succeed"), "");
        assert_eq!(transport.buffer, b"123");
    }
}
