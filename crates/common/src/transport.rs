// Byte stream abstraction the frame codec runs on.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// One byte stream connecting the two endpoints of a channel.
///
/// `read_line` returning an empty string means no data was available at all:
/// for a socket the peer is gone, for a virtio character device the channel
/// is not connected yet. The caller decides which of the two it is dealing
/// with; the codec itself treats it as "no frame".
#[async_trait]
pub trait ChannelTransport: Send {
    /// Read up to and including the next newline. Returns an empty string on
    /// end-of-stream.
    async fn read_line(&mut self) -> io::Result<String>;

    /// Read exactly `len` bytes.
    async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>>;

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;

    /// Human readable description of the transport, used in log output.
    fn label(&self) -> &str;
}

/// [`ChannelTransport`] over any split async read/write pair, such as the
/// two halves of a UNIX stream socket or an in-memory duplex pipe.
pub struct StreamTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    label: String,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, label: impl Into<String>) -> Self {
        Self { reader: BufReader::new(reader), writer, label: label.into() }
    }
}

#[async_trait]
impl<R, W> ChannelTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        self.reader.read_until(b'\n', &mut line).await?;
        String::from_utf8(line).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "frame header is not valid UTF-8")
        })
    }

    async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data).await?;
        Ok(data)
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    fn label(&self) -> &str {
        &self.label
    }
}
