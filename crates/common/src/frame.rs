// Length-prefixed JSON framing: `<decimal byte count>\n<payload>`.
//
// The byte count is measured in encoded bytes and the payload carries no
// trailing delimiter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ProtocolError;
use crate::transport::ChannelTransport;

/// A remote procedure call request.
///
/// `args` and `kw` may be omitted on the wire; both sides treat a missing
/// member as empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kw: Map<String, Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, args: Vec<Value>, kw: Map<String, Value>) -> Self {
        Self { method: method.into(), args, kw }
    }
}

/// The response to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(result: Value) -> Self {
        Self { success: true, result: Some(result), error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, result: None, error: Some(error.into()) }
    }
}

/// Read one frame from the transport and decode its payload.
///
/// Returns `Ok(None)` when the transport reported end-of-stream before a
/// header line arrived. A nonempty header that is not a decimal byte count,
/// or a payload that is not valid JSON, is a [`ProtocolError`].
pub async fn read_frame<T>(transport: &mut T) -> Result<Option<Value>, ProtocolError>
where
    T: ChannelTransport + ?Sized,
{
    let line = transport.read_line().await?;
    let header = line.trim();
    if header.is_empty() {
        return Ok(None);
    }
    if !header.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(ProtocolError::BadByteCount { input: header.to_string() });
    }
    let byte_count: usize = header
        .parse()
        .map_err(|_| ProtocolError::BadByteCount { input: header.to_string() })?;

    debug!(bytes = byte_count, transport = transport.label(), "reading message");
    let payload = transport.read_exact(byte_count).await?;
    match serde_json::from_slice(&payload) {
        Ok(value) => Ok(Some(value)),
        Err(source) => Err(ProtocolError::BadPayload {
            message: String::from_utf8_lossy(&payload).into_owned(),
            source,
        }),
    }
}

/// Encode a value and write it as one frame: the ASCII decimal byte count,
/// a newline, the payload bytes, then a flush.
pub async fn write_frame<T>(transport: &mut T, value: &Value) -> Result<(), ProtocolError>
where
    T: ChannelTransport + ?Sized,
{
    let payload = serde_json::to_vec(value).map_err(ProtocolError::Encode)?;
    debug!(bytes = payload.len(), transport = transport.label(), "sending message");

    // Header and payload are coalesced into a single write so the frame is
    // observable as one logical message.
    let mut message = format!("{}\n", payload.len()).into_bytes();
    message.extend_from_slice(&payload);
    transport.write_all(&message).await?;
    transport.flush().await?;
    Ok(())
}
