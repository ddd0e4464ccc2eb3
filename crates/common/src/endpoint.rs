// Bidirectional RPC endpoint: the caller and server halves of the protocol
// over one transport.

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{CallError, ProtocolError};
use crate::frame::{read_frame, write_frame, Request, Response};
use crate::transport::ChannelTransport;

/// One end of a negotiator channel.
///
/// The protocol is strictly request/response: a second request is never
/// written before the previous response has been read. Callers that abandon
/// a `call` mid-flight (for example through an enclosing timeout) must
/// discard the endpoint and open a fresh one, because the stream may carry a
/// stale response.
pub struct Endpoint<T> {
    transport: T,
}

impl<T: ChannelTransport> Endpoint<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Call a method on the remote side and wait for its result.
    pub async fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kw: Map<String, Value>,
    ) -> Result<Value, CallError> {
        debug!(method, transport = self.transport.label(), "calling remote method");
        let request = serde_json::to_value(Request::new(method, args, kw))
            .map_err(ProtocolError::Encode)?;
        write_frame(&mut self.transport, &request).await?;

        let value = read_frame(&mut self.transport)
            .await?
            .ok_or(CallError::ConnectionClosed)?;
        let response: Response = serde_json::from_value(value.clone()).map_err(|source| {
            ProtocolError::BadPayload { message: value.to_string(), source }
        })?;
        if response.success {
            debug!(method, "remote method call succeeded");
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            let error = response.error.unwrap_or_default();
            warn!(method, error, "remote method call failed");
            Err(CallError::RemoteMethodFailed(error))
        }
    }

    /// Answer requests from the remote side until the transport closes.
    ///
    /// Failures inside dispatched methods are converted into failure
    /// responses and the loop keeps serving; only protocol violations and
    /// transport errors terminate it.
    pub async fn serve<D: Dispatcher>(&mut self, dispatcher: &mut D) -> Result<(), ProtocolError> {
        loop {
            let Some(value) = read_frame(&mut self.transport).await? else {
                info!(transport = self.transport.label(), "transport closed, leaving serve loop");
                return Ok(());
            };
            let response = match serde_json::from_value::<Request>(value) {
                Ok(request) => Self::dispatch(dispatcher, request).await,
                Err(error) => {
                    warn!(%error, "received a frame that is not a request");
                    Response::failure(format!("Malformed request: {error}"))
                }
            };
            let encoded = serde_json::to_value(response).map_err(ProtocolError::Encode)?;
            write_frame(&mut self.transport, &encoded).await?;
        }
    }

    async fn dispatch<D: Dispatcher>(dispatcher: &mut D, request: Request) -> Response {
        let method = request.method.as_str();
        // Underscore-prefixed names are private by convention and never
        // dispatched, whatever the dispatcher advertises.
        if method.is_empty()
            || method.starts_with('_')
            || !dispatcher.methods().contains(&method)
        {
            warn!(method, "remote tried to call unsupported method");
            return Response::failure(format!("Method {method} not supported"));
        }

        info!(method, "remote is calling local method");
        match dispatcher.invoke(method, &request.args, &request.kw).await {
            Ok(result) => Response::success(result),
            Err(failure) => {
                // Swallow the failure so one bad call cannot take the
                // endpoint down with it.
                error!(method, error = ?failure, "local method call failed");
                Response::failure(format!("{failure:#}"))
            }
        }
    }

    /// Consume the endpoint and return its transport.
    pub fn into_transport(self) -> T {
        self.transport
    }
}
