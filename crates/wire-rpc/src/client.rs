//! Client correlation core (C6): assigns request ids, tracks pending calls
//! in a shared map, and resolves each one when its response frame arrives
//! on the connection's single reader task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::connection::{self, spawn_writer, OutboundHandle};
use crate::error::RpcError;
use crate::framing::{encode, FrameDecoder};

/// A call-site failure. Distinct from [`RpcError`], which is the server's
/// wire-level vocabulary — this is everything that can go wrong getting a
/// call there and back.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server returned {code}: {message}{}", data.as_ref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },
    #[error("response did not arrive within the deadline")]
    Timeout,
    #[error("connection closed before a response arrived")]
    Disconnected,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClientError {
    fn from_error_object(error: &Value) -> Self {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(RpcError::InternalError.code() as i64) as i32;
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let data = error.get("data").cloned();
        ClientError::Remote { code, message, data }
    }
}

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;

/// A correlation-engine handle over one framed TCP connection. Cloning
/// shares the same pending-call table and outbound writer — every clone
/// talks to the same connection.
#[derive(Clone)]
pub struct Client {
    outbound: OutboundHandle,
    pending: Pending,
    next_id: Arc<AtomicI64>,
    default_timeout: Option<Duration>,
}

impl Client {
    /// Connects to `addr` and spawns the connection's reader/writer tasks.
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs, builder: ClientBuilder) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (mut read_half, write_half) = stream.into_split();
        let (outbound, gate) = spawn_writer(write_half, builder.high_water_mark);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let max_message_len = builder.max_message_len;

        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new(max_message_len);
            loop {
                match connection::read_frame(&mut read_half, &mut decoder, &gate).await {
                    Ok(Some(body)) => handle_incoming_frame(&reader_pending, &body),
                    Ok(None) | Err(_) => {
                        drain_pending_as_disconnected(&reader_pending);
                        return;
                    }
                }
            }
        });

        Ok(Self {
            outbound,
            pending,
            next_id: Arc::new(AtomicI64::new(0)),
            default_timeout: builder.default_timeout,
        })
    }

    /// Issues a Return-kind call and awaits its matching response. `timeout`
    /// overrides the client's configured default for this call only; `None`
    /// here still falls back to that default, not to "wait forever".
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let mut request = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if !params.is_null() {
            request["params"] = params;
        }
        if !self.outbound.send(encode(&request.to_string())) {
            self.pending.lock().unwrap().remove(&id);
            return Err(ClientError::Disconnected);
        }

        let deadline = timeout.or(self.default_timeout);
        let outcome = match deadline {
            Some(d) => tokio::time::timeout(d, rx).await,
            None => Ok(rx.await),
        };

        match outcome {
            Err(_elapsed) => {
                self.pending.lock().unwrap().remove(&id);
                Err(ClientError::Timeout)
            }
            Ok(Err(_recv_error)) => Err(ClientError::Disconnected),
            Ok(Ok(response)) => response_to_result(response),
        }
    }

    /// Sends a Notify-kind message. There is no response to wait for, and
    /// thus no failure mode visible to the caller short of the write itself
    /// failing.
    pub fn notify(&self, method: &str, params: Value) -> bool {
        let mut request = json!({"jsonrpc": "2.0", "method": method});
        if !params.is_null() {
            request["params"] = params;
        }
        self.outbound.send(encode(&request.to_string()))
    }
}

fn response_to_result(response: Value) -> Result<Value, ClientError> {
    if let Some(error) = response.get("error") {
        return Err(ClientError::from_error_object(error));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| ClientError::Malformed("response has neither result nor error".to_string()))
}

/// Checks a single response envelope against spec §4.5 step 3: exactly 3
/// members, `jsonrpc == "2.0"`, `id` present as an integer, exactly one of
/// `result`/`error`, and `error` (if present) must be an object. Returns the
/// reason it failed, if any; callers still try to recover the `id` out of a
/// shape-invalid response separately, since a response can carry a usable
/// `id` even when e.g. its member count is wrong.
fn validate_response_shape(response: &Value) -> Result<(), &'static str> {
    let Some(obj) = response.as_object() else {
        return Err("response must be an object");
    };
    if obj.len() != 3 {
        return Err("response must have exactly 3 members");
    }
    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => {}
        _ => return Err("jsonrpc must be the string \"2.0\""),
    }
    if obj.get("id").and_then(Value::as_i64).is_none() {
        return Err("id missing or not an integer");
    }
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");
    if has_result == has_error {
        return Err("response must have exactly one of result or error");
    }
    if has_error && !matches!(obj.get("error"), Some(Value::Object(_))) {
        return Err("error must be an object");
    }
    Ok(())
}

fn handle_incoming_frame(pending: &Pending, body: &str) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping unparseable response frame");
            return;
        }
    };

    // A batch of responses arrives as an array; a single response as an
    // object. Both are demultiplexed by `id` against the pending table.
    let responses: Vec<Value> = match value {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut table = pending.lock().unwrap();
    for response in responses {
        let id = response.get("id").and_then(Value::as_i64);

        if let Err(reason) = validate_response_shape(&response) {
            warn!(reason, "dropping malformed response; request degrades to notify");
            // A shape failure still erases the pending entry when the `id`
            // was recoverable, per spec §4.5/§7 — the callback never fires.
            if let Some(id) = id {
                table.remove(&id);
            }
            continue;
        }

        let id = id.expect("validate_response_shape confirmed id is an integer");
        if let Some(tx) = table.remove(&id) {
            let _ = tx.send(response);
        } else {
            debug!(id, "dropping response with no matching pending call");
        }
    }
}

fn drain_pending_as_disconnected(pending: &Pending) {
    let mut table = pending.lock().unwrap();
    for (_, tx) in table.drain() {
        let _ = tx.send(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": RpcError::InternalError.code(),
                "message": "connection closed",
            },
            "id": Value::Null,
        }));
    }
}

/// Builds a [`Client`], mirroring [`crate::server::ServerBuilder`]'s
/// posture: every transport-level limit is an explicit, defaulted knob
/// rather than a compiled-in constant.
pub struct ClientBuilder {
    max_message_len: u32,
    high_water_mark: usize,
    default_timeout: Option<Duration>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            max_message_len: 64 * 1024,
            high_water_mark: 64 * 1024,
            default_timeout: None,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_message_len(mut self, bytes: u32) -> Self {
        self.max_message_len = bytes;
        self
    }

    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// The deadline applied to every `call()` that doesn't pass its own.
    /// `None` (the default) means calls wait indefinitely unless they
    /// supply a per-call timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub async fn connect(self, addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<Client> {
        Client::connect(addr, self).await
    }
}
