//! Server dispatch core (C5): parses, validates, routes, and invokes
//! incoming requests/notifications against a [`Registry`], including batch
//! fan-out with per-element error isolation.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::aggregator::BatchAggregator;
use crate::connection::{self, spawn_writer};
use crate::error::{NotifyError, RequestError, RpcError};
use crate::framing::{encode, FrameDecoder, FramingError};
use crate::procedure::ProcedureKind;
use crate::registry::Registry;
use crate::types::JsonType;

/// What a top-level `handle_request` call produced, and whether the
/// connection should be torn down afterward. Framing-shape failures
/// (unparseable JSON, a non-object/array top level, an empty batch) close
/// the connection after the error is sent, matching scenario 4 of the
/// external interface description; a validation failure on an otherwise
/// well-formed single request does not.
pub enum DispatchOutcome {
    NoResponse,
    Respond(Value),
    RespondAndClose(Value),
}

/// The routing and invocation engine shared by every connection on a
/// [`Server`]. Cheap to clone — cloning only bumps the registry's `Arc`.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Entry point for one decoded frame's worth of bytes, already known to
    /// be valid UTF-8 text (framing has already happened).
    pub async fn handle_request(&self, body: &str) -> DispatchOutcome {
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                return DispatchOutcome::RespondAndClose(
                    RequestError::no_id(RpcError::ParseError, e.to_string()).to_response(),
                )
            }
        };

        match value {
            Value::Object(_) => {
                if value.get("id").is_none() {
                    self.handle_single_notify(&value).await;
                    DispatchOutcome::NoResponse
                } else {
                    DispatchOutcome::Respond(self.handle_single_request(&value).await)
                }
            }
            Value::Array(items) => {
                if items.is_empty() {
                    return DispatchOutcome::RespondAndClose(
                        RequestError::no_id(RpcError::InvalidRequest, "batch request is empty")
                            .to_response(),
                    );
                }
                match self.handle_batch(items).await {
                    Some(v) => DispatchOutcome::Respond(v),
                    None => DispatchOutcome::NoResponse,
                }
            }
            _ => DispatchOutcome::RespondAndClose(
                RequestError::no_id(RpcError::InvalidRequest, "request must be an object or array")
                    .to_response(),
            ),
        }
    }

    /// Dispatches every element of a batch concurrently, isolating each
    /// element's validation/invocation failure to its own slot in the
    /// response array. Returns `None` when the batch contained only
    /// notifications (nothing to send back).
    async fn handle_batch(&self, items: Vec<Value>) -> Option<Value> {
        let (aggregator, rx) = BatchAggregator::new();

        for item in items {
            if !item.is_object() {
                aggregator.add_response(
                    RequestError::no_id(RpcError::InvalidRequest, "batch element must be an object")
                        .to_response(),
                );
                continue;
            }

            if item.get("id").is_none() {
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    dispatcher.handle_single_notify(&item).await;
                });
            } else {
                let dispatcher = self.clone();
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    let response = dispatcher.handle_single_request(&item).await;
                    aggregator.add_response(response);
                });
            }
        }

        drop(aggregator);
        let responses = rx.await.unwrap_or_default();
        if responses.is_empty() {
            None
        } else {
            Some(Value::Array(responses))
        }
    }

    /// Validates, routes, and invokes a single Return-kind request,
    /// collapsing every failure into an error envelope rather than
    /// propagating it — a single request always produces exactly one
    /// response value.
    async fn handle_single_request(&self, request: &Value) -> Value {
        match self.try_handle_single(request).await {
            Ok(response) => response,
            Err(request_error) => request_error.to_response(),
        }
    }

    async fn try_handle_single(&self, request: &Value) -> Result<Value, RequestError> {
        let (id, method) = validate_single_request(request)?;

        let procedure = self
            .registry
            .resolve(&method, ProcedureKind::Return)
            .map_err(|err| RequestError::new(err, id.clone(), format!("no such method `{method}`")))?;

        match procedure.invoke_return(request.clone()).await {
            Ok(result) => Ok(json!({"jsonrpc": "2.0", "id": id, "result": result})),
            Err((err, detail)) => Err(RequestError::new(err, id, detail)),
        }
    }

    async fn handle_single_notify(&self, request: &Value) {
        if let Err(notify_error) = self.try_handle_notify(request).await {
            warn!(
                code = notify_error.err.code(),
                detail = %notify_error.detail,
                "dropping notification"
            );
        }
    }

    async fn try_handle_notify(&self, request: &Value) -> Result<(), NotifyError> {
        let method = validate_notify(request)?;

        let procedure = self
            .registry
            .resolve(&method, ProcedureKind::Notify)
            .map_err(|err| NotifyError::new(err, format!("no such method `{method}`")))?;

        procedure
            .invoke_notify(request.clone())
            .await
            .map_err(|(err, detail)| NotifyError::new(err, detail))
    }
}

fn has_params(request: &Value) -> bool {
    request.get("params").is_some()
}

fn member_count(request: &Value) -> usize {
    request.as_object().map(|m| m.len()).unwrap_or(0)
}

fn validate_jsonrpc_version(request: &Value, id: &Value) -> Result<(), RequestError> {
    match request.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => Ok(()),
        _ => Err(RequestError::new(
            RpcError::InvalidRequest,
            id.clone(),
            "jsonrpc must be the string \"2.0\"",
        )),
    }
}

fn validate_method<'a>(request: &'a Value, id: &Value) -> Result<&'a str, RequestError> {
    match request.get("method") {
        Some(Value::String(m)) => {
            let prefix = m.split('.').next().unwrap_or(m.as_str());
            if prefix == "rpc" {
                Err(RequestError::new(
                    RpcError::InvalidRequest,
                    id.clone(),
                    "the rpc. prefix is reserved",
                ))
            } else {
                Ok(m.as_str())
            }
        }
        _ => Err(RequestError::new(
            RpcError::InvalidRequest,
            id.clone(),
            "method must be a string",
        )),
    }
}

fn validate_id(request: &Value) -> Result<Value, RequestError> {
    match request.get("id") {
        Some(id) if matches!(JsonType::classify(id), JsonType::String | JsonType::Int32 | JsonType::Int64) => {
            Ok(id.clone())
        }
        Some(_) => Err(RequestError::no_id(
            RpcError::InvalidRequest,
            "id must be a string or integer",
        )),
        None => Err(RequestError::no_id(RpcError::InvalidRequest, "missing id")),
    }
}

fn validate_single_request(request: &Value) -> Result<(Value, String), RequestError> {
    let id = validate_id(request)?;
    validate_jsonrpc_version(request, &id)?;
    let method = validate_method(request, &id)?.to_string();

    let expected_members = 3 + has_params(request) as usize;
    if member_count(request) != expected_members {
        return Err(RequestError::new(
            RpcError::InvalidRequest,
            id,
            "unexpected or missing fields",
        ));
    }

    Ok((id, method))
}

fn validate_notify(request: &Value) -> Result<String, NotifyError> {
    match request.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => {}
        _ => return Err(NotifyError::new(RpcError::InvalidRequest, "jsonrpc must be the string \"2.0\"")),
    }

    let method = match request.get("method") {
        Some(Value::String(m)) => m.clone(),
        _ => return Err(NotifyError::new(RpcError::InvalidRequest, "method must be a string")),
    };

    let prefix = method.split('.').next().unwrap_or(method.as_str());
    if prefix == "rpc" {
        return Err(NotifyError::new(RpcError::InvalidRequest, "the rpc. prefix is reserved"));
    }

    let expected_members = 2 + has_params(request) as usize;
    if member_count(request) != expected_members {
        return Err(NotifyError::new(RpcError::InvalidRequest, "unexpected or missing fields"));
    }

    Ok(method)
}

/// Builds a [`Server`] with its registry and the transport-level limits
/// spec.md's ambient configuration leaves to the integrator.
pub struct ServerBuilder {
    registry: Registry,
    max_message_len: u32,
    high_water_mark: usize,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            registry: Registry::new(),
            max_message_len: 100 * 1024 * 1024,
            high_water_mark: 64 * 1024,
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(mut self, name: impl Into<String>, service: crate::registry::Service) -> Self {
        self.registry.add_service(name, service);
        self
    }

    /// Caps a single frame's declared body length. Larger declared lengths
    /// are rejected at the framing layer before any bytes are parsed.
    pub fn max_message_len(mut self, bytes: u32) -> Self {
        self.max_message_len = bytes;
        self
    }

    /// The pending-write-bytes threshold above which a connection's reader
    /// pauses until the writer drains back under it.
    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    pub fn build(self) -> Server {
        Server {
            dispatcher: Dispatcher::new(self.registry),
            max_message_len: self.max_message_len,
            high_water_mark: self.high_water_mark,
        }
    }
}

/// A bound dispatch engine, ready to accept TCP connections.
pub struct Server {
    dispatcher: Dispatcher,
    max_message_len: u32,
    high_water_mark: usize,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds `addr` and serves connections until the listener errors.
    /// Each accepted connection gets its own reader loop and writer task;
    /// a connection's lifetime never blocks another's.
    pub async fn serve(self, addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        debug!(local_addr = ?listener.local_addr().ok(), "server listening");

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!(%peer_addr, "accepted connection");
            let dispatcher = self.dispatcher.clone();
            let max_message_len = self.max_message_len;
            let high_water_mark = self.high_water_mark;
            tokio::spawn(async move {
                if let Err(err) =
                    serve_connection(stream, dispatcher, max_message_len, high_water_mark).await
                {
                    warn!(%peer_addr, %err, "connection ended with a framing error");
                }
            });
        }
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    dispatcher: Dispatcher,
    max_message_len: u32,
    high_water_mark: usize,
) -> Result<(), FramingError> {
    let _ = stream.set_nodelay(true);
    let (mut read_half, write_half) = stream.into_split();
    let (outbound, gate) = spawn_writer(write_half, high_water_mark);
    let mut decoder = FrameDecoder::new(max_message_len);

    loop {
        let frame = match connection::read_frame(&mut read_half, &mut decoder, &gate).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(()),
            Err(framing_error) => {
                // An invalid header or an over-cap declared length is a
                // framing-level shape failure, not an unparseable JSON body
                // — `PARSE_ERROR` is reserved for the latter (spec §7).
                let response = RequestError::no_id(RpcError::InvalidRequest, framing_error.to_string())
                    .to_response();
                outbound.send(encode(&response.to_string()));
                return Err(framing_error);
            }
        };

        match dispatcher.handle_request(&frame).await {
            DispatchOutcome::NoResponse => {}
            DispatchOutcome::Respond(response) => {
                outbound.send(encode(&response.to_string()));
            }
            DispatchOutcome::RespondAndClose(response) => {
                outbound.send(encode(&response.to_string()));
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::ParamSpec;
    use crate::registry::Service;

    fn arith_dispatcher() -> Dispatcher {
        let logged = Arc::new(tokio::sync::Mutex::new(Vec::<f64>::new()));
        let log_sink = logged.clone();
        let service = Service::builder()
            .add_return("Add", vec![ParamSpec::new("lhs", JsonType::Double), ParamSpec::new("rhs", JsonType::Double)], |req| async move {
                let params = req["params"].as_array().cloned().unwrap_or_default();
                Ok(json!(params[0].as_f64().unwrap() + params[1].as_f64().unwrap()))
            })
            .add_notify("Log", vec![ParamSpec::new("value", JsonType::Double)], move |req| {
                let sink = log_sink.clone();
                async move {
                    let params = req["params"].as_array().cloned().unwrap_or_default();
                    sink.lock().await.push(params[0].as_f64().unwrap());
                }
            })
            .build();
        let mut registry = Registry::new();
        registry.add_service("Arith", service);
        Dispatcher::new(registry)
    }

    #[tokio::test]
    async fn dispatches_a_well_formed_single_request() {
        let dispatcher = arith_dispatcher();
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"Arith.Add","params":[3.0,4.0]}"#;
        match dispatcher.handle_request(body).await {
            DispatchOutcome::Respond(v) => {
                assert_eq!(v["result"], json!(7.0));
                assert_eq!(v["id"], json!(1));
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found_but_keeps_connection_open() {
        let dispatcher = arith_dispatcher();
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"Arith.Pow","params":[3.0,4.0]}"#;
        match dispatcher.handle_request(body).await {
            DispatchOutcome::Respond(v) => {
                assert_eq!(v["error"]["code"], json!(-32601));
            }
            _ => panic!("expected an in-band error response, not a connection close"),
        }
    }

    #[tokio::test]
    async fn bad_params_arity_is_invalid_params() {
        let dispatcher = arith_dispatcher();
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"Arith.Add","params":[3.0]}"#;
        match dispatcher.handle_request(body).await {
            DispatchOutcome::Respond(v) => {
                assert_eq!(v["error"]["code"], json!(-32602));
            }
            _ => panic!("expected an in-band error response"),
        }
    }

    #[tokio::test]
    async fn malformed_json_closes_the_connection() {
        let dispatcher = arith_dispatcher();
        match dispatcher.handle_request("{not json").await {
            DispatchOutcome::RespondAndClose(v) => {
                assert_eq!(v["error"]["code"], json!(-32700));
                assert_eq!(v["id"], Value::Null);
            }
            _ => panic!("parse errors must close the connection"),
        }
    }

    #[tokio::test]
    async fn empty_batch_closes_the_connection() {
        let dispatcher = arith_dispatcher();
        match dispatcher.handle_request("[]").await {
            DispatchOutcome::RespondAndClose(v) => {
                assert_eq!(v["error"]["code"], json!(-32600));
            }
            _ => panic!("empty batch must close the connection"),
        }
    }

    #[tokio::test]
    async fn notification_never_produces_a_response() {
        let dispatcher = arith_dispatcher();
        let body = r#"{"jsonrpc":"2.0","method":"Arith.Log","params":[1.5]}"#;
        matches!(dispatcher.handle_request(body).await, DispatchOutcome::NoResponse);
    }

    #[tokio::test]
    async fn mixed_batch_isolates_element_failures() {
        let dispatcher = arith_dispatcher();
        let body = r#"[
            {"jsonrpc":"2.0","id":1,"method":"Arith.Add","params":[1.0,2.0]},
            {"jsonrpc":"2.0","id":2,"method":"Arith.Pow","params":[1.0,2.0]},
            {"jsonrpc":"2.0","method":"Arith.Log","params":[9.0]}
        ]"#;
        match dispatcher.handle_request(body).await {
            DispatchOutcome::Respond(Value::Array(responses)) => {
                assert_eq!(responses.len(), 2);
                let ok = responses.iter().find(|r| r["id"] == json!(1)).unwrap();
                assert_eq!(ok["result"], json!(3.0));
                let err = responses.iter().find(|r| r["id"] == json!(2)).unwrap();
                assert_eq!(err["error"]["code"], json!(-32601));
            }
            _ => panic!("expected a batch response array"),
        }
    }

    #[tokio::test]
    async fn reserved_rpc_prefix_is_invalid_request() {
        let dispatcher = arith_dispatcher();
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"rpc.Ping"}"#;
        match dispatcher.handle_request(body).await {
            DispatchOutcome::Respond(v) => assert_eq!(v["error"]["code"], json!(-32600)),
            _ => panic!("expected an in-band error response"),
        }
    }
}
