#![forbid(unsafe_code)]
//! A framed JSON-RPC 2.0 server dispatch and client correlation engine over
//! plain TCP.
//!
//! The wire format is a simple length-prefixed frame — `<decimal byte
//! length>\r\n<json body>\r\n` — carrying standard JSON-RPC 2.0 envelopes.
//! Everything above the socket (procedure registration, parameter
//! validation, batch fan-out, call correlation) follows the 2.0 spec; the
//! framing itself is this crate's own, not HTTP and not line-delimited
//! JSON.
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wire_rpc::{ParamSpec, JsonType, Server};
//!
//! # #[tokio::main]
//! # async fn main() -> std::io::Result<()> {
//! let arith = wire_rpc::Service::builder()
//!     .add_return(
//!         "Add",
//!         vec![ParamSpec::new("lhs", JsonType::Double), ParamSpec::new("rhs", JsonType::Double)],
//!         |req| async move {
//!             let params = req["params"].as_array().cloned().unwrap_or_default();
//!             Ok(json!(params[0].as_f64().unwrap() + params[1].as_f64().unwrap()))
//!         },
//!     )
//!     .build();
//!
//! let server = Server::builder().add_service("Arith", arith).build();
//! server.serve("127.0.0.1:0").await
//! # }
//! ```

mod aggregator;
mod client;
mod connection;
mod error;
mod framing;
mod procedure;
mod registry;
mod server;
mod types;

pub use client::{Client, ClientBuilder, ClientError};
pub use error::RpcError;
pub use framing::FramingError;
pub use procedure::ParamSpec;
pub use registry::{Registry, Service, ServiceBuilder};
pub use server::{Server, ServerBuilder};
pub use types::JsonType;
