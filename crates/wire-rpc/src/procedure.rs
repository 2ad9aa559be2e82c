//! Procedure descriptors (C3): a parameter schema plus a handler, bound at
//! registration time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RpcError;
use crate::types::JsonType;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single named, typed parameter in a procedure's schema. Order matches
/// the positional (array) argument order; for object-shaped params the name
/// is authoritative.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: JsonType,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: JsonType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Handler for a Return-kind procedure. Returns the `result` value on
/// success; an `Err(detail)` is surfaced to the caller as `INTERNAL_ERROR`
/// with `detail` as `error.data` (spec.md §7: "handler raised an uncaught
/// failure... not produced directly by the core").
pub type ReturnHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Handler for a Notify-kind procedure. No response is ever produced, so
/// there is nothing to return.
pub type NotifyHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Return,
    Notify,
}

/// A registered procedure: its parameter schema plus its handler. One
/// descriptor serves requests of exactly one kind (Return or Notify); a
/// method name may have both kinds registered side by side in a `Service`.
#[derive(Clone)]
pub enum Procedure {
    Return {
        params: Vec<ParamSpec>,
        handler: ReturnHandler,
    },
    Notify {
        params: Vec<ParamSpec>,
        handler: NotifyHandler,
    },
}

impl Procedure {
    pub fn kind(&self) -> ProcedureKind {
        match self {
            Procedure::Return { .. } => ProcedureKind::Return,
            Procedure::Notify { .. } => ProcedureKind::Notify,
        }
    }

    fn params(&self) -> &[ParamSpec] {
        match self {
            Procedure::Return { params, .. } => params,
            Procedure::Notify { params, .. } => params,
        }
    }

    /// Validates `request["params"]` (if present) against this procedure's
    /// schema. Does not require `request` to have an `id` — callers attach
    /// the id to whatever error this returns.
    pub fn validate_params(&self, request: &Value) -> Result<(), (RpcError, String)> {
        let params = self.params();

        let Some(p) = request.get("params") else {
            return if params.is_empty() {
                Ok(())
            } else {
                Err((RpcError::InvalidParams, "missing params".to_string()))
            };
        };

        match p {
            Value::Array(items) => {
                if items.is_empty() || items.len() != params.len() {
                    return Err((
                        RpcError::InvalidParams,
                        "params arity mismatch".to_string(),
                    ));
                }
                for (item, spec) in items.iter().zip(params) {
                    if !spec.ty.matches(item) {
                        return Err((
                            RpcError::InvalidParams,
                            format!("param {} has wrong type", spec.name),
                        ));
                    }
                }
                Ok(())
            }
            Value::Object(map) => {
                if map.is_empty() || map.len() != params.len() {
                    return Err((
                        RpcError::InvalidParams,
                        "params arity mismatch".to_string(),
                    ));
                }
                for spec in params {
                    match map.get(&spec.name) {
                        Some(v) if spec.ty.matches(v) => {}
                        Some(_) => {
                            return Err((
                                RpcError::InvalidParams,
                                format!("param {} has wrong type", spec.name),
                            ))
                        }
                        None => {
                            return Err((
                                RpcError::InvalidParams,
                                format!("missing param {}", spec.name),
                            ))
                        }
                    }
                }
                Ok(())
            }
            _ => Err((
                RpcError::InvalidParams,
                "params must be object or array".to_string(),
            )),
        }
    }

    /// Validates then invokes a Return procedure, producing the `result`
    /// value or an `(RpcError, detail)` pair the caller turns into a wire
    /// error.
    pub async fn invoke_return(&self, request: Value) -> Result<Value, (RpcError, String)> {
        let Procedure::Return { handler, .. } = self else {
            unreachable!("invoke_return called on a Notify procedure");
        };
        self.validate_params(&request)?;
        handler(request)
            .await
            .map_err(|detail| (RpcError::InternalError, detail))
    }

    /// Validates then invokes a Notify procedure. Failures are the caller's
    /// responsibility to log at `WARN` and discard.
    pub async fn invoke_notify(&self, request: Value) -> Result<(), (RpcError, String)> {
        let Procedure::Notify { handler, .. } = self else {
            unreachable!("invoke_notify called on a Return procedure");
        };
        self.validate_params(&request)?;
        handler(request).await;
        Ok(())
    }
}
