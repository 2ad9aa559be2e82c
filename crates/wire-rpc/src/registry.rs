//! Service and server registry (C4): name -> method name -> procedure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RpcError;
use crate::procedure::{NotifyHandler, ParamSpec, Procedure, ReturnHandler};

/// A named collection of procedures. A method name may have both a Return
/// and a Notify variant registered side by side; within one kind a name
/// appears at most once.
#[derive(Default, Clone)]
pub struct Service {
    returns: HashMap<String, Procedure>,
    notifies: HashMap<String, Procedure>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    pub(crate) fn find_return(&self, method: &str) -> Option<&Procedure> {
        self.returns.get(method)
    }

    pub(crate) fn find_notify(&self, method: &str) -> Option<&Procedure> {
        self.notifies.get(method)
    }
}

/// Builds a [`Service`] one procedure at a time, rejecting duplicate names
/// within a kind at build time rather than with a registration-time panic
/// deep in a hash map.
#[derive(Default)]
pub struct ServiceBuilder {
    returns: HashMap<String, Procedure>,
    notifies: HashMap<String, Procedure>,
}

impl ServiceBuilder {
    /// Registers a Return-kind procedure. `params` is the ordered, typed
    /// parameter schema (may be empty); `handler` runs after validation and
    /// returns the `result` value.
    pub fn add_return<F, Fut>(mut self, method: impl Into<String>, params: Vec<ParamSpec>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let method = method.into();
        assert!(
            !self.returns.contains_key(&method),
            "duplicate Return procedure name `{method}`"
        );
        let handler: ReturnHandler = Arc::new(move |req| Box::pin(handler(req)));
        self.returns
            .insert(method, Procedure::Return { params, handler });
        self
    }

    /// Registers a Notify-kind procedure. Never produces a response.
    pub fn add_notify<F, Fut>(mut self, method: impl Into<String>, params: Vec<ParamSpec>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let method = method.into();
        assert!(
            !self.notifies.contains_key(&method),
            "duplicate Notify procedure name `{method}`"
        );
        let handler: NotifyHandler = Arc::new(move |req| Box::pin(handler(req)));
        self.notifies
            .insert(method, Procedure::Notify { params, handler });
        self
    }

    pub fn build(self) -> Service {
        Service {
            returns: self.returns,
            notifies: self.notifies,
        }
    }
}

/// The server's top-level name -> [`Service`] mapping. Method resolution at
/// the wire is `"<service>.<method>"`, split at the first `.`; both
/// segments must be non-empty and the service name must be registered.
#[derive(Default, Clone)]
pub struct Registry {
    services: HashMap<String, Arc<Service>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `name`. Panics on a duplicate name — this
    /// is a programmer error, not a runtime condition a client can trigger.
    pub fn add_service(&mut self, name: impl Into<String>, service: Service) {
        let name = name.into();
        assert!(
            !self.services.contains_key(&name),
            "duplicate service name `{name}`"
        );
        self.services.insert(name, Arc::new(service));
    }

    /// Splits `method` at the first `.` and resolves it to a registered
    /// procedure. `kind` selects the Return or Notify table.
    pub(crate) fn resolve(
        &self,
        method: &str,
        kind: crate::procedure::ProcedureKind,
    ) -> Result<&Procedure, RpcError> {
        let Some(dot) = method.find('.') else {
            return Err(RpcError::MethodNotFound);
        };
        let (service_name, rest) = method.split_at(dot);
        let method_name = &rest[1..];
        if service_name.is_empty() || method_name.is_empty() {
            return Err(RpcError::MethodNotFound);
        }

        let service = self
            .services
            .get(service_name)
            .ok_or(RpcError::MethodNotFound)?;

        let found = match kind {
            crate::procedure::ProcedureKind::Return => service.find_return(method_name),
            crate::procedure::ProcedureKind::Notify => service.find_notify(method_name),
        };
        found.ok_or(RpcError::MethodNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::ProcedureKind;
    use serde_json::json;

    fn add_service() -> Service {
        Service::builder()
            .add_return("Add", vec![], |_| async { Ok(json!(1)) })
            .add_notify("Log", vec![], |_| async {})
            .build()
    }

    #[test]
    fn resolves_known_service_and_method() {
        let mut registry = Registry::new();
        registry.add_service("Arith", add_service());
        assert!(registry.resolve("Arith.Add", ProcedureKind::Return).is_ok());
        assert!(registry.resolve("Arith.Log", ProcedureKind::Notify).is_ok());
    }

    #[test]
    fn rejects_unknown_service_method_and_malformed_names() {
        let mut registry = Registry::new();
        registry.add_service("Arith", add_service());
        assert_eq!(
            registry.resolve("Arith.Pow", ProcedureKind::Return).unwrap_err(),
            RpcError::MethodNotFound
        );
        assert_eq!(
            registry.resolve("Other.Add", ProcedureKind::Return).unwrap_err(),
            RpcError::MethodNotFound
        );
        assert_eq!(
            registry.resolve("NoDot", ProcedureKind::Return).unwrap_err(),
            RpcError::MethodNotFound
        );
        assert_eq!(
            registry.resolve(".Add", ProcedureKind::Return).unwrap_err(),
            RpcError::MethodNotFound
        );
        assert_eq!(
            registry.resolve("Arith.", ProcedureKind::Return).unwrap_err(),
            RpcError::MethodNotFound
        );
    }

    #[test]
    #[should_panic(expected = "duplicate service name")]
    fn rejects_duplicate_service_names() {
        let mut registry = Registry::new();
        registry.add_service("Arith", add_service());
        registry.add_service("Arith", add_service());
    }
}
