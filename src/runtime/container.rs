//! In-process runtime: the table of registered applications and request
//! dispatch through it.
//!
//! ## Concurrency
//!
//! The set of registered applications is an immutable [`HandlerTable`] behind
//! an `ArcSwap`; requests load it without locking. Register and unregister
//! build a new table under a writer mutex and swap it in.
//!
//! Each application's active configuration sits behind its own
//! `parking_lot::RwLock`. Requests hold the read lock for the whole
//! extension chain and resource call, so a reload (write lock) waits for
//! in-flight requests of that application only, and no request ever sees a
//! half-applied configuration. The write lock is taken with a timeout so a
//! stuck request cannot hang reconciliation.

use super::routes::{RouteTable, RouteTarget};
use super::{BoundExtension, ResolvedApplication, Runtime, RuntimeError};
use crate::handler::{HandlerRequest, HandlerResponse, InboundRequest};
use crate::ids::{ContainerHandle, RequestId};
use crate::properties::{keys, Properties, PropertyValue};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default time a reload waits for in-flight requests.
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_millis(5000);

/// Endpoint and identity of one runtime.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Whiteboard name, published as `whiteboard.runtime.name`
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Path every application base is mounted under (`/` for none)
    pub context_path: String,
    pub reload_timeout: Duration,
    /// Extra runtime properties matched by `whiteboard.target`
    pub properties: Properties,
}

impl RuntimeSettings {
    #[must_use]
    pub fn new(name: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            host: "0.0.0.0".to_string(),
            port,
            context_path: "/".to_string(),
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
            properties: Properties::new(),
        }
    }

    /// Context path without trailing slash; `""` for the root.
    fn context_prefix(&self) -> String {
        let trimmed = self.context_path.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

/// Read-only view of one registered application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredApplication {
    pub handle: ContainerHandle,
    pub name: String,
    pub base_path: String,
    pub routes: usize,
    pub extensions: Vec<String>,
}

struct ActiveConfig {
    routes: RouteTable,
    extensions: Vec<BoundExtension>,
}

impl ActiveConfig {
    fn build(application: &ResolvedApplication) -> Self {
        let mut routes = RouteTable::new();
        for resource in &application.resources {
            let name: Arc<str> = Arc::from(resource.name.as_str());
            for method in &resource.methods {
                routes.insert(
                    method.method.clone(),
                    RouteTarget {
                        resource: Arc::clone(&name),
                        operation: Arc::from(method.operation.as_str()),
                        pattern: format!("{}{}", resource.path, method.path),
                        instance: Arc::clone(&resource.instance),
                    },
                );
            }
        }
        Self {
            routes,
            extensions: application.extensions.clone(),
        }
    }
}

struct ApplicationSlot {
    handle: ContainerHandle,
    name: Arc<str>,
    base_path: String,
    /// Base path without wildcard: `/shop`, or `""` for `/*`
    prefix: String,
    config: RwLock<ActiveConfig>,
}

impl ApplicationSlot {
    fn serves(&self, path: &str) -> bool {
        self.prefix.is_empty()
            || path == self.prefix
            || (path.starts_with(&self.prefix) && path[self.prefix.len()..].starts_with('/'))
    }
}

/// Registered applications, longest prefix first.
#[derive(Default)]
struct HandlerTable {
    slots: Vec<Arc<ApplicationSlot>>,
}

impl HandlerTable {
    fn find(&self, path: &str) -> Option<&Arc<ApplicationSlot>> {
        self.slots.iter().find(|s| s.serves(path))
    }

    fn with(&self, slot: Arc<ApplicationSlot>) -> Self {
        let mut slots = self.slots.clone();
        slots.push(slot);
        slots.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { slots }
    }

    fn without(&self, handle: ContainerHandle) -> Option<Self> {
        let slots: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.handle != handle)
            .map(Arc::clone)
            .collect();
        (slots.len() != self.slots.len()).then_some(Self { slots })
    }
}

/// The in-process whiteboard runtime.
pub struct WhiteboardRuntime {
    settings: RuntimeSettings,
    table: ArcSwap<HandlerTable>,
    writer: Mutex<()>,
}

impl WhiteboardRuntime {
    #[must_use]
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings,
            table: ArcSwap::from_pointee(HandlerTable::default()),
            writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Snapshot of registered applications, longest base path first.
    #[must_use]
    pub fn registered(&self) -> Vec<RegisteredApplication> {
        self.table
            .load()
            .slots
            .iter()
            .map(|slot| {
                let config = slot.config.read();
                RegisteredApplication {
                    handle: slot.handle,
                    name: slot.name.to_string(),
                    base_path: slot.base_path.clone(),
                    routes: config.routes.len(),
                    extensions: config.extensions.iter().map(|e| e.name.clone()).collect(),
                }
            })
            .collect()
    }

    /// Route and serve one request.
    pub fn dispatch(&self, inbound: InboundRequest) -> HandlerResponse {
        let request_id = RequestId::from_header_or_new(
            inbound
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("x-request-id"))
                .map(|(_, v)| v.as_str()),
        );
        let context = self.settings.context_prefix();
        let Some(path) = strip_prefix(&inbound.path, &context) else {
            return not_found(&inbound.path);
        };

        let table = self.table.load();
        let Some(slot) = table.find(path) else {
            return not_found(&inbound.path);
        };
        let relative = &path[slot.prefix.len()..];

        let config = slot.config.read();
        let Some((target, path_params)) = config.routes.route(&inbound.method, relative) else {
            debug!(
                request_id = %request_id,
                application = %slot.name,
                method = %inbound.method,
                path = %inbound.path,
                "No route matched"
            );
            return not_found(&inbound.path);
        };

        let request = HandlerRequest {
            request_id,
            method: inbound.method,
            path: inbound.path,
            application_path: if relative.is_empty() {
                "/".to_string()
            } else {
                relative.to_string()
            },
            application: Arc::clone(&slot.name),
            resource: Arc::clone(&target.resource),
            operation: Arc::clone(&target.operation),
            path_params,
            query_params: inbound.query_params,
            headers: inbound.headers,
            body: inbound.body,
        };

        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            invoke(&config.extensions, &target, &request, started)
        }));
        drop(config);

        match outcome {
            Ok(response) => {
                debug!(
                    request_id = %request.request_id,
                    application = %request.application,
                    resource = %request.resource,
                    operation = %request.operation,
                    status = response.status,
                    latency_us = started.elapsed().as_micros() as u64,
                    "Request served"
                );
                response
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    request_id = %request.request_id,
                    application = %request.application,
                    resource = %request.resource,
                    operation = %request.operation,
                    panic = %message,
                    "Resource panicked"
                );
                HandlerResponse::error(500, "Internal Server Error")
            }
        }
    }
}

/// Extensions run `before` in chain order; the first that answers
/// short-circuits. `after` runs for every extension, innermost first.
fn invoke(
    extensions: &[BoundExtension],
    target: &RouteTarget,
    request: &HandlerRequest,
    started: Instant,
) -> HandlerResponse {
    let mut response = extensions
        .iter()
        .find_map(|e| e.instance.before(request))
        .unwrap_or_else(|| target.instance.handle(&target.operation, request));
    let latency = started.elapsed();
    for extension in extensions.iter().rev() {
        extension.instance.after(request, &mut response, latency);
    }
    response
}

fn not_found(path: &str) -> HandlerResponse {
    HandlerResponse::error(404, &format!("No resource at {path}"))
}

/// `path` below `prefix`, or `None` if it is outside it. `""` prefix keeps `path`.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

impl Runtime for WhiteboardRuntime {
    fn register(&self, application: ResolvedApplication) -> Result<ContainerHandle, RuntimeError> {
        let _writer = self.writer.lock();
        let current = self.table.load();
        if let Some(holder) = current
            .slots
            .iter()
            .find(|s| s.base_path == application.base_path)
        {
            return Err(RuntimeError::BasePathInUse {
                base_path: application.base_path.clone(),
                holder: holder.name.to_string(),
            });
        }

        let handle = ContainerHandle::new();
        let slot = Arc::new(ApplicationSlot {
            handle,
            name: Arc::from(application.name.as_str()),
            base_path: application.base_path.clone(),
            prefix: application.prefix().to_string(),
            config: RwLock::new(ActiveConfig::build(&application)),
        });
        let routes = slot.config.read().routes.len();
        self.table.store(Arc::new(current.with(slot)));
        info!(
            application = %application.name,
            base_path = %application.base_path,
            handle = %handle,
            routes,
            extensions = application.extensions.len(),
            "Application registered"
        );
        Ok(handle)
    }

    fn reload(
        &self,
        handle: ContainerHandle,
        application: ResolvedApplication,
    ) -> Result<(), RuntimeError> {
        let table = self.table.load();
        let slot = table
            .slots
            .iter()
            .find(|s| s.handle == handle)
            .ok_or(RuntimeError::UnknownHandle(handle))?;

        // Build outside the lock; requests keep the old table meanwhile.
        let next = ActiveConfig::build(&application);
        let timeout = self.settings.reload_timeout;
        let Some(mut config) = slot.config.try_write_for(timeout) else {
            warn!(
                application = %application.name,
                timeout_ms = timeout.as_millis() as u64,
                "Reload timed out waiting for in-flight requests"
            );
            return Err(RuntimeError::ReloadTimeout {
                application: application.name,
                timeout,
            });
        };
        *config = next;
        info!(
            application = %application.name,
            handle = %handle,
            routes = config.routes.len(),
            extensions = config.extensions.len(),
            "Application reloaded"
        );
        Ok(())
    }

    fn unregister(&self, handle: ContainerHandle) -> Result<(), RuntimeError> {
        let _writer = self.writer.lock();
        let current = self.table.load();
        let name = current
            .slots
            .iter()
            .find(|s| s.handle == handle)
            .map(|s| s.name.to_string());
        let next = current
            .without(handle)
            .ok_or(RuntimeError::UnknownHandle(handle))?;
        self.table.store(Arc::new(next));
        info!(application = ?name, handle = %handle, "Application unregistered");
        Ok(())
    }

    fn urls(&self) -> Vec<String> {
        let host = match self.settings.host.trim() {
            "" | "0.0.0.0" | "::" | "[::]" => "localhost",
            other => other,
        };
        let raw = format!(
            "http://{host}:{}{}/",
            self.settings.port,
            self.settings.context_prefix()
        );
        match url::Url::parse(&raw) {
            Ok(url) => vec![url.to_string()],
            Err(e) => {
                warn!(endpoint = %raw, error = %e, "Runtime endpoint is not a valid URL");
                Vec::new()
            }
        }
    }

    fn properties(&self) -> Properties {
        let mut properties = self.settings.properties.clone();
        properties.insert(keys::RUNTIME_NAME, self.settings.name.as_str());
        properties.insert(keys::RUNTIME_ENDPOINT, PropertyValue::Strings(self.urls()));
        properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ServiceId;
    use crate::runtime::BoundResource;
    use crate::service::{Extension, MethodInfo, Resource, ResourceDescriptor};
    use http::Method;
    use serde_json::json;

    struct Echo;

    impl Resource for Echo {
        fn descriptor(&self) -> ResourceDescriptor {
            ResourceDescriptor::at("/echo")
        }

        fn handle(&self, operation: &str, req: &HandlerRequest) -> HandlerResponse {
            HandlerResponse::json(
                200,
                json!({
                    "operation": operation,
                    "application": req.application.as_ref(),
                    "path": req.application_path,
                    "id": req.get_path_param("id"),
                }),
            )
        }
    }

    struct Boom;

    impl Resource for Boom {
        fn descriptor(&self) -> ResourceDescriptor {
            ResourceDescriptor::at("/boom")
        }

        fn handle(&self, _operation: &str, _req: &HandlerRequest) -> HandlerResponse {
            panic!("boom")
        }
    }

    struct Tag(&'static str);

    impl Extension for Tag {
        fn extension_types(&self) -> Vec<String> {
            vec!["response_filter".to_string()]
        }

        fn after(&self, _req: &HandlerRequest, res: &mut HandlerResponse, _latency: Duration) {
            let seen = res.get_header("x-chain").unwrap_or("").to_string();
            res.set_header("x-chain", format!("{seen}{}", self.0));
        }
    }

    struct Gate;

    impl Extension for Gate {
        fn extension_types(&self) -> Vec<String> {
            vec!["request_filter".to_string()]
        }

        fn before(&self, req: &HandlerRequest) -> Option<HandlerResponse> {
            req.get_header("x-deny")
                .map(|_| HandlerResponse::error(403, "denied"))
        }
    }

    fn resource(name: &str, path: &str, instance: Arc<dyn Resource>) -> BoundResource {
        BoundResource {
            name: name.to_string(),
            service_id: ServiceId(1),
            path: path.to_string(),
            methods: vec![
                MethodInfo::new(Method::GET, "", "list"),
                MethodInfo::new(Method::GET, "/{id}", "get"),
            ],
            instance,
        }
    }

    fn extension(name: &str, instance: Arc<dyn Extension>) -> BoundExtension {
        BoundExtension {
            name: name.to_string(),
            service_id: ServiceId(2),
            extension_types: instance.extension_types(),
            instance,
        }
    }

    fn app(name: &str, base: &str, resources: Vec<BoundResource>) -> ResolvedApplication {
        ResolvedApplication {
            name: name.to_string(),
            service_id: ServiceId(10),
            base_path: base.to_string(),
            properties: Properties::new(),
            resources,
            extensions: Vec::new(),
        }
    }

    fn runtime() -> WhiteboardRuntime {
        WhiteboardRuntime::new(RuntimeSettings::new("test", 8080))
    }

    fn get(runtime: &WhiteboardRuntime, path: &str) -> HandlerResponse {
        runtime.dispatch(InboundRequest::new(Method::GET, path))
    }

    #[test]
    fn test_longest_base_path_wins() {
        let rt = runtime();
        rt.register(app(".default", "/*", vec![resource("r", "/echo", Arc::new(Echo))]))
            .unwrap();
        rt.register(app("shop", "/shop/*", vec![resource("r", "/echo", Arc::new(Echo))]))
            .unwrap();

        let resp = get(&rt, "/shop/echo/7");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["application"], "shop");
        assert_eq!(resp.body["operation"], "get");
        assert_eq!(resp.body["id"], "7");

        let resp = get(&rt, "/echo");
        assert_eq!(resp.body["application"], ".default");
        assert_eq!(resp.body["path"], "/echo");

        // `/shopping` is not below `/shop`.
        assert_eq!(get(&rt, "/shopping/echo").status, 404);
    }

    #[test]
    fn test_base_path_conflict_is_reported() {
        let rt = runtime();
        rt.register(app("a", "/a/*", Vec::new())).unwrap();
        let err = rt.register(app("b", "/a/*", Vec::new())).unwrap_err();
        assert_eq!(err.reason(), crate::provider::FailureReason::Shadowed);
    }

    #[test]
    fn test_reload_and_unregister() {
        let rt = runtime();
        let handle = rt.register(app("a", "/a/*", Vec::new())).unwrap();
        assert_eq!(get(&rt, "/a/echo").status, 404);

        rt.reload(handle, app("a", "/a/*", vec![resource("r", "/echo", Arc::new(Echo))]))
            .unwrap();
        assert_eq!(get(&rt, "/a/echo").status, 200);

        rt.unregister(handle).unwrap();
        assert_eq!(get(&rt, "/a/echo").status, 404);
        assert_eq!(
            rt.unregister(handle),
            Err(RuntimeError::UnknownHandle(handle))
        );
        assert!(rt.registered().is_empty());
    }

    #[test]
    fn test_reload_times_out_while_request_in_flight() {
        let mut settings = RuntimeSettings::new("test", 8080);
        settings.reload_timeout = Duration::from_millis(20);
        let rt = WhiteboardRuntime::new(settings);
        let handle = rt.register(app("a", "/a/*", Vec::new())).unwrap();

        let table = rt.table.load();
        let guard = table.slots[0].config.read();
        let err = rt.reload(handle, app("a", "/a/*", Vec::new())).unwrap_err();
        assert!(matches!(err, RuntimeError::ReloadTimeout { .. }));
        drop(guard);
        rt.reload(handle, app("a", "/a/*", Vec::new())).unwrap();
    }

    #[test]
    fn test_panicking_resource_is_a_500() {
        let rt = runtime();
        rt.register(app("a", "/*", vec![resource("boom", "/boom", Arc::new(Boom))]))
            .unwrap();
        assert_eq!(get(&rt, "/boom").status, 500);
        // The slot is still usable afterwards.
        assert_eq!(get(&rt, "/boom").status, 500);
    }

    #[test]
    fn test_extension_chain_order_and_short_circuit() {
        let rt = runtime();
        let mut application = app("a", "/*", vec![resource("r", "/echo", Arc::new(Echo))]);
        application.extensions = vec![
            extension("gate", Arc::new(Gate)),
            extension("outer", Arc::new(Tag("o"))),
            extension("inner", Arc::new(Tag("i"))),
        ];
        rt.register(application).unwrap();

        let resp = get(&rt, "/echo");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.get_header("x-chain"), Some("io"));

        let denied = rt.dispatch(InboundRequest::new(Method::GET, "/echo").header("X-Deny", "1"));
        assert_eq!(denied.status, 403);
        assert_eq!(denied.get_header("x-chain"), Some("io"));
    }

    #[test]
    fn test_context_path_and_urls() {
        let mut settings = RuntimeSettings::new("main", 9090);
        settings.context_path = "/api/".to_string();
        let rt = WhiteboardRuntime::new(settings);
        rt.register(app("a", "/*", vec![resource("r", "/echo", Arc::new(Echo))]))
            .unwrap();

        assert_eq!(get(&rt, "/api/echo").status, 200);
        assert_eq!(get(&rt, "/echo").status, 404);
        assert_eq!(rt.urls(), vec!["http://localhost:9090/api/".to_string()]);

        let props = rt.properties();
        assert_eq!(props.get_str(keys::RUNTIME_NAME), Some("main"));
        assert_eq!(
            props.get_strings(keys::RUNTIME_ENDPOINT),
            vec!["http://localhost:9090/api/".to_string()]
        );
    }
}
