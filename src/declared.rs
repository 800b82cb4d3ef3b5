//! # Declared Providers
//!
//! Providers written down in a configuration file instead of registered from
//! code. Each entry carries a service id and its properties; the markers in
//! the properties decide what it becomes:
//!
//! ```yaml
//! providers:
//!   - id: 1
//!     properties:
//!       whiteboard.name: shop
//!       whiteboard.application.base: /shop
//!   - id: 10
//!     path: /hello
//!     properties:
//!       whiteboard.name: hello
//!       whiteboard.resource: true
//!     methods:
//!       - verb: GET
//!         body: "hello"
//!       - verb: POST
//!         path: /{id}
//!         status: 201
//!   - id: 20
//!     properties:
//!       whiteboard.name: tagger
//!       whiteboard.extension: true
//!     extension_types: [response_filter]
//!     headers:
//!       x-served-by: whiteboard
//! ```
//!
//! A method without a `body` echoes the request back as JSON.

use crate::handler::{HandlerRequest, HandlerResponse};
use crate::ids::ServiceId;
use crate::properties::{keys, Properties};
use crate::provider::ServiceReference;
use crate::service::{Extension, MethodInfo, Resource, ResourceDescriptor, ServiceFactory, ServiceObject, Singleton};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One declared method of a resource.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MethodDecl {
    #[serde(default = "default_verb")]
    pub verb: String,
    /// Sub-path below the resource path
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_status")]
    pub status: u16,
    /// Fixed JSON response; absent means echo
    #[serde(default)]
    pub body: Option<Value>,
    /// Operation name; defaults to `{verb}_{index}`
    #[serde(default)]
    pub operation: Option<String>,
}

fn default_verb() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

impl MethodDecl {
    /// Parsed HTTP method. `None` for an unknown verb.
    #[must_use]
    pub fn method(&self) -> Option<Method> {
        Method::from_bytes(self.verb.trim().to_ascii_uppercase().as_bytes()).ok()
    }

    fn operation_name(&self, index: usize) -> String {
        self.operation
            .clone()
            .unwrap_or_else(|| format!("{}_{index}", self.verb.trim().to_ascii_lowercase()))
    }
}

/// One provider entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderDecl {
    pub id: i64,
    #[serde(default)]
    pub properties: Properties,
    /// Resource path, `/` when omitted
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
    #[serde(default)]
    pub extension_types: Vec<String>,
    /// Response headers added by an extension
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ProviderDecl {
    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        ServiceId(self.id)
    }

    /// Build the service reference this entry stands for. A fresh service
    /// object is created on every call.
    #[must_use]
    pub fn reference(&self) -> ServiceReference {
        let is_resource = self.properties.is_true(keys::RESOURCE);
        let is_extension = self.properties.is_true(keys::EXTENSION);
        let object = match (is_resource, is_extension) {
            (true, true) => ServiceObject::Content {
                resource: self.resource_factory(),
                extension: self.extension_factory(),
            },
            (true, false) => ServiceObject::Resource(self.resource_factory()),
            (false, true) => ServiceObject::Extension(self.extension_factory()),
            (false, false) => ServiceObject::None,
        };
        ServiceReference::new(self.id, self.properties.clone(), object)
    }

    fn resource_factory(&self) -> Arc<dyn ServiceFactory<dyn Resource>> {
        let resource: Arc<dyn Resource> = Arc::new(DeclaredResource::from_decl(self));
        Arc::new(Singleton::new(resource))
    }

    fn extension_factory(&self) -> Arc<dyn ServiceFactory<dyn Extension>> {
        let extension: Arc<dyn Extension> = Arc::new(DeclaredExtension::from_decl(self));
        Arc::new(Singleton::new(extension))
    }
}

/// A resource answering with fixed bodies or echoing the request.
#[derive(Debug, Clone)]
pub struct DeclaredResource {
    path: String,
    methods: Vec<(Method, String, MethodDecl)>,
}

impl DeclaredResource {
    /// Methods with an unknown verb are dropped; configuration validation
    /// reports them before this point.
    #[must_use]
    pub fn from_decl(decl: &ProviderDecl) -> Self {
        let methods = decl
            .methods
            .iter()
            .enumerate()
            .filter_map(|(i, m)| Some((m.method()?, m.operation_name(i), m.clone())))
            .collect();
        Self {
            path: decl.path.clone().unwrap_or_else(|| "/".to_string()),
            methods,
        }
    }
}

impl Resource for DeclaredResource {
    fn descriptor(&self) -> ResourceDescriptor {
        self.methods
            .iter()
            .fold(ResourceDescriptor::at(&self.path), |descriptor, (method, operation, decl)| {
                descriptor.method(
                    MethodInfo::new(method.clone(), &decl.path, operation)
                        .produces("application/json"),
                )
            })
    }

    fn handle(&self, operation: &str, req: &HandlerRequest) -> HandlerResponse {
        let Some((_, _, decl)) = self.methods.iter().find(|(_, op, _)| op == operation) else {
            return HandlerResponse::error(404, "unknown operation");
        };
        match &decl.body {
            Some(body) => HandlerResponse::json(decl.status, body.clone()),
            None => HandlerResponse::json(
                decl.status,
                json!({
                    "application": req.application.as_ref(),
                    "resource": req.resource.as_ref(),
                    "operation": req.operation.as_ref(),
                    "method": req.method.to_string(),
                    "path": req.path,
                    "params": req.path_params_map(),
                    "query": req.query_params_map(),
                    "body": req.body,
                }),
            ),
        }
    }

    fn type_name(&self) -> &'static str {
        "declared.Resource"
    }
}

/// An extension that adds fixed response headers.
#[derive(Debug, Clone)]
pub struct DeclaredExtension {
    extension_types: Vec<String>,
    headers: Vec<(String, String)>,
}

impl DeclaredExtension {
    #[must_use]
    pub fn from_decl(decl: &ProviderDecl) -> Self {
        Self {
            extension_types: decl.extension_types.clone(),
            headers: decl
                .headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
        }
    }
}

impl Extension for DeclaredExtension {
    fn extension_types(&self) -> Vec<String> {
        self.extension_types.clone()
    }

    fn after(&self, _req: &HandlerRequest, res: &mut HandlerResponse, _latency: Duration) {
        for (name, value) in &self.headers {
            res.set_header(name, value.clone());
        }
    }

    fn type_name(&self) -> &'static str {
        "declared.Extension"
    }
}
