//! # Service Objects
//!
//! What producers actually register: the contracts a resource, an extension
//! or an application implements, and the factories the whiteboard obtains
//! instances from.
//!
//! A resource describes itself once through [`Resource::descriptor`]; the
//! whiteboard captures that descriptor at validation time and builds its route
//! tables from it, so nothing is introspected per request.
//!
//! Instances are always obtained through a [`ServiceFactory`] and handed back
//! with [`ServiceFactory::release`] when the whiteboard no longer needs them.
//! Prototype-scoped factories mint a fresh instance per binding, so every
//! instance they hand out is released explicitly.

use crate::handler::{HandlerRequest, HandlerResponse};
use http::Method;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One HTTP-invokable method of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    /// HTTP verb
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    /// Path below the resource path (`""` for the resource path itself)
    pub path: String,
    /// Operation name passed back to [`Resource::handle`]
    pub operation: String,
    /// Media types the method consumes
    pub consumes: Vec<String>,
    /// Media types the method produces
    pub produces: Vec<String>,
}

fn serialize_method<S: serde::Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(method.as_str())
}

impl MethodInfo {
    #[must_use]
    pub fn new(method: Method, path: &str, operation: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            operation: operation.to_string(),
            consumes: Vec::new(),
            produces: Vec::new(),
        }
    }

    #[must_use]
    pub fn produces(mut self, media_type: &str) -> Self {
        self.produces.push(media_type.to_string());
        self
    }

    #[must_use]
    pub fn consumes(mut self, media_type: &str) -> Self {
        self.consumes.push(media_type.to_string());
        self
    }
}

/// Typed description of a resource, captured once at validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Resource path below the application base. Required.
    pub path: Option<String>,
    /// Invokable methods
    pub methods: Vec<MethodInfo>,
}

impl ResourceDescriptor {
    #[must_use]
    pub fn at(path: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, info: MethodInfo) -> Self {
        self.methods.push(info);
        self
    }
}

/// A resource: serves the methods its descriptor declares.
pub trait Resource: Send + Sync {
    fn descriptor(&self) -> ResourceDescriptor;

    /// Handle one request for `operation`. Panics are caught by the runtime
    /// and turned into a 500.
    fn handle(&self, operation: &str, req: &HandlerRequest) -> HandlerResponse;

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// An extension: runs around every resource invocation of the applications it
/// is bound to.
pub trait Extension: Send + Sync {
    /// Extension contracts implemented, e.g. `request_filter`. Must not be empty.
    fn extension_types(&self) -> Vec<String>;

    /// Return `Some` to short-circuit the request.
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        None
    }

    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _latency: Duration) {}

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// An application service object.
///
/// Applications that bring their own resources are "legacy" applications:
/// their built-in resources are served alongside whatever whiteboard content
/// binds to them.
pub trait Application: Send + Sync {
    fn singletons(&self) -> Vec<Arc<dyn Resource>> {
        Vec::new()
    }
}

/// The empty application used when a producer registers only properties.
#[derive(Debug, Default)]
pub struct EmptyApplication;

impl Application for EmptyApplication {}

/// Instance scope of a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    Singleton,
    Prototype,
}

/// Source of service instances.
pub trait ServiceFactory<T: ?Sized>: Send + Sync {
    /// Obtain an instance; `None` when the producer cannot supply one.
    fn get(&self) -> Option<Arc<T>>;

    /// Hand an instance back.
    fn release(&self, _instance: Arc<T>) {}

    fn scope(&self) -> ServiceScope {
        ServiceScope::Singleton
    }
}

/// Factory that always returns the same instance.
pub struct Singleton<T: ?Sized>(Arc<T>);

impl<T: ?Sized> Singleton<T> {
    pub fn new(instance: Arc<T>) -> Self {
        Self(instance)
    }
}

impl<T: ?Sized + Send + Sync> ServiceFactory<T> for Singleton<T> {
    fn get(&self) -> Option<Arc<T>> {
        Some(Arc::clone(&self.0))
    }
}

/// Factory that creates a fresh instance for every `get`.
pub struct Prototype<T: ?Sized, F> {
    make: F,
    _marker: std::marker::PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized, F> Prototype<T, F>
where
    F: Fn() -> Option<Arc<T>> + Send + Sync,
{
    pub fn new(make: F) -> Self {
        Self {
            make,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: ?Sized + Send + Sync, F> ServiceFactory<T> for Prototype<T, F>
where
    F: Fn() -> Option<Arc<T>> + Send + Sync,
{
    fn get(&self) -> Option<Arc<T>> {
        (self.make)()
    }

    fn scope(&self) -> ServiceScope {
        ServiceScope::Prototype
    }
}

/// The service object carried by a lifecycle event.
#[derive(Clone)]
pub enum ServiceObject {
    Application(Arc<dyn ServiceFactory<dyn Application>>),
    Resource(Arc<dyn ServiceFactory<dyn Resource>>),
    Extension(Arc<dyn ServiceFactory<dyn Extension>>),
    /// Both a resource and an extension (one object registered under both markers).
    Content {
        resource: Arc<dyn ServiceFactory<dyn Resource>>,
        extension: Arc<dyn ServiceFactory<dyn Extension>>,
    },
    /// Properties only; valid for applications.
    None,
}

impl ServiceObject {
    /// Singleton resource object.
    pub fn resource<R: Resource + 'static>(resource: R) -> Self {
        let instance: Arc<dyn Resource> = Arc::new(resource);
        ServiceObject::Resource(Arc::new(Singleton::new(instance)))
    }

    /// Singleton extension object.
    pub fn extension<E: Extension + 'static>(extension: E) -> Self {
        let instance: Arc<dyn Extension> = Arc::new(extension);
        ServiceObject::Extension(Arc::new(Singleton::new(instance)))
    }

    /// Singleton application object.
    pub fn application<A: Application + 'static>(application: A) -> Self {
        let instance: Arc<dyn Application> = Arc::new(application);
        ServiceObject::Application(Arc::new(Singleton::new(instance)))
    }

    #[must_use]
    pub fn resource_factory(&self) -> Option<&Arc<dyn ServiceFactory<dyn Resource>>> {
        match self {
            ServiceObject::Resource(f) | ServiceObject::Content { resource: f, .. } => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn extension_factory(&self) -> Option<&Arc<dyn ServiceFactory<dyn Extension>>> {
        match self {
            ServiceObject::Extension(f) | ServiceObject::Content { extension: f, .. } => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn application_factory(&self) -> Option<&Arc<dyn ServiceFactory<dyn Application>>> {
        match self {
            ServiceObject::Application(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ServiceObject::Application(_) => "Application",
            ServiceObject::Resource(_) => "Resource",
            ServiceObject::Extension(_) => "Extension",
            ServiceObject::Content { .. } => "Content",
            ServiceObject::None => "None",
        };
        f.debug_tuple("ServiceObject").field(&kind).finish()
    }
}
