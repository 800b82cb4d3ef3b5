//! # Whiteboard Runtime
//!
//! The container side of a whiteboard. The dispatcher hands it fully resolved
//! applications (base path, bound resources with live instances, bound
//! extensions in chain order) and the runtime turns each into a routing table
//! plus an extension chain.
//!
//! The [`Runtime`] trait is the seam: the dispatcher only ever calls
//! `register`, `reload` and `unregister`. [`WhiteboardRuntime`] is the
//! in-process implementation that the HTTP transport serves from; tests plug
//! in recording runtimes.

mod container;
mod routes;

pub use container::{RuntimeSettings, WhiteboardRuntime};
pub use routes::{RouteTable, RouteTarget};

use crate::ids::{ContainerHandle, ServiceId};
use crate::properties::Properties;
use crate::provider::FailureReason;
use crate::service::{Extension, MethodInfo, Resource};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Errors raised by a runtime. The dispatcher maps them onto failure reasons.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("base path `{base_path}` is already served by `{holder}`")]
    BasePathInUse { base_path: String, holder: String },
    #[error("unknown container handle {0}")]
    UnknownHandle(ContainerHandle),
    #[error("reload of `{application}` timed out after {timeout:?} waiting for in-flight requests")]
    ReloadTimeout {
        application: String,
        timeout: Duration,
    },
    #[error("runtime refused `{application}`: {message}")]
    Refused { application: String, message: String },
}

impl RuntimeError {
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            RuntimeError::BasePathInUse { .. } => FailureReason::Shadowed,
            _ => FailureReason::Unknown,
        }
    }

    /// Worth retrying unchanged: the same call may succeed later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::ReloadTimeout { .. } | RuntimeError::Refused { .. }
        )
    }
}

/// A resource bound to an application, with the instance to serve it.
#[derive(Clone)]
pub struct BoundResource {
    pub name: String,
    pub service_id: ServiceId,
    /// Normalized resource path below the application base
    pub path: String,
    pub methods: Vec<MethodInfo>,
    pub instance: Arc<dyn Resource>,
}

/// An extension bound to an application, with the instance to run.
#[derive(Clone)]
pub struct BoundExtension {
    pub name: String,
    pub service_id: ServiceId,
    pub extension_types: Vec<String>,
    pub instance: Arc<dyn Extension>,
}

/// The container-native configuration of one application.
#[derive(Clone)]
pub struct ResolvedApplication {
    pub name: String,
    pub service_id: ServiceId,
    /// Normalized base path, `/shop/*`
    pub base_path: String,
    pub properties: Properties,
    pub resources: Vec<BoundResource>,
    /// In chain order (best ranking first)
    pub extensions: Vec<BoundExtension>,
}

/// Comparable summary of a resolved application, used to skip no-op reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub base_path: String,
    pub application: ServiceId,
    pub resources: Vec<(String, ServiceId)>,
    pub extensions: Vec<(String, ServiceId)>,
}

impl ResolvedApplication {
    /// Base path without the trailing wildcard.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.base_path.trim_end_matches('*').trim_end_matches('/')
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            base_path: self.base_path.clone(),
            application: self.service_id,
            resources: self
                .resources
                .iter()
                .map(|r| (r.name.clone(), r.service_id))
                .collect(),
            extensions: self
                .extensions
                .iter()
                .map(|e| (e.name.clone(), e.service_id))
                .collect(),
        }
    }
}

impl fmt::Debug for ResolvedApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedApplication")
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field(
                "resources",
                &self.resources.iter().map(|r| &r.name).collect::<Vec<_>>(),
            )
            .field(
                "extensions",
                &self.extensions.iter().map(|e| &e.name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// The container a dispatcher drives.
pub trait Runtime: Send + Sync {
    /// Start serving `application`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::BasePathInUse`] when another application owns the base path.
    fn register(&self, application: ResolvedApplication) -> Result<ContainerHandle, RuntimeError>;

    /// Swap the configuration of a registered application. On error the
    /// previous configuration keeps serving.
    ///
    /// # Errors
    ///
    /// Unknown handle, or the reload lock could not be taken in time.
    fn reload(
        &self,
        handle: ContainerHandle,
        application: ResolvedApplication,
    ) -> Result<(), RuntimeError>;

    /// Stop serving an application.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownHandle`] when the handle is not registered.
    fn unregister(&self, handle: ContainerHandle) -> Result<(), RuntimeError>;

    /// Externally reachable base URIs.
    fn urls(&self) -> Vec<String>;

    /// Properties describing this runtime, matched by `whiteboard.target`.
    fn properties(&self) -> Properties;
}
