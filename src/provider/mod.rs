//! # Provider Model
//!
//! A provider wraps one registered service object together with its property
//! map. Providers are built once by [`validate`] and are immutable afterwards:
//! a MODIFY event produces a brand new provider instead of mutating the old
//! one, and a provider that failed validation stays failed for its whole life.
//!
//! All three kinds share a [`ProviderHeader`] (identity, name, ranking, status
//! and the selectors common to every kind) and add their own typed payload:
//!
//! | kind | payload |
//! |---|---|
//! | application | normalized base path, default/legacy flags, content selector |
//! | resource | resource path, method infos, media types, application selector |
//! | extension | extension types, application selector |

mod validate;

pub(crate) use validate::{normalize_base_path, normalize_resource_path, rejected};
pub use validate::{
    resolve_name, validate_application, validate_extension, validate_resource, ValidationError,
};

use crate::filter::Filter;
use crate::ids::ServiceId;
use crate::properties::{keys, Properties};
use crate::service::{
    Application, Extension, MethodInfo, Resource, ServiceFactory, ServiceObject,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Why a provider is not being served. Numeric codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// The runtime refused or failed to register the application
    Unknown,
    /// Lost a ranking contest for `.default`, or the base path is already served
    Shadowed,
    /// The producer returned no instance
    ServiceNotGettable,
    /// Invalid name, selector or kind-specific data
    ValidationFailed,
    /// A required extension is not bound
    RequiredExtensionsUnavailable,
}

impl FailureReason {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            FailureReason::Unknown => 0,
            FailureReason::Shadowed => 1,
            FailureReason::ServiceNotGettable => 2,
            FailureReason::ValidationFailed => 3,
            FailureReason::RequiredExtensionsUnavailable => 4,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Unknown => "UNKNOWN",
            FailureReason::Shadowed => "SHADOWED",
            FailureReason::ServiceNotGettable => "SERVICE_NOT_GETTABLE",
            FailureReason::ValidationFailed => "VALIDATION_FAILED",
            FailureReason::RequiredExtensionsUnavailable => "REQUIRED_EXTENSIONS_UNAVAILABLE",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Ok,
    Failed(FailureReason),
}

impl ProviderStatus {
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, ProviderStatus::Ok)
    }
}

/// The three provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Application,
    Resource,
    Extension,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Application => "application",
            ProviderKind::Resource => "resource",
            ProviderKind::Extension => "extension",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered service as delivered by a lifecycle feed.
#[derive(Debug, Clone)]
pub struct ServiceReference {
    pub id: ServiceId,
    pub properties: Properties,
    pub object: ServiceObject,
}

impl ServiceReference {
    /// Build a reference; `service.id` is written into the properties.
    #[must_use]
    pub fn new(id: impl Into<ServiceId>, properties: Properties, object: ServiceObject) -> Self {
        let id = id.into();
        let properties = properties.with(keys::SERVICE_ID, id.0);
        Self {
            id,
            properties,
            object,
        }
    }

    #[must_use]
    pub fn ranking(&self) -> i64 {
        self.properties.ranking()
    }

    /// Competition key before validation; see [`ProviderHeader::precedence`].
    #[must_use]
    pub fn precedence(&self) -> Precedence {
        precedence(self.ranking(), self.id)
    }

    /// Provider kinds this service registers as. A service may be both a
    /// resource and an extension.
    #[must_use]
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds = Vec::with_capacity(1);
        if self.properties.contains_key(keys::APPLICATION_BASE)
            || matches!(self.object, ServiceObject::Application(_))
        {
            kinds.push(ProviderKind::Application);
        }
        if self.properties.is_true(keys::RESOURCE) {
            kinds.push(ProviderKind::Resource);
        }
        if self.properties.is_true(keys::EXTENSION) {
            kinds.push(ProviderKind::Extension);
        }
        kinds
    }
}

/// Ranking, then reversed service id.
pub type Precedence = (i64, std::cmp::Reverse<ServiceId>);

fn precedence(ranking: i64, id: ServiceId) -> Precedence {
    (ranking, std::cmp::Reverse(id))
}

/// Data shared by every provider kind.
#[derive(Debug, Clone)]
pub struct ProviderHeader {
    pub id: ServiceId,
    pub kind: ProviderKind,
    pub name: String,
    pub properties: Properties,
    pub ranking: i64,
    pub status: ProviderStatus,
    /// `whiteboard.target`: which runtime this provider wants
    pub whiteboard_target: Option<Filter>,
    /// `whiteboard.extension.select`: every filter must be satisfied
    pub extension_select: Vec<Filter>,
}

impl ProviderHeader {
    /// Whether this provider should be served by a runtime with `runtime` properties.
    #[must_use]
    pub fn targets_runtime(&self, runtime: &Properties) -> bool {
        self.status.is_ok()
            && self
                .whiteboard_target
                .as_ref()
                .is_none_or(|f| f.matches(runtime))
    }

    /// Sort key for competition order: larger wins.
    #[must_use]
    pub fn precedence(&self) -> Precedence {
        precedence(self.ranking, self.id)
    }

    /// Higher ranking first, then lower service id.
    #[must_use]
    pub fn outranks(&self, other: &ProviderHeader) -> bool {
        self.precedence() > other.precedence()
    }
}

/// A validated provider of kind `K`.
#[derive(Debug)]
pub struct Provider<K> {
    pub header: ProviderHeader,
    pub kind: K,
}

impl<K> Provider<K> {
    #[must_use]
    pub fn id(&self) -> ServiceId {
        self.header.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.header.name
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.header.properties
    }

    #[must_use]
    pub fn status(&self) -> ProviderStatus {
        self.header.status
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.header.status.is_ok()
    }

    /// Copy of this provider marked failed with `reason`.
    #[must_use]
    pub fn failed(&self, reason: FailureReason) -> Provider<K>
    where
        K: Clone,
    {
        let mut header = self.header.clone();
        header.status = ProviderStatus::Failed(reason);
        Provider {
            header,
            kind: self.kind.clone(),
        }
    }
}

/// Application payload.
#[derive(Clone, Default)]
pub struct ApplicationKind {
    /// Normalized base path, e.g. `/shop/*` or `/*`
    pub base_path: String,
    pub is_default: bool,
    /// The application object supplies resources of its own
    pub is_legacy: bool,
    /// `whiteboard.content.select`
    pub content_select: Option<Filter>,
    pub factory: Option<Arc<dyn ServiceFactory<dyn Application>>>,
}

impl ApplicationKind {
    /// Base path without the trailing wildcard: `/shop` for `/shop/*`, `""` for `/*`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.base_path.trim_end_matches('*').trim_end_matches('/')
    }
}

impl fmt::Debug for ApplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationKind")
            .field("base_path", &self.base_path)
            .field("is_default", &self.is_default)
            .field("is_legacy", &self.is_legacy)
            .field("content_select", &self.content_select)
            .finish_non_exhaustive()
    }
}

/// Resource payload.
#[derive(Clone, Default)]
pub struct ResourceKind {
    /// Normalized resource path, e.g. `/hello` (`""` for the application root)
    pub path: String,
    pub methods: Vec<MethodInfo>,
    pub object_class: Vec<String>,
    pub produces: Vec<String>,
    pub consumes: Vec<String>,
    /// `whiteboard.application.select`
    pub application_select: Option<Filter>,
    pub factory: Option<Arc<dyn ServiceFactory<dyn Resource>>>,
}

impl fmt::Debug for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceKind")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("object_class", &self.object_class)
            .field("application_select", &self.application_select)
            .finish_non_exhaustive()
    }
}

/// Extension payload.
#[derive(Clone, Default)]
pub struct ExtensionKind {
    pub extension_types: Vec<String>,
    pub object_class: Vec<String>,
    /// `whiteboard.application.select`
    pub application_select: Option<Filter>,
    pub factory: Option<Arc<dyn ServiceFactory<dyn Extension>>>,
}

impl fmt::Debug for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionKind")
            .field("extension_types", &self.extension_types)
            .field("object_class", &self.object_class)
            .field("application_select", &self.application_select)
            .finish_non_exhaustive()
    }
}

pub type ApplicationProvider = Provider<ApplicationKind>;
pub type ResourceProvider = Provider<ResourceKind>;
pub type ExtensionProvider = Provider<ExtensionKind>;

impl ApplicationProvider {
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.kind.base_path
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.kind.is_default
    }

    /// Whether content with `content` properties is accepted by this
    /// application's content selector. Absent selector accepts everything.
    #[must_use]
    pub fn accepts(&self, content: &Properties) -> bool {
        self.is_ok()
            && self
                .kind
                .content_select
                .as_ref()
                .is_none_or(|f| f.matches(content))
    }

    /// True when the application explicitly selects `content`.
    #[must_use]
    pub fn explicitly_selects(&self, content: &Properties) -> bool {
        self.is_ok()
            && self
                .kind
                .content_select
                .as_ref()
                .is_some_and(|f| f.matches(content))
    }
}

/// Behaviour shared by resources and extensions when binding to applications.
pub trait Content {
    fn header(&self) -> &ProviderHeader;

    fn application_select(&self) -> Option<&Filter>;
}

impl Content for ResourceProvider {
    fn header(&self) -> &ProviderHeader {
        &self.header
    }

    fn application_select(&self) -> Option<&Filter> {
        self.kind.application_select.as_ref()
    }
}

impl Content for ExtensionProvider {
    fn header(&self) -> &ProviderHeader {
        &self.header
    }

    fn application_select(&self) -> Option<&Filter> {
        self.kind.application_select.as_ref()
    }
}

/// Any provider, for code that treats the three kinds uniformly.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    Application(Arc<ApplicationProvider>),
    Resource(Arc<ResourceProvider>),
    Extension(Arc<ExtensionProvider>),
}

impl AnyProvider {
    #[must_use]
    pub fn header(&self) -> &ProviderHeader {
        match self {
            AnyProvider::Application(p) => &p.header,
            AnyProvider::Resource(p) => &p.header,
            AnyProvider::Extension(p) => &p.header,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.header().kind
    }
}
