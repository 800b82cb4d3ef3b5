//! Turning a [`ServiceReference`] into a provider.
//!
//! Rules run in order: name, selector filters, kind-specific checks. The first
//! failing rule decides the failure reason. Name collisions are detected by
//! the registry before these functions run, because only the registry knows
//! which names are taken.

use super::{
    ApplicationKind, ApplicationProvider, ExtensionKind, ExtensionProvider, FailureReason,
    Provider, ProviderHeader, ProviderKind, ProviderStatus, ResourceKind, ResourceProvider,
    ServiceReference,
};
use crate::filter::{Filter, FilterError};
use crate::properties::{keys, Properties, PropertyValue};
use crate::service::MethodInfo;
use tracing::{debug, warn};

/// Why a provider was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("provider name must not be empty")]
    EmptyName,
    #[error("name `{0}` is reserved")]
    ReservedName(String),
    #[error("a {kind} named `{name}` is already registered")]
    DuplicateName { kind: ProviderKind, name: String },
    #[error("property `{key}` must be a filter string")]
    FilterNotText { key: &'static str },
    #[error("property `{key}` holds an invalid filter: {source}")]
    InvalidFilter {
        key: &'static str,
        #[source]
        source: FilterError,
    },
    #[error("application declares no base path")]
    MissingBasePath,
    #[error("resource declares no path")]
    MissingResourcePath,
    #[error("extension declares no extension types")]
    NoExtensionTypes,
    #[error("service object is not a {0}")]
    WrongServiceObject(ProviderKind),
    #[error("producer returned no service instance")]
    NotGettable,
}

impl ValidationError {
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            ValidationError::NotGettable => FailureReason::ServiceNotGettable,
            _ => FailureReason::ValidationFailed,
        }
    }
}

/// Resolve the provider name: `whiteboard.name`, or `<kind>-<service.id>`.
///
/// # Errors
///
/// Empty names and reserved names (leading `.`) are rejected; the only
/// reserved name accepted is `.default` for applications.
pub fn resolve_name(
    kind: ProviderKind,
    reference: &ServiceReference,
) -> Result<String, ValidationError> {
    match reference.properties.get(keys::NAME) {
        None => Ok(format!("{kind}-{}", reference.id)),
        Some(value) => {
            let name = value.to_string();
            let name = name.trim();
            if name.is_empty() {
                return Err(ValidationError::EmptyName);
            }
            if name.starts_with('.')
                && !(kind == ProviderKind::Application && name == keys::DEFAULT_APPLICATION)
            {
                return Err(ValidationError::ReservedName(name.to_string()));
            }
            Ok(name.to_string())
        }
    }
}

/// A provider that failed before or during validation.
#[must_use]
pub(crate) fn rejected<K: Default>(
    kind: ProviderKind,
    reference: &ServiceReference,
    name: String,
    error: &ValidationError,
) -> Provider<K> {
    warn!(
        kind = %kind,
        service_id = %reference.id,
        name = %name,
        reason = %error.reason(),
        error = %error,
        "Provider rejected"
    );
    Provider {
        header: ProviderHeader {
            id: reference.id,
            kind,
            name,
            properties: reference.properties.clone(),
            ranking: reference.ranking(),
            status: ProviderStatus::Failed(error.reason()),
            whiteboard_target: None,
            extension_select: Vec::new(),
        },
        kind: K::default(),
    }
}

fn build<K, F>(kind: ProviderKind, reference: &ServiceReference, name: String, f: F) -> Provider<K>
where
    K: Default,
    F: FnOnce(&Properties) -> Result<K, ValidationError>,
{
    let props = &reference.properties;
    let common = parse_filter(props, keys::WHITEBOARD_TARGET).and_then(|target| {
        parse_filter_list(props, keys::EXTENSION_SELECT).map(|required| (target, required))
    });
    let result = common.and_then(|(target, required)| f(props).map(|k| (target, required, k)));
    match result {
        Ok((whiteboard_target, extension_select, payload)) => {
            debug!(kind = %kind, service_id = %reference.id, name = %name, "Provider validated");
            Provider {
                header: ProviderHeader {
                    id: reference.id,
                    kind,
                    name,
                    properties: props.clone(),
                    ranking: reference.ranking(),
                    status: ProviderStatus::Ok,
                    whiteboard_target,
                    extension_select,
                },
                kind: payload,
            }
        }
        Err(e) => rejected(kind, reference, name, &e),
    }
}

/// Validate an application provider.
#[must_use]
pub fn validate_application(reference: &ServiceReference, name: String) -> ApplicationProvider {
    let is_default = name == keys::DEFAULT_APPLICATION;
    build(ProviderKind::Application, reference, name, |props| {
        let content_select = parse_filter(props, keys::CONTENT_SELECT)?;
        let base = match props.get(keys::APPLICATION_BASE) {
            Some(value) => value.to_string(),
            None if is_default => "/".to_string(),
            None => return Err(ValidationError::MissingBasePath),
        };
        let base_path = normalize_base_path(&base).ok_or(ValidationError::MissingBasePath)?;

        let factory = reference.object.application_factory().cloned();
        let is_legacy = match &factory {
            Some(factory) => {
                let instance = factory.get().ok_or(ValidationError::NotGettable)?;
                let legacy = !instance.singletons().is_empty();
                factory.release(instance);
                legacy
            }
            None => false,
        };

        Ok(ApplicationKind {
            base_path,
            is_default,
            is_legacy,
            content_select,
            factory,
        })
    })
}

/// Validate a resource provider.
#[must_use]
pub fn validate_resource(reference: &ServiceReference, name: String) -> ResourceProvider {
    build(ProviderKind::Resource, reference, name, |props| {
        let application_select = parse_filter(props, keys::APPLICATION_SELECT)?;
        let factory = reference
            .object
            .resource_factory()
            .cloned()
            .ok_or(ValidationError::WrongServiceObject(ProviderKind::Resource))?;
        let instance = factory.get().ok_or(ValidationError::NotGettable)?;
        let descriptor = instance.descriptor();
        let type_name = instance.type_name();
        factory.release(instance);

        let path = descriptor
            .path
            .as_deref()
            .map(normalize_resource_path)
            .ok_or(ValidationError::MissingResourcePath)?;
        let methods: Vec<MethodInfo> = descriptor
            .methods
            .into_iter()
            .map(|mut m| {
                m.path = normalize_resource_path(&m.path);
                m
            })
            .collect();
        let produces = media_types(methods.iter().flat_map(|m| m.produces.iter()));
        let consumes = media_types(methods.iter().flat_map(|m| m.consumes.iter()));

        Ok(ResourceKind {
            path,
            methods,
            object_class: object_class(props, type_name),
            produces,
            consumes,
            application_select,
            factory: Some(factory),
        })
    })
}

/// Validate an extension provider.
#[must_use]
pub fn validate_extension(reference: &ServiceReference, name: String) -> ExtensionProvider {
    build(ProviderKind::Extension, reference, name, |props| {
        let application_select = parse_filter(props, keys::APPLICATION_SELECT)?;
        let factory = reference
            .object
            .extension_factory()
            .cloned()
            .ok_or(ValidationError::WrongServiceObject(ProviderKind::Extension))?;
        let instance = factory.get().ok_or(ValidationError::NotGettable)?;
        let extension_types = instance.extension_types();
        let type_name = instance.type_name();
        factory.release(instance);

        if extension_types.is_empty() {
            return Err(ValidationError::NoExtensionTypes);
        }

        Ok(ExtensionKind {
            extension_types,
            object_class: object_class(props, type_name),
            application_select,
            factory: Some(factory),
        })
    })
}

fn parse_filter(props: &Properties, key: &'static str) -> Result<Option<Filter>, ValidationError> {
    match props.get(key) {
        None => Ok(None),
        Some(PropertyValue::String(text)) => Filter::parse(text)
            .map(Some)
            .map_err(|source| ValidationError::InvalidFilter { key, source }),
        Some(_) => Err(ValidationError::FilterNotText { key }),
    }
}

fn parse_filter_list(props: &Properties, key: &'static str) -> Result<Vec<Filter>, ValidationError> {
    match props.get(key) {
        None => Ok(Vec::new()),
        Some(PropertyValue::String(_) | PropertyValue::Strings(_)) => props
            .get_strings(key)
            .iter()
            .map(|text| {
                Filter::parse(text).map_err(|source| ValidationError::InvalidFilter { key, source })
            })
            .collect(),
        Some(_) => Err(ValidationError::FilterNotText { key }),
    }
}

fn object_class(props: &Properties, type_name: &str) -> Vec<String> {
    let declared = props.get_strings(keys::OBJECT_CLASS);
    if declared.is_empty() {
        vec![type_name.to_string()]
    } else {
        declared
    }
}

fn media_types<'a>(types: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = types.cloned().collect();
    out.sort();
    out.dedup();
    out
}

/// `/shop`, `shop/`, `/shop/*` → `/shop/*`; `/` → `/*`. `None` for blank input.
#[must_use]
pub(crate) fn normalize_base_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let prefix = trimmed
        .trim_end_matches('*')
        .trim_end_matches('/')
        .trim_start_matches('/');
    if prefix.is_empty() {
        Some("/*".to_string())
    } else {
        Some(format!("/{prefix}/*"))
    }
}

/// `hello`, `/hello/` → `/hello`; `/` and `""` → `""`.
#[must_use]
pub(crate) fn normalize_resource_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
