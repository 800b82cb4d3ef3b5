//! Which content binds to which application.
//!
//! A resource or extension `C` attaches to an application `A` when:
//!
//! - `C` declares `whiteboard.application.select`: the selector accepts `A`'s
//!   properties and `A`'s content selector (if any) accepts `C`.
//! - otherwise: `A` is the default application, or `A` has an explicit
//!   content selector that accepts `C`.
//!
//! Both sides must be valid and target this whiteboard's runtime.
//!
//! Required extensions (`whiteboard.extension.select`) are resolved per
//! application to a fixpoint: an extension whose own requirements are not met
//! by the other extensions bound to the same application drops out, which may
//! in turn invalidate others.

use crate::filter::Filter;
use crate::ids::ServiceId;
use crate::properties::Properties;
use crate::provider::{
    ApplicationProvider, Content, ExtensionProvider, ProviderHeader, ProviderKind, ResourceProvider,
};
use std::sync::Arc;

/// Whether `content` attaches to `application`.
#[must_use]
pub fn attaches<C: Content>(content: &C, application: &ApplicationProvider) -> bool {
    if !content.header().status.is_ok() || !application.is_ok() {
        return false;
    }
    let props = &content.header().properties;
    match content.application_select() {
        Some(select) => select.matches(application.properties()) && application.accepts(props),
        None => application.is_default() || application.explicitly_selects(props),
    }
}

/// Every filter in `required` matches at least one of `available`.
#[must_use]
pub fn requirements_met<'a, I>(required: &[Filter], available: I) -> bool
where
    I: IntoIterator<Item = &'a Properties> + Clone,
{
    required
        .iter()
        .all(|filter| available.clone().into_iter().any(|p| filter.matches(p)))
}

/// Best ranking first, then lower service id.
pub fn rank_order<T, F>(items: &mut [Arc<T>], header: F)
where
    F: Fn(&T) -> &ProviderHeader,
{
    items.sort_by_key(|item| std::cmp::Reverse(header(item.as_ref()).precedence()));
}

/// Content bound to one application.
#[derive(Debug, Default)]
pub struct Binding {
    /// Resources in rank order
    pub resources: Vec<Arc<ResourceProvider>>,
    /// Extensions in chain order
    pub extensions: Vec<Arc<ExtensionProvider>>,
    /// Attached content dropped because its required extensions are missing
    pub unsatisfied: Vec<(ProviderKind, ServiceId)>,
    /// The application's own requirements are met
    pub application_satisfied: bool,
}

/// Resolve what binds to `application`.
///
/// `resources` and `extensions` must already be filtered to valid providers
/// targeting this runtime, and be in rank order.
#[must_use]
pub fn bind(
    application: &ApplicationProvider,
    resources: &[Arc<ResourceProvider>],
    extensions: &[Arc<ExtensionProvider>],
) -> Binding {
    let mut binding = Binding::default();

    let mut active: Vec<Arc<ExtensionProvider>> = extensions
        .iter()
        .filter(|e| attaches(e.as_ref(), application))
        .map(Arc::clone)
        .collect();
    loop {
        let (kept, dropped): (Vec<_>, Vec<_>) = active.iter().map(Arc::clone).partition(|e| {
            requirements_met(
                &e.header.extension_select,
                active.iter().map(|a| &a.header.properties),
            )
        });
        if dropped.is_empty() {
            break;
        }
        binding.unsatisfied
            .extend(dropped.iter().map(|e| (ProviderKind::Extension, e.id())));
        active = kept;
    }

    let available = || active.iter().map(|e| &e.header.properties);
    binding.application_satisfied =
        requirements_met(&application.header.extension_select, available());

    for resource in resources {
        if !attaches(resource.as_ref(), application) {
            continue;
        }
        if requirements_met(&resource.header.extension_select, available()) {
            binding.resources.push(Arc::clone(resource));
        } else {
            binding.unsatisfied.push((ProviderKind::Resource, resource.id()));
        }
    }
    binding.extensions = active;
    binding
}
