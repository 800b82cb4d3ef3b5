//! Service instances held on behalf of deployed applications.
//!
//! One instance is obtained per (application, content) binding and kept for
//! as long as the binding is deployed. Reassembling an application reuses the
//! instances it already holds, so an unchanged binding never churns its
//! instance; everything else is released through the factory that produced it.

use super::matching::Binding;
use crate::ids::ServiceId;
use crate::provider::{normalize_resource_path, ApplicationProvider, FailureReason, ProviderKind};
use crate::runtime::{BoundExtension, BoundResource, ResolvedApplication};
use crate::service::{Application, Extension, Resource, ServiceFactory};
use std::sync::Arc;
use tracing::{debug, warn};

/// One instance and the factory it must be handed back to.
pub(super) struct Held<T: ?Sized> {
    name: String,
    service_id: ServiceId,
    factory: Arc<dyn ServiceFactory<T>>,
    instance: Arc<T>,
    /// Obtained during the current assembly rather than reused
    fresh: bool,
}

impl<T: ?Sized> Held<T> {
    fn obtain(
        name: &str,
        service_id: ServiceId,
        factory: &Arc<dyn ServiceFactory<T>>,
    ) -> Option<Self> {
        let instance = factory.get()?;
        Some(Self {
            name: name.to_string(),
            service_id,
            factory: Arc::clone(factory),
            instance,
            fresh: true,
        })
    }

    fn release(self) {
        debug!(name = %self.name, service_id = %self.service_id, "Releasing service instance");
        self.factory.release(self.instance);
    }

    /// Same binding, produced by the same factory.
    fn is(&self, name: &str, service_id: ServiceId, factory: &Arc<dyn ServiceFactory<T>>) -> bool {
        self.name == name
            && self.service_id == service_id
            && std::ptr::addr_eq(Arc::as_ptr(&self.factory), Arc::as_ptr(factory))
    }
}

/// Instances held by one deployment.
#[derive(Default)]
pub(super) struct HeldInstances {
    application: Option<Held<dyn Application>>,
    resources: Vec<Held<dyn Resource>>,
    extensions: Vec<Held<dyn Extension>>,
}

impl HeldInstances {
    pub(super) fn release_all(self) {
        if let Some(app) = self.application {
            app.release();
        }
        self.resources.into_iter().for_each(Held::release);
        self.extensions.into_iter().for_each(Held::release);
    }

    /// Merge `other` into `self`, e.g. handing reused instances back.
    pub(super) fn absorb(&mut self, other: HeldInstances) {
        if self.application.is_none() {
            self.application = other.application;
        } else if let Some(app) = other.application {
            app.release();
        }
        self.resources.extend(other.resources);
        self.extensions.extend(other.extensions);
    }

    /// Undo a failed assembly: reused instances go back to `previous`, fresh
    /// ones are released.
    pub(super) fn restore_into(self, previous: &mut HeldInstances) {
        let mut reused = HeldInstances::default();
        match self.application {
            Some(app) if app.fresh => app.release(),
            other => reused.application = other,
        }
        for r in self.resources {
            if r.fresh {
                r.release();
            } else {
                reused.resources.push(r);
            }
        }
        for e in self.extensions {
            if e.fresh {
                e.release();
            } else {
                reused.extensions.push(e);
            }
        }
        previous.absorb(reused);
    }

    /// Identities of the content these instances serve.
    pub(super) fn content_ids(&self) -> impl Iterator<Item = (ProviderKind, ServiceId)> + '_ {
        self.resources
            .iter()
            .map(|r| (ProviderKind::Resource, r.service_id))
            .chain(
                self.extensions
                    .iter()
                    .map(|e| (ProviderKind::Extension, e.service_id)),
            )
    }

    fn take_resource(
        &mut self,
        name: &str,
        id: ServiceId,
        factory: &Arc<dyn ServiceFactory<dyn Resource>>,
    ) -> Option<Held<dyn Resource>> {
        let pos = self.resources.iter().position(|h| h.is(name, id, factory))?;
        let mut held = self.resources.swap_remove(pos);
        held.fresh = false;
        Some(held)
    }

    fn take_extension(
        &mut self,
        name: &str,
        id: ServiceId,
        factory: &Arc<dyn ServiceFactory<dyn Extension>>,
    ) -> Option<Held<dyn Extension>> {
        let pos = self.extensions.iter().position(|h| h.is(name, id, factory))?;
        let mut held = self.extensions.swap_remove(pos);
        held.fresh = false;
        Some(held)
    }

    fn take_application(
        &mut self,
        name: &str,
        id: ServiceId,
        factory: &Arc<dyn ServiceFactory<dyn Application>>,
    ) -> Option<Held<dyn Application>> {
        match self.application.take() {
            Some(mut held) if held.is(name, id, factory) => {
                held.fresh = false;
                Some(held)
            }
            other => {
                self.application = other;
                None
            }
        }
    }
}

/// A resolved application plus the instances backing it.
pub(super) struct Assembled {
    pub resolved: ResolvedApplication,
    pub held: HeldInstances,
    /// Bound content whose producer returned no instance
    pub not_gettable: Vec<(ProviderKind, ServiceId)>,
}

/// Build the configuration `application` should be serving, reusing what
/// `previous` already holds.
///
/// # Errors
///
/// `SERVICE_NOT_GETTABLE` when a legacy application object cannot be obtained.
pub(super) fn assemble(
    application: &ApplicationProvider,
    binding: &Binding,
    previous: &mut HeldInstances,
) -> Result<Assembled, FailureReason> {
    let app_name = application.name();
    let mut held = HeldInstances::default();
    let mut resolved = ResolvedApplication {
        name: app_name.to_string(),
        service_id: application.id(),
        base_path: application.base_path().to_string(),
        properties: application.properties().clone(),
        resources: Vec::with_capacity(binding.resources.len()),
        extensions: Vec::with_capacity(binding.extensions.len()),
    };
    let mut not_gettable = Vec::new();

    if application.kind.is_legacy {
        if let Some(factory) = &application.kind.factory {
            let app = match previous.take_application(app_name, application.id(), factory) {
                Some(app) => app,
                None => Held::obtain(app_name, application.id(), factory)
                    .ok_or(FailureReason::ServiceNotGettable)?,
            };
            for (index, singleton) in app.instance.singletons().into_iter().enumerate() {
                let descriptor = singleton.descriptor();
                let Some(path) = descriptor.path.as_deref() else {
                    warn!(
                        application = %app_name,
                        singleton = singleton.type_name(),
                        "Application singleton declares no path, skipped"
                    );
                    continue;
                };
                resolved.resources.push(BoundResource {
                    name: format!("{app_name}.singleton-{index}"),
                    service_id: application.id(),
                    path: normalize_resource_path(path),
                    methods: descriptor
                        .methods
                        .into_iter()
                        .map(|mut m| {
                            m.path = normalize_resource_path(&m.path);
                            m
                        })
                        .collect(),
                    instance: singleton,
                });
            }
            held.application = Some(app);
        }
    }

    for resource in &binding.resources {
        let Some(factory) = &resource.kind.factory else {
            continue;
        };
        let item = previous
            .take_resource(resource.name(), resource.id(), factory)
            .or_else(|| Held::obtain(resource.name(), resource.id(), factory));
        let Some(item) = item else {
            warn!(
                application = %app_name,
                resource = %resource.name(),
                service_id = %resource.id(),
                "Resource instance not gettable"
            );
            not_gettable.push((ProviderKind::Resource, resource.id()));
            continue;
        };
        resolved.resources.push(BoundResource {
            name: resource.name().to_string(),
            service_id: resource.id(),
            path: resource.kind.path.clone(),
            methods: resource.kind.methods.clone(),
            instance: Arc::clone(&item.instance),
        });
        held.resources.push(item);
    }

    for extension in &binding.extensions {
        let Some(factory) = &extension.kind.factory else {
            continue;
        };
        let item = previous
            .take_extension(extension.name(), extension.id(), factory)
            .or_else(|| Held::obtain(extension.name(), extension.id(), factory));
        let Some(item) = item else {
            warn!(
                application = %app_name,
                extension = %extension.name(),
                service_id = %extension.id(),
                "Extension instance not gettable"
            );
            not_gettable.push((ProviderKind::Extension, extension.id()));
            continue;
        };
        resolved.extensions.push(BoundExtension {
            name: extension.name().to_string(),
            service_id: extension.id(),
            extension_types: extension.kind.extension_types.clone(),
            instance: Arc::clone(&item.instance),
        });
        held.extensions.push(item);
    }

    Ok(Assembled {
        resolved,
        held,
        not_gettable,
    })
}
