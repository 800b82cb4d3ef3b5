//! # Registry
//!
//! The single owned store of every provider a whiteboard knows about: three
//! concurrent `name → provider` maps (applications, resources, extensions) and
//! a ledger of rejected providers keyed by identity.
//!
//! Readers (status projection, matching) take cheap snapshots of `Arc`s.
//! Mutations are expected to be serialized by the owner; the dispatcher holds
//! its reconciliation mutex around every call that changes the registry.
//!
//! ## Name ownership
//!
//! Names are unique per kind. A provider whose name is taken is rejected with
//! `VALIDATION_FAILED`, except for `.default`, where ranking decides: the
//! better-ranked application holds the name and the other is `SHADOWED`.
//! Whenever a name becomes free, rejected providers that wanted it are
//! re-validated, best ranking first.

use crate::ids::ServiceId;
use crate::properties::keys;
use crate::provider::{
    self, AnyProvider, ApplicationKind, ApplicationProvider, ExtensionKind, ExtensionProvider,
    FailureReason, Provider, ProviderHeader, ProviderKind, ResourceKind, ResourceProvider,
    ServiceReference, ValidationError,
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A provider that is not being served, plus what is needed to try it again.
#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub provider: AnyProvider,
    pub reference: ServiceReference,
}

/// Result of admitting a service into the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Admission {
    /// Stored under `name`
    Accepted { name: String },
    /// Stored in the failed ledger
    Rejected {
        name: String,
        reason: FailureReason,
    },
    /// Not processed: the whiteboard is closed
    #[default]
    Ignored,
}

impl Admission {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

/// Per-kind access used to share admission logic between the three maps.
trait Slot: Sized + Default + Clone + Send + Sync + 'static {
    const KIND: ProviderKind;

    fn map(registry: &Registry) -> &DashMap<String, Arc<Provider<Self>>>;

    fn validate(reference: &ServiceReference, name: String) -> Provider<Self>;

    fn wrap(provider: Arc<Provider<Self>>) -> AnyProvider;
}

impl Slot for ApplicationKind {
    const KIND: ProviderKind = ProviderKind::Application;

    fn map(registry: &Registry) -> &DashMap<String, Arc<Provider<Self>>> {
        &registry.applications
    }

    fn validate(reference: &ServiceReference, name: String) -> Provider<Self> {
        provider::validate_application(reference, name)
    }

    fn wrap(provider: Arc<Provider<Self>>) -> AnyProvider {
        AnyProvider::Application(provider)
    }
}

impl Slot for ResourceKind {
    const KIND: ProviderKind = ProviderKind::Resource;

    fn map(registry: &Registry) -> &DashMap<String, Arc<Provider<Self>>> {
        &registry.resources
    }

    fn validate(reference: &ServiceReference, name: String) -> Provider<Self> {
        provider::validate_resource(reference, name)
    }

    fn wrap(provider: Arc<Provider<Self>>) -> AnyProvider {
        AnyProvider::Resource(provider)
    }
}

impl Slot for ExtensionKind {
    const KIND: ProviderKind = ProviderKind::Extension;

    fn map(registry: &Registry) -> &DashMap<String, Arc<Provider<Self>>> {
        &registry.extensions
    }

    fn validate(reference: &ServiceReference, name: String) -> Provider<Self> {
        provider::validate_extension(reference, name)
    }

    fn wrap(provider: Arc<Provider<Self>>) -> AnyProvider {
        AnyProvider::Extension(provider)
    }
}

/// Name → provider store for one whiteboard.
#[derive(Default)]
pub struct Registry {
    applications: DashMap<String, Arc<ApplicationProvider>>,
    resources: DashMap<String, Arc<ResourceProvider>>,
    extensions: DashMap<String, Arc<ExtensionProvider>>,
    /// Active identities: (kind, id) → name
    identities: DashMap<(ProviderKind, ServiceId), String>,
    /// Rejected providers: (kind, id) → entry
    failed: DashMap<(ProviderKind, ServiceId), FailedEntry>,
    /// Active references, kept so a displaced provider can be parked in the ledger
    references: DashMap<(ProviderKind, ServiceId), ServiceReference>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `reference` as a provider of `kind`. A known identity is replaced.
    pub fn add(&self, kind: ProviderKind, reference: ServiceReference) -> Admission {
        match kind {
            ProviderKind::Application => self.admit::<ApplicationKind>(reference),
            ProviderKind::Resource => self.admit::<ResourceKind>(reference),
            ProviderKind::Extension => self.admit::<ExtensionKind>(reference),
        }
    }

    /// Replace the provider with the reference's identity.
    ///
    /// Equivalent to remove then add, except that the freed name is only
    /// offered to other providers after the replacement has been admitted.
    pub fn modify(&self, kind: ProviderKind, reference: ServiceReference) -> Admission {
        let old_name = self.take(kind, reference.id);
        let admission = self.add(kind, reference);
        if let Some(old_name) = old_name {
            self.retry_name(kind, &old_name);
        }
        if let Admission::Accepted { name } = &admission {
            if name == keys::DEFAULT_APPLICATION {
                self.retry_name(kind, name);
            }
        }
        admission
    }

    /// Forget the provider with `id`. Returns it if it was active or failed.
    pub fn remove(&self, kind: ProviderKind, id: ServiceId) -> Option<AnyProvider> {
        let removed = self.find(kind, id);
        if let Some(name) = self.take(kind, id) {
            self.retry_name(kind, &name);
        }
        removed
    }

    /// Active or failed provider with `id`.
    #[must_use]
    pub fn find(&self, kind: ProviderKind, id: ServiceId) -> Option<AnyProvider> {
        if let Some(name) = self.identities.get(&(kind, id)).map(|n| n.value().clone()) {
            return self.get(kind, &name);
        }
        self.failed
            .get(&(kind, id))
            .map(|entry| entry.provider.clone())
    }

    /// Active provider named `name`.
    #[must_use]
    pub fn get(&self, kind: ProviderKind, name: &str) -> Option<AnyProvider> {
        match kind {
            ProviderKind::Application => self
                .applications
                .get(name)
                .map(|p| AnyProvider::Application(Arc::clone(p.value()))),
            ProviderKind::Resource => self
                .resources
                .get(name)
                .map(|p| AnyProvider::Resource(Arc::clone(p.value()))),
            ProviderKind::Extension => self
                .extensions
                .get(name)
                .map(|p| AnyProvider::Extension(Arc::clone(p.value()))),
        }
    }

    #[must_use]
    pub fn application(&self, name: &str) -> Option<Arc<ApplicationProvider>> {
        self.applications.get(name).map(|p| Arc::clone(p.value()))
    }

    /// Active applications, ordered by name.
    #[must_use]
    pub fn applications(&self) -> Vec<Arc<ApplicationProvider>> {
        snapshot(&self.applications)
    }

    /// Active resources, ordered by name.
    #[must_use]
    pub fn resources(&self) -> Vec<Arc<ResourceProvider>> {
        snapshot(&self.resources)
    }

    /// Active extensions, ordered by name.
    #[must_use]
    pub fn extensions(&self) -> Vec<Arc<ExtensionProvider>> {
        snapshot(&self.extensions)
    }

    /// Failed providers, ordered by kind then identity.
    #[must_use]
    pub fn failed(&self) -> Vec<AnyProvider> {
        let mut entries: Vec<(ProviderKind, ServiceId, AnyProvider)> = self
            .failed
            .iter()
            .map(|e| (e.key().0, e.key().1, e.value().provider.clone()))
            .collect();
        entries.sort_by_key(|(kind, id, _)| (*kind, *id));
        entries.into_iter().map(|(_, _, p)| p).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
            && self.resources.is_empty()
            && self.extensions.is_empty()
            && self.failed.is_empty()
    }

    fn admit<K: Slot>(&self, reference: ServiceReference) -> Admission {
        let kind = K::KIND;
        let id = reference.id;
        if self.identities.contains_key(&(kind, id)) || self.failed.contains_key(&(kind, id)) {
            debug!(kind = %kind, service_id = %id, "Known identity re-added, replacing");
            self.take(kind, id);
        }

        let name = match provider::resolve_name(kind, &reference) {
            Ok(name) => name,
            Err(e) => {
                let name = format!("{kind}-{id}");
                return self.reject::<K>(reference, name, &e);
            }
        };

        let holder = K::map(self).get(&name).map(|p| p.header.clone());
        if let Some(holder) = holder {
            if kind == ProviderKind::Application && name == keys::DEFAULT_APPLICATION {
                // Validate first: an invalid challenger must not evict the holder.
                let provider = K::validate(&reference, name.clone());
                if !provider.is_ok() {
                    return self.park_validated(reference, provider);
                }
                if !provider.header.outranks(&holder) {
                    return self.shadow(reference, provider, holder.id);
                }
                self.displace::<K>(&holder, id);
                return self.insert(reference, provider);
            }
            let error = ValidationError::DuplicateName {
                kind,
                name: name.clone(),
            };
            return self.reject::<K>(reference, name, &error);
        }

        let provider = K::validate(&reference, name);
        if provider.is_ok() {
            self.insert(reference, provider)
        } else {
            self.park_validated(reference, provider)
        }
    }

    fn insert<K: Slot>(&self, reference: ServiceReference, provider: Provider<K>) -> Admission {
        let kind = K::KIND;
        let name = provider.header.name.clone();
        info!(
            kind = %kind,
            service_id = %reference.id,
            name = %name,
            ranking = provider.header.ranking,
            "Provider registered"
        );
        self.identities.insert((kind, reference.id), name.clone());
        self.references.insert((kind, reference.id), reference);
        K::map(self).insert(name.clone(), Arc::new(provider));
        Admission::Accepted { name }
    }

    fn reject<K: Slot>(
        &self,
        reference: ServiceReference,
        name: String,
        error: &ValidationError,
    ) -> Admission {
        let provider: Provider<K> = provider::rejected(K::KIND, &reference, name, error);
        self.park_validated(reference, provider)
    }

    fn shadow<K: Slot>(
        &self,
        reference: ServiceReference,
        validated: Provider<K>,
        holder: ServiceId,
    ) -> Admission {
        warn!(
            kind = %K::KIND,
            service_id = %reference.id,
            name = %validated.header.name,
            holder = %holder,
            "Provider shadowed by a better ranked provider"
        );
        self.park_validated(reference, validated.failed(FailureReason::Shadowed))
    }

    fn displace<K: Slot>(&self, holder: &ProviderHeader, challenger: ServiceId) {
        let kind = K::KIND;
        let Some(reference) = self
            .references
            .get(&(kind, holder.id))
            .map(|r| r.value().clone())
        else {
            return;
        };
        let Some(provider) = self.find(kind, holder.id) else {
            return;
        };
        self.take(kind, holder.id);
        warn!(
            kind = %kind,
            service_id = %holder.id,
            name = %holder.name,
            challenger = %challenger,
            "Provider displaced by a better ranked provider"
        );
        self.park(
            kind,
            reference,
            failed_copy(&provider, FailureReason::Shadowed),
        );
    }

    fn park_validated<K: Slot>(&self, reference: ServiceReference, provider: Provider<K>) -> Admission {
        let name = provider.header.name.clone();
        let reason = match provider.header.status {
            provider::ProviderStatus::Failed(reason) => reason,
            provider::ProviderStatus::Ok => FailureReason::Unknown,
        };
        self.park(K::KIND, reference, K::wrap(Arc::new(provider)));
        Admission::Rejected { name, reason }
    }

    fn park(&self, kind: ProviderKind, reference: ServiceReference, provider: AnyProvider) {
        self.failed
            .insert((kind, reference.id), FailedEntry { provider, reference });
    }

    /// Drop `id` from the active maps or the ledger. Returns the freed name if
    /// it was active.
    fn take(&self, kind: ProviderKind, id: ServiceId) -> Option<String> {
        self.failed.remove(&(kind, id));
        self.references.remove(&(kind, id));
        let (_, name) = self.identities.remove(&(kind, id))?;
        match kind {
            ProviderKind::Application => {
                self.applications.remove(&name);
            }
            ProviderKind::Resource => {
                self.resources.remove(&name);
            }
            ProviderKind::Extension => {
                self.extensions.remove(&name);
            }
        }
        debug!(kind = %kind, service_id = %id, name = %name, "Provider removed");
        Some(name)
    }

    /// Offer `name` to rejected providers that wanted it, best ranking first.
    fn retry_name(&self, kind: ProviderKind, name: &str) {
        let mut candidates: Vec<ServiceReference> = self
            .failed
            .iter()
            .filter(|e| e.key().0 == kind && e.value().provider.header().name == name)
            .map(|e| e.value().reference.clone())
            .collect();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.precedence()));

        for reference in candidates {
            if let Some(holder) = self.get(kind, name) {
                let contest = kind == ProviderKind::Application && name == keys::DEFAULT_APPLICATION;
                if !contest || reference.precedence() <= holder.header().precedence() {
                    continue;
                }
            }
            debug!(kind = %kind, service_id = %reference.id, name = %name, "Retrying rejected provider");
            self.failed.remove(&(kind, reference.id));
            self.add(kind, reference);
        }
    }
}

fn failed_copy(provider: &AnyProvider, reason: FailureReason) -> AnyProvider {
    match provider {
        AnyProvider::Application(p) => AnyProvider::Application(Arc::new(p.failed(reason))),
        AnyProvider::Resource(p) => AnyProvider::Resource(Arc::new(p.failed(reason))),
        AnyProvider::Extension(p) => AnyProvider::Extension(Arc::new(p.failed(reason))),
    }
}

fn snapshot<K>(map: &DashMap<String, Arc<Provider<K>>>) -> Vec<Arc<Provider<K>>> {
    let mut out: Vec<(String, Arc<Provider<K>>)> = map
        .iter()
        .map(|e| (e.key().clone(), Arc::clone(e.value())))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out.into_iter().map(|(_, p)| p).collect()
}
