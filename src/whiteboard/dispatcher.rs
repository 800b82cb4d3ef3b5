use super::instances::{assemble, HeldInstances};
use super::matching::{bind, rank_order, Binding};
use super::ApplicationState;
use crate::collector::{ClassifiedBatch, EventKind, EventSink, LifecycleEvent};
use crate::ids::{ContainerHandle, ServiceId};
use crate::properties::{keys, Properties};
use crate::provider::{
    AnyProvider, ApplicationProvider, ExtensionProvider, FailureReason, ProviderKind,
    ProviderStatus, ResourceProvider, ServiceReference,
};
use crate::registry::{Admission, Registry};
use crate::runtime::{Fingerprint, ResolvedApplication, Runtime, RuntimeError};
use crate::service::{EmptyApplication, ServiceObject};
use crate::status::{self, DeployedView, FailedView, RuntimeDto, StatusSnapshot};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const ALL_KINDS: [ProviderKind; 3] = [
    ProviderKind::Application,
    ProviderKind::Resource,
    ProviderKind::Extension,
];

/// The providers a deployment was built from. Identity of the `Arc`s tells
/// whether a provider was replaced since.
#[derive(Clone)]
struct Revision {
    application: Arc<ApplicationProvider>,
    resources: Vec<Arc<ResourceProvider>>,
    extensions: Vec<Arc<ExtensionProvider>>,
    fingerprint: Fingerprint,
}

impl Revision {
    fn new(application: &Arc<ApplicationProvider>, binding: &Binding, resolved: &ResolvedApplication) -> Self {
        Self {
            application: Arc::clone(application),
            resources: binding.resources.clone(),
            extensions: binding.extensions.clone(),
            fingerprint: resolved.fingerprint(),
        }
    }

    fn same_as(&self, other: &Revision) -> bool {
        Arc::ptr_eq(&self.application, &other.application)
            && same_arcs(&self.resources, &other.resources)
            && same_arcs(&self.extensions, &other.extensions)
            && self.fingerprint == other.fingerprint
    }
}

fn same_arcs<T>(a: &[Arc<T>], b: &[Arc<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}

/// An application the runtime is serving.
struct Deployment {
    handle: ContainerHandle,
    revision: Revision,
    resolved: ResolvedApplication,
    held: HeldInstances,
}

/// Everything the reconciliation mutex guards.
#[derive(Default)]
struct DispatchState {
    deployments: BTreeMap<String, Deployment>,
    states: BTreeMap<String, ApplicationState>,
    /// Valid applications that are not served, by service id
    app_failures: HashMap<ServiceId, FailureReason>,
    /// Valid content that attaches somewhere but is bound nowhere
    content_failures: HashMap<(ProviderKind, ServiceId), FailureReason>,
    /// Configurations the runtime refused for good. Implicit passes skip
    /// them until they change; `batch_dispatch` retries them.
    refused: HashMap<ServiceId, (Revision, FailureReason)>,
}

/// Drives one [`Runtime`] from the providers in its [`Registry`].
///
/// All entry points are safe to call from any thread. Mutations and
/// reconciliation are serialized by one mutex; the runtime is only ever called
/// with that mutex held.
pub struct WhiteboardDispatcher {
    registry: Registry,
    runtime: Arc<dyn Runtime>,
    runtime_properties: ArcSwap<Properties>,
    state: Mutex<DispatchState>,
    batch_mode: AtomicBool,
    closed: AtomicBool,
}

impl WhiteboardDispatcher {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        let properties = runtime.properties();
        Self {
            registry: Registry::new(),
            runtime,
            runtime_properties: ArcSwap::from_pointee(properties),
            state: Mutex::new(DispatchState::default()),
            batch_mode: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Service reference of the built-in default application: base `/`,
    /// lowest possible ranking so any declared `.default` replaces it.
    #[must_use]
    pub fn default_application() -> ServiceReference {
        ServiceReference::new(
            0,
            Properties::new()
                .with(keys::NAME, keys::DEFAULT_APPLICATION)
                .with(keys::APPLICATION_BASE, "/")
                .with(keys::SERVICE_RANKING, i64::MIN),
            ServiceObject::application(EmptyApplication),
        )
    }

    pub fn add_application(&self, reference: ServiceReference) -> Admission {
        self.mutate(|registry| registry.add(ProviderKind::Application, reference))
    }

    pub fn modify_application(&self, reference: ServiceReference) -> Admission {
        self.mutate(|registry| registry.modify(ProviderKind::Application, reference))
    }

    /// Remove the active application called `name`. Its content stays
    /// registered for future matching.
    pub fn remove_application(&self, name: &str) -> bool {
        self.remove_named(ProviderKind::Application, name)
    }

    pub fn add_resource(&self, reference: ServiceReference) -> Admission {
        self.mutate(|registry| registry.add(ProviderKind::Resource, reference))
    }

    pub fn modify_resource(&self, reference: ServiceReference) -> Admission {
        self.mutate(|registry| registry.modify(ProviderKind::Resource, reference))
    }

    pub fn remove_resource(&self, name: &str) -> bool {
        self.remove_named(ProviderKind::Resource, name)
    }

    pub fn add_extension(&self, reference: ServiceReference) -> Admission {
        self.mutate(|registry| registry.add(ProviderKind::Extension, reference))
    }

    pub fn modify_extension(&self, reference: ServiceReference) -> Admission {
        self.mutate(|registry| registry.modify(ProviderKind::Extension, reference))
    }

    pub fn remove_extension(&self, name: &str) -> bool {
        self.remove_named(ProviderKind::Extension, name)
    }

    /// Remove a provider by identity, active or failed.
    pub fn remove(&self, kind: ProviderKind, id: ServiceId) -> Option<AnyProvider> {
        self.mutate(|registry| registry.remove(kind, id))
    }

    /// With batch mode on, mutations only touch the registry until
    /// [`batch_dispatch`](Self::batch_dispatch). Turning it off dispatches.
    pub fn set_batch_mode(&self, enabled: bool) {
        let was = self.batch_mode.swap(enabled, Ordering::SeqCst);
        info!(enabled, "Batch mode changed");
        if was && !enabled {
            self.batch_dispatch();
        }
    }

    #[must_use]
    pub fn is_batch_mode(&self) -> bool {
        self.batch_mode.load(Ordering::SeqCst)
    }

    /// Bring the runtime in line with the registry, retrying every
    /// configuration the runtime refused before.
    pub fn batch_dispatch(&self) {
        let mut state = self.state.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        state.refused.clear();
        self.reconcile(&mut state);
    }

    /// Changes currently reach the runtime: open and not batching.
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.batch_mode.load(Ordering::SeqCst)
    }

    /// Merge `properties` over the runtime's own and re-evaluate every
    /// whiteboard target.
    pub fn update_runtime_properties(&self, properties: &Properties) {
        let mut merged = self.runtime.properties();
        merged.merge(properties);
        info!(properties = ?merged, "Runtime properties updated");
        self.mutate(|_| self.runtime_properties.store(Arc::new(merged)));
    }

    #[must_use]
    pub fn runtime_properties(&self) -> Arc<Properties> {
        self.runtime_properties.load_full()
    }

    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.runtime.urls()
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn application_state(&self, name: &str) -> ApplicationState {
        self.state
            .lock()
            .states
            .get(name)
            .copied()
            .unwrap_or(ApplicationState::Unknown)
    }

    /// Status of everything this whiteboard is responsible for.
    #[must_use]
    pub fn status(&self) -> RuntimeDto {
        let state = self.state.lock();
        let mut snapshot = StatusSnapshot {
            urls: self.runtime.urls(),
            ..StatusSnapshot::default()
        };

        for deployment in state.deployments.values() {
            let application = &deployment.revision.application;
            if state.app_failures.contains_key(&application.id()) {
                continue;
            }
            snapshot.applications.push(DeployedView {
                application: Arc::clone(application),
                resolved: deployment.resolved.clone(),
            });
        }

        for provider in self.registry.failed() {
            if let ProviderStatus::Failed(reason) = provider.header().status {
                snapshot.failed.push(FailedView { provider, reason });
            }
        }
        for application in self.registry.applications() {
            if let Some(reason) = state.app_failures.get(&application.id()) {
                snapshot.failed.push(FailedView {
                    provider: AnyProvider::Application(application),
                    reason: *reason,
                });
            }
        }
        for ((kind, id), reason) in &state.content_failures {
            if let Some(provider) = self.registry.find(*kind, *id) {
                snapshot.failed.push(FailedView {
                    provider,
                    reason: *reason,
                });
            }
        }

        status::project(&snapshot)
    }

    /// Unregister every application and release every held instance.
    /// Later calls, and events arriving after, are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        let deployments = std::mem::take(&mut state.deployments);
        for (name, deployment) in deployments {
            self.undeploy(&name, deployment);
        }
        for value in state.states.values_mut() {
            *value = ApplicationState::Removed;
        }
        state.app_failures.clear();
        state.content_failures.clear();
        state.refused.clear();
        info!("Whiteboard dispatcher closed");
    }

    fn remove_named(&self, kind: ProviderKind, name: &str) -> bool {
        self.mutate(|registry| match registry.get(kind, name) {
            Some(provider) => registry.remove(kind, provider.header().id).is_some(),
            None => {
                debug!(kind = %kind, name = %name, "Remove of unknown provider ignored");
                false
            }
        })
    }

    fn mutate<R: Default>(&self, change: impl FnOnce(&Registry) -> R) -> R {
        let mut state = self.state.lock();
        if self.closed.load(Ordering::SeqCst) {
            debug!("Dispatcher closed, change ignored");
            return R::default();
        }
        let result = change(&self.registry);
        if !self.batch_mode.load(Ordering::SeqCst) {
            self.reconcile(&mut state);
        }
        result
    }

    fn undeploy(&self, name: &str, deployment: Deployment) {
        match self.runtime.unregister(deployment.handle) {
            Ok(()) => info!(application = %name, handle = %deployment.handle, "Application unregistered"),
            Err(e) => error!(application = %name, error = %e, "Unregister failed"),
        }
        deployment.held.release_all();
    }

    fn reconcile(&self, state: &mut DispatchState) {
        let runtime_properties = self.runtime_properties.load_full();

        let mut applications = self.registry.applications();
        rank_order(&mut applications, |a| &a.header);
        let mut resources: Vec<_> = self
            .registry
            .resources()
            .into_iter()
            .filter(|r| r.is_ok() && r.header.targets_runtime(&runtime_properties))
            .collect();
        rank_order(&mut resources, |r| &r.header);
        let mut extensions: Vec<_> = self
            .registry
            .extensions()
            .into_iter()
            .filter(|e| e.is_ok() && e.header.targets_runtime(&runtime_properties))
            .collect();
        rank_order(&mut extensions, |e| &e.header);

        // Decide which applications should be served and with what content.
        let mut app_failures = HashMap::new();
        let mut latent = BTreeSet::new();
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut wanted: Vec<(Arc<ApplicationProvider>, Binding)> = Vec::new();
        for application in applications {
            let name = application.name();
            if !application.header.targets_runtime(&runtime_properties) {
                debug!(application = %name, "Application targets another whiteboard, latent");
                latent.insert(name.to_string());
                continue;
            }
            if let Some(holder) = claimed.get(application.base_path()) {
                warn!(
                    application = %name,
                    base_path = %application.base_path(),
                    holder = %holder,
                    "Base path already served by a better ranked application"
                );
                app_failures.insert(application.id(), FailureReason::Shadowed);
                continue;
            }
            let binding = bind(&application, &resources, &extensions);
            if !binding.application_satisfied {
                warn!(application = %name, "Required extensions unavailable");
                app_failures.insert(application.id(), FailureReason::RequiredExtensionsUnavailable);
                continue;
            }
            claimed.insert(application.base_path().to_string(), name.to_string());
            wanted.push((application, binding));
        }

        // Unregister what is no longer wanted, or wanted at a different identity.
        let stale: Vec<String> = state
            .deployments
            .iter()
            .filter(|(name, deployment)| {
                !wanted.iter().any(|(a, _)| {
                    a.name() == name.as_str()
                        && a.id() == deployment.revision.application.id()
                        && a.base_path() == deployment.resolved.base_path
                })
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            if let Some(deployment) = state.deployments.remove(&name) {
                self.undeploy(&name, deployment);
            }
        }

        let mut pending_content: HashMap<(ProviderKind, ServiceId), FailureReason> = HashMap::new();
        for (application, binding) in &wanted {
            for key in &binding.unsatisfied {
                pending_content
                    .entry(*key)
                    .or_insert(FailureReason::RequiredExtensionsUnavailable);
            }
            if let Some(reason) = self.deploy(state, application, binding, &mut pending_content) {
                app_failures.insert(application.id(), reason);
            }
        }
        let wanted_ids: HashSet<ServiceId> = wanted.iter().map(|(a, _)| a.id()).collect();
        state.refused.retain(|id, _| wanted_ids.contains(id));

        // Content is only failed when no deployment serves it.
        let bound: HashSet<(ProviderKind, ServiceId)> = state
            .deployments
            .values()
            .flat_map(|d| d.held.content_ids())
            .collect();
        pending_content.retain(|key, _| !bound.contains(key));
        for resource in &resources {
            let key = (ProviderKind::Resource, resource.id());
            if !bound.contains(&key) && !pending_content.contains_key(&key) {
                debug!(resource = %resource.name(), "Resource matches no application");
            }
        }
        for extension in &extensions {
            let key = (ProviderKind::Extension, extension.id());
            if !bound.contains(&key) && !pending_content.contains_key(&key) {
                debug!(extension = %extension.name(), "Extension matches no application");
            }
        }
        state.content_failures = pending_content;
        state.app_failures = app_failures;

        // Lifecycle states.
        let mut states = BTreeMap::new();
        for application in self.registry.applications() {
            let name = application.name().to_string();
            let value = if latent.contains(&name) {
                ApplicationState::Latent
            } else if let Some(reason) = state.app_failures.get(&application.id()) {
                ApplicationState::Failed(*reason)
            } else if state.deployments.contains_key(&name) {
                ApplicationState::Registered
            } else {
                ApplicationState::Unknown
            };
            states.insert(name, value);
        }
        for provider in self.registry.failed() {
            if let (AnyProvider::Application(p), ProviderStatus::Failed(reason)) =
                (&provider, provider.header().status)
            {
                states
                    .entry(p.name().to_string())
                    .or_insert(ApplicationState::Failed(reason));
            }
        }
        for name in state.states.keys() {
            states
                .entry(name.clone())
                .or_insert(ApplicationState::Removed);
        }
        state.states = states;
    }

    /// Register or reload one wanted application. Returns the reason it is
    /// not being served as wanted, if any.
    fn deploy(
        &self,
        state: &mut DispatchState,
        application: &Arc<ApplicationProvider>,
        binding: &Binding,
        pending_content: &mut HashMap<(ProviderKind, ServiceId), FailureReason>,
    ) -> Option<FailureReason> {
        let name = application.name().to_string();
        let existing = state.deployments.remove(&name);
        if existing.is_none() {
            state.states.insert(name.clone(), ApplicationState::Validating);
        }
        let mut previous = HeldInstances::default();
        let mut existing = existing.map(|mut d| {
            previous = std::mem::take(&mut d.held);
            d
        });

        let assembled = match assemble(application, binding, &mut previous) {
            Ok(assembled) => assembled,
            Err(reason) => {
                warn!(application = %name, reason = %reason, "Application object not gettable");
                if let Some(mut deployment) = existing {
                    deployment.held = previous;
                    state.deployments.insert(name, deployment);
                }
                return Some(reason);
            }
        };
        for key in &assembled.not_gettable {
            pending_content.insert(*key, FailureReason::ServiceNotGettable);
        }
        let revision = Revision::new(application, binding, &assembled.resolved);

        if let Some(mut deployment) = existing.take() {
            if deployment.revision.same_as(&revision) {
                previous.release_all();
                deployment.held = assembled.held;
                state.deployments.insert(name, deployment);
                return None;
            }
            existing = Some(deployment);
        }
        if let Some((refused, reason)) = state.refused.get(&application.id()) {
            if refused.same_as(&revision) {
                let reason = *reason;
                debug!(application = %name, "Configuration refused before, not retried");
                match existing {
                    Some(mut deployment) => {
                        assembled.held.restore_into(&mut previous);
                        deployment.held = previous;
                        state.deployments.insert(name, deployment);
                    }
                    None => {
                        assembled.held.release_all();
                        previous.release_all();
                    }
                }
                return Some(reason);
            }
        }

        match existing {
            Some(mut deployment) => {
                state.states.insert(name.clone(), ApplicationState::Reloading);
                match self
                    .runtime
                    .reload(deployment.handle, assembled.resolved.clone())
                {
                    Ok(()) => {
                        info!(
                            application = %name,
                            resources = assembled.resolved.resources.len(),
                            extensions = assembled.resolved.extensions.len(),
                            "Application reloaded"
                        );
                        previous.release_all();
                        deployment.held = assembled.held;
                        deployment.resolved = assembled.resolved;
                        deployment.revision = revision;
                        state.refused.remove(&application.id());
                        state.deployments.insert(name, deployment);
                        None
                    }
                    Err(e) => {
                        error!(application = %name, error = %e, "Reload failed, previous configuration kept");
                        let reason = e.reason();
                        assembled.held.restore_into(&mut previous);
                        deployment.held = previous;
                        remember_refusal(state, application.id(), &e, revision);
                        state.deployments.insert(name, deployment);
                        Some(reason)
                    }
                }
            }
            None => match self.runtime.register(assembled.resolved.clone()) {
                Ok(handle) => {
                    info!(
                        application = %name,
                        base_path = %application.base_path(),
                        handle = %handle,
                        resources = assembled.resolved.resources.len(),
                        "Application registered"
                    );
                    state.refused.remove(&application.id());
                    state.deployments.insert(
                        name,
                        Deployment {
                            handle,
                            revision,
                            resolved: assembled.resolved,
                            held: assembled.held,
                        },
                    );
                    None
                }
                Err(e) => {
                    error!(application = %name, error = %e, "Register failed");
                    let reason = e.reason();
                    assembled.held.release_all();
                    remember_refusal(state, application.id(), &e, revision);
                    Some(reason)
                }
            },
        }
    }
}

/// Transient refusals are retried on the next pass.
fn remember_refusal(state: &mut DispatchState, id: ServiceId, error: &RuntimeError, revision: Revision) {
    if error.is_transient() {
        state.refused.remove(&id);
    } else {
        state.refused.insert(id, (revision, error.reason()));
    }
}

impl EventSink for WhiteboardDispatcher {
    fn apply(&self, batch: Vec<LifecycleEvent>) {
        let mut state = self.state.lock();
        if self.closed.load(Ordering::SeqCst) {
            debug!(events = batch.len(), "Dispatcher closed, batch dropped");
            return;
        }
        debug!(events = batch.len(), "Applying lifecycle batch");

        // Removals first, including kinds a modified service no longer has.
        for event in &batch {
            let kinds = match event.kind {
                EventKind::Remove => Vec::new(),
                EventKind::Add | EventKind::Modify => event.reference.kinds(),
            };
            for kind in ALL_KINDS {
                if !kinds.contains(&kind) && self.registry.find(kind, event.id()).is_some() {
                    self.registry.remove(kind, event.id());
                }
            }
        }

        let classified = ClassifiedBatch::classify(&batch);
        let partitions = [
            (ProviderKind::Application, &classified.applications),
            (ProviderKind::Extension, &classified.extensions),
            (ProviderKind::Resource, &classified.resources),
        ];
        for (kind, events) in partitions {
            for event in events.iter().filter(|e| e.kind != EventKind::Remove) {
                let reference = event.reference.clone();
                let admission = if self.registry.find(kind, event.id()).is_some() {
                    self.registry.modify(kind, reference)
                } else {
                    self.registry.add(kind, reference)
                };
                debug!(kind = %kind, service_id = %event.id(), admission = ?admission, "Lifecycle event applied");
            }
        }

        if !self.batch_mode.load(Ordering::SeqCst) {
            self.reconcile(&mut state);
        }
    }
}

impl Drop for WhiteboardDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
