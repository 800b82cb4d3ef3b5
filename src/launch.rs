//! # Whiteboard Launch
//!
//! Wires one configured whiteboard together:
//!
//! ```text
//! provider file ──► ProviderSource ──► ReferenceCollector ──► WhiteboardDispatcher
//!                                                                   │
//!            HTTP ──► WhiteboardService ──► WhiteboardRuntime ◄─────┘
//! ```
//!
//! [`Whiteboard::start`] builds the chain, publishes the declared providers
//! and starts serving. [`Whiteboard::close`] tears it down in the reverse
//! order: stop accepting events, unregister every application and release its
//! instances, then stop the listener.

use crate::collector::{EventSink, LifecycleEvent, ReferenceCollector, SubscriberId};
use crate::config::WhiteboardConfig;
use crate::hot_reload::{watch_providers, ProviderSource};
use crate::runtime::{Runtime, WhiteboardRuntime};
use crate::server::{HttpServer, ServerHandle, WhiteboardService};
use crate::status::RuntimeDto;
use crate::whiteboard::WhiteboardDispatcher;
use anyhow::{Context, Result};
use notify::RecommendedWatcher;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long [`Whiteboard::start`] waits for the listener.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// A running whiteboard.
pub struct Whiteboard {
    name: String,
    runtime: Arc<WhiteboardRuntime>,
    dispatcher: Arc<WhiteboardDispatcher>,
    collector: Arc<ReferenceCollector>,
    subscriber: Option<SubscriberId>,
    providers: Arc<ProviderSource>,
    watcher: Option<RecommendedWatcher>,
    server: Option<ServerHandle>,
}

/// Runtime and dispatcher for `config`, with the built-in default
/// application added when configured.
fn assemble(config: &WhiteboardConfig) -> Result<(Arc<WhiteboardRuntime>, Arc<WhiteboardDispatcher>)> {
    config.validate().context("Invalid whiteboard configuration")?;
    let settings = config.runtime_settings()?;
    let runtime = Arc::new(WhiteboardRuntime::new(settings));
    let dispatcher = Arc::new(WhiteboardDispatcher::new(
        Arc::clone(&runtime) as Arc<dyn Runtime>
    ));
    if config.default_application {
        dispatcher.add_application(WhiteboardDispatcher::default_application());
    }
    Ok((runtime, dispatcher))
}

/// The status `config` resolves to, computed without a listener or
/// collector.
///
/// # Errors
///
/// The configuration does not validate.
pub fn resolve_status(config: &WhiteboardConfig) -> Result<RuntimeDto> {
    let (_runtime, dispatcher) = assemble(config)?;
    dispatcher.apply(
        config
            .providers
            .iter()
            .map(|decl| LifecycleEvent::add(decl.reference()))
            .collect(),
    );
    let status = dispatcher.status();
    dispatcher.close();
    Ok(status)
}

impl Whiteboard {
    /// Build the chain for `config`, publish its providers and start the
    /// HTTP listener. `config_path` names the file declared providers are
    /// reloaded from.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or the listener cannot be started.
    pub fn start(config: &WhiteboardConfig, config_path: &Path) -> Result<Self> {
        let mut whiteboard = Self::build(config, config_path)?;
        let addr = config
            .bind_address()
            .context("Whiteboard port is missing")?;
        let mut service = WhiteboardService::new(Arc::clone(&whiteboard.runtime));
        if let Some(path) = &config.status_path {
            service = service.with_status(Arc::clone(&whiteboard.dispatcher), path);
        }
        let server = HttpServer(service)
            .start(addr.as_str())
            .with_context(|| format!("Failed to bind {addr}"))?;
        server
            .wait_ready(READY_TIMEOUT)
            .with_context(|| format!("Listener on {addr} never became ready"))?;
        whiteboard.server = Some(server);
        info!(
            whiteboard = %whiteboard.name,
            addr = %addr,
            urls = ?whiteboard.urls(),
            "Whiteboard serving"
        );
        Ok(whiteboard)
    }

    /// Everything but the listener.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or a collector thread cannot be spawned.
    pub fn build(config: &WhiteboardConfig, config_path: &Path) -> Result<Self> {
        let (runtime, dispatcher) = assemble(config)?;
        let name = runtime.settings().name.clone();
        let collector = Arc::new(
            ReferenceCollector::new(config.batch_window())
                .context("Failed to start reference collector")?,
        );
        let subscriber = collector
            .connect(Arc::clone(&dispatcher) as Arc<dyn EventSink>)
            .context("Failed to connect dispatcher")?;
        let providers = Arc::new(ProviderSource::new(config_path, Arc::clone(&collector)));
        let summary = providers.publish(config.providers.clone());
        collector.flush();
        info!(
            whiteboard = %name,
            providers = summary.added,
            "Declared providers published"
        );
        Ok(Self {
            name,
            runtime,
            dispatcher,
            collector,
            subscriber: Some(subscriber),
            providers,
            watcher: None,
            server: None,
        })
    }

    /// Reload declared providers whenever the configuration file changes.
    ///
    /// # Errors
    ///
    /// The file watch cannot be installed.
    pub fn watch(&mut self) -> Result<()> {
        let watcher = watch_providers(Arc::clone(&self.providers))
            .context("Failed to watch provider file")?;
        self.watcher = Some(watcher);
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<WhiteboardDispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<WhiteboardRuntime> {
        &self.runtime
    }

    /// Feed for programmatic providers.
    #[must_use]
    pub fn collector(&self) -> &Arc<ReferenceCollector> {
        &self.collector
    }

    #[must_use]
    pub fn providers(&self) -> &Arc<ProviderSource> {
        &self.providers
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    #[must_use]
    pub fn status(&self) -> RuntimeDto {
        self.dispatcher.status()
    }

    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.dispatcher.urls()
    }

    /// Block until the listener exits.
    ///
    /// # Errors
    ///
    /// The accept loop panicked.
    pub fn join(mut self) -> Result<()> {
        match self.server.take() {
            Some(server) => server
                .join()
                .map_err(|e| anyhow::anyhow!("HTTP server panicked: {e:?}")),
            None => Ok(()),
        }
    }

    /// Tear down. Idempotent.
    pub fn close(&mut self) {
        self.watcher = None;
        if let Some(subscriber) = self.subscriber.take() {
            self.collector.disconnect(subscriber);
        }
        self.dispatcher.close();
        if let Some(server) = self.server.take() {
            server.stop();
        }
        info!(whiteboard = %self.name, "Whiteboard closed");
    }
}

impl Drop for Whiteboard {
    fn drop(&mut self) {
        if self.subscriber.is_some() || self.server.is_some() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> WhiteboardConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_resolve_status() {
        let status = resolve_status(&config(
            r#"
name: main
port: 8080
providers:
  - id: 10
    path: /hello
    properties:
      whiteboard.name: hello
      whiteboard.resource: true
    methods:
      - verb: GET
        body: hello
  - id: 11
    path: /nowhere
    properties:
      whiteboard.name: stranger
      whiteboard.resource: true
      whiteboard.application.select: "(whiteboard.name=missing)"
"#,
        ))
        .unwrap();
        let default = status.default_application.as_ref().unwrap();
        assert_eq!(default.resource_dtos.len(), 1);
        assert_eq!(default.resource_dtos[0].path, "/hello");
        assert!(status.failed_resource_dtos.is_empty());
    }

    #[test]
    fn test_resolve_status_rejects_missing_port() {
        assert!(resolve_status(&config("name: main\n")).is_err());
    }

    #[test]
    fn test_build_without_default_application() {
        let cfg = config("name: bare\nport: 8080\ndefault_application: false\nbatch_window_ms: 0\n");
        let mut whiteboard = Whiteboard::build(&cfg, Path::new("unused.yaml")).unwrap();
        assert_eq!(whiteboard.name(), "bare");
        assert!(whiteboard.status().default_application.is_none());
        assert!(whiteboard.local_addr().is_none());
        whiteboard.close();
        whiteboard.close();
    }
}
