//! # Whiteboard
//!
//! **Whiteboard** binds a changing population of independently registered
//! service objects (applications, resources and extensions) into a live HTTP
//! configuration, without ever restarting the server.
//!
//! ## Overview
//!
//! Providers come and go at any time. Each one is a service object plus a
//! property map; the properties say what it is (`whiteboard.resource`,
//! `whiteboard.extension`, `whiteboard.application.base`) and where it belongs
//! (`whiteboard.application.select`, LDAP-style filters). The whiteboard keeps
//! recomputing which content belongs to which application and pushes the
//! result into the runtime with as little disruption as possible: an
//! application is only reloaded when what it serves actually changed.
//!
//! ## Architecture
//!
//! - **[`properties`]** / **[`filter`]** - Property maps and the selector filters evaluated against them
//! - **[`provider`]** - Validated application, resource and extension providers
//! - **[`collector`]** - Debounces lifecycle events and fans them out to dispatchers
//! - **[`registry`]** - Name → provider store with the failed-provider ledger
//! - **[`whiteboard`]** - The dispatcher: matching, reconciliation, teardown
//! - **[`runtime`]** - Routing tables and extension chains behind register / reload / unregister
//! - **[`status`]** - Serializable status documents
//! - **[`server`]** - HTTP transport on `may_minihttp`
//! - **[`config`]**, **[`declared`]**, **[`hot_reload`]**, **[`launch`]**, **[`cli`]** - Running a whiteboard from a YAML file
//! - **[`logging`]** - Structured logging setup
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Feed as Lifecycle feed
//!     participant Collector as ReferenceCollector
//!     participant Dispatcher as WhiteboardDispatcher
//!     participant Runtime as WhiteboardRuntime
//!     participant Client
//!
//!     Feed->>Collector: ADD resource /hello
//!     Feed->>Collector: MODIFY resource /hello
//!     Note over Collector: batch window
//!     Collector->>Dispatcher: [ADD /hello]
//!     Dispatcher->>Dispatcher: validate, match, diff
//!     Dispatcher->>Runtime: reload(.default)
//!     Client->>Runtime: GET /hello
//!     Runtime-->>Client: 200
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use whiteboard::collector::{LifecycleEvent, ReferenceCollector};
//! use whiteboard::properties::{keys, Properties};
//! use whiteboard::provider::ServiceReference;
//! use whiteboard::service::ServiceObject;
//!
//! let reference = ServiceReference::new(
//!     42,
//!     Properties::new()
//!         .with(keys::NAME, "hello")
//!         .with(keys::RESOURCE, true),
//!     ServiceObject::resource(Hello),
//! );
//! collector.publish(LifecycleEvent::add(reference));
//! ```
//!
//! Or from the command line, serving the providers declared in a file:
//!
//! ```bash
//! whiteboard serve --config whiteboard.yaml --watch
//! whiteboard status --config whiteboard.yaml
//! ```

pub mod cli;
pub mod collector;
pub mod config;
pub mod declared;
pub mod filter;
pub mod handler;
pub mod hot_reload;
pub mod ids;
pub mod launch;
pub mod logging;
pub mod properties;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod service;
pub mod status;
pub mod whiteboard;

pub use collector::{EventKind, EventSink, LifecycleEvent, ReferenceCollector};
pub use config::{ConfigError, WhiteboardConfig};
pub use handler::{HandlerRequest, HandlerResponse};
pub use launch::Whiteboard;
pub use properties::{keys, Properties, PropertyValue};
pub use provider::{FailureReason, ProviderKind, ServiceReference};
pub use runtime::{Runtime, RuntimeSettings, WhiteboardRuntime};
pub use service::{Extension, Resource, ServiceObject};
pub use status::RuntimeDto;
pub use whiteboard::{ApplicationState, WhiteboardDispatcher};
