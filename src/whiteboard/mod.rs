//! # Whiteboard Dispatcher
//!
//! The core of the crate. A [`WhiteboardDispatcher`] owns the [`Registry`] of
//! one whiteboard, re-runs matching whenever the provider population changes
//! and drives its [`Runtime`] so that what the runtime serves always equals
//! what the registry says should be served.
//!
//! ## Reconciliation
//!
//! Every change (a direct call, or a batch from the reference collector) ends
//! in one reconciliation pass under the dispatcher's mutex:
//!
//! 1. Applications are taken in rank order. Latent ones (whiteboard target not
//!    matching the runtime) are skipped; an application whose base path was
//!    already claimed by a better ranked one is `SHADOWED`; one whose required
//!    extensions are missing is `REQUIRED_EXTENSIONS_UNAVAILABLE`.
//! 2. Content is bound to each remaining application (see [`matching`]).
//! 3. Deployments that are no longer wanted are unregistered.
//! 4. Each wanted application is compared with what it was last deployed
//!    with. Unchanged applications are left alone, changed ones are reloaded,
//!    new ones registered.
//!
//! So adding a resource that matches one application reloads exactly that
//! application, and removing it reloads it exactly once more.
//!
//! ## Batch mode
//!
//! With batch mode on, mutations only touch the registry;
//! [`WhiteboardDispatcher::batch_dispatch`] runs the pass once for everything
//! accumulated.
//!
//! [`Registry`]: crate::registry::Registry
//! [`Runtime`]: crate::runtime::Runtime

mod dispatcher;
mod instances;
pub mod matching;

pub use dispatcher::WhiteboardDispatcher;

use crate::provider::FailureReason;
use serde::Serialize;
use std::fmt;

/// Lifecycle of one application inside a dispatcher.
///
/// `Unknown → Validating → Registered | Failed`, `Registered → Reloading →
/// Registered`, and any state → `Removed`. `Latent` applications are valid
/// but target another whiteboard runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "state", content = "reason")]
pub enum ApplicationState {
    Unknown,
    Validating,
    Registered,
    Reloading,
    Failed(FailureReason),
    Latent,
    Removed,
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationState::Unknown => f.write_str("UNKNOWN"),
            ApplicationState::Validating => f.write_str("VALIDATING"),
            ApplicationState::Registered => f.write_str("REGISTERED"),
            ApplicationState::Reloading => f.write_str("RELOADING"),
            ApplicationState::Failed(reason) => write!(f, "FAILED({reason})"),
            ApplicationState::Latent => f.write_str("LATENT"),
            ApplicationState::Removed => f.write_str("REMOVED"),
        }
    }
}
