//! # Provider File Source
//!
//! Feeds the providers declared in a configuration file into a
//! [`ReferenceCollector`] and keeps them in step with the file.
//!
//! Every reload re-parses the file and compares its provider list with the
//! previous one by service id:
//!
//! - new id → ADD
//! - known id with a different declaration → MODIFY
//! - id no longer declared → REMOVE
//! - unchanged declarations publish nothing, so their applications are never
//!   reloaded
//!
//! A file that fails to parse or validate is logged and ignored; the previous
//! declarations stay in effect. An empty file is ignored as well, so removing
//! every provider takes an explicit `providers: []`.
//!
//! The watcher observes the parent directory rather than the file itself, so
//! editors that save by renaming a temporary file are still picked up.

use crate::collector::{LifecycleEvent, ReferenceCollector};
use crate::config::{validate_providers, ConfigError, WhiteboardConfig};
use crate::declared::ProviderDecl;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What one reload published.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

impl ReloadSummary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.removed == 0
    }
}

/// The declared providers of one file, as last published.
pub struct ProviderSource {
    path: PathBuf,
    collector: Arc<ReferenceCollector>,
    current: Mutex<BTreeMap<i64, ProviderDecl>>,
}

impl ProviderSource {
    /// A source with nothing published yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, collector: Arc<ReferenceCollector>) -> Self {
        Self {
            path: path.into(),
            collector,
            current: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish `providers` against what was published before.
    pub fn publish(&self, providers: Vec<ProviderDecl>) -> ReloadSummary {
        let mut current = self.current.lock();
        let mut next = BTreeMap::new();
        let mut summary = ReloadSummary::default();

        for decl in providers {
            match current.remove(&decl.id) {
                None => {
                    self.collector.publish(LifecycleEvent::add(decl.reference()));
                    summary.added += 1;
                }
                Some(previous) if previous != decl => {
                    self.collector
                        .publish(LifecycleEvent::modify(decl.reference()));
                    summary.modified += 1;
                }
                Some(_) => {}
            }
            next.insert(decl.id, decl);
        }
        for gone in current.values() {
            self.collector.publish(LifecycleEvent::remove(gone.reference()));
            summary.removed += 1;
        }
        *current = next;
        summary
    }

    /// Re-read the file and publish the difference.
    ///
    /// # Errors
    ///
    /// The file cannot be read or parsed, or its providers fail validation.
    /// Nothing is published in that case.
    pub fn reload(&self) -> Result<ReloadSummary, ConfigError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        // Editors truncate before writing; an empty file is a save in progress.
        if text.trim().is_empty() {
            debug!(path = %self.path.display(), "Provider file empty, ignored");
            return Ok(ReloadSummary::default());
        }
        let providers = serde_yaml::from_str::<WhiteboardConfig>(&text)
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?
            .providers;
        validate_providers(&providers)?;
        let summary = self.publish(providers);
        info!(
            path = %self.path.display(),
            added = summary.added,
            modified = summary.modified,
            removed = summary.removed,
            "Provider file reloaded"
        );
        Ok(summary)
    }

    /// Declarations currently in effect, ordered by id.
    #[must_use]
    pub fn declared(&self) -> Vec<ProviderDecl> {
        self.current.lock().values().cloned().collect()
    }

    /// Withdraw everything this source published.
    pub fn withdraw(&self) -> ReloadSummary {
        self.publish(Vec::new())
    }
}

/// Reload `source` whenever its file changes. The watch stops when the
/// returned watcher is dropped.
///
/// # Errors
///
/// The watch cannot be installed.
pub fn watch_providers(source: Arc<ProviderSource>) -> notify::Result<RecommendedWatcher> {
    let file = source.path().to_path_buf();
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = file.file_name().map(ToOwned::to_owned);
    let watched = Arc::clone(&source);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(ToOwned::to_owned) == file_name);
                if !touches_file {
                    return;
                }
                debug!(path = %watched.path().display(), kind = ?event.kind, "Provider file changed");
                if let Err(e) = watched.reload() {
                    error!(
                        path = %watched.path().display(),
                        error = %e,
                        "Provider file rejected, previous providers kept"
                    );
                }
            }
            Err(e) => error!(error = %e, "Provider file watch error"),
        },
        Config::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %file.display(), "Watching provider file");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{EventKind as LifecycleKind, EventSink};
    use std::io::Write;
    use std::time::Duration;

    #[derive(Default)]
    struct Seen(parking_lot::Mutex<Vec<(LifecycleKind, i64)>>);

    impl EventSink for Seen {
        fn apply(&self, batch: Vec<LifecycleEvent>) {
            self.0
                .lock()
                .extend(batch.into_iter().map(|e| (e.kind, e.id().0)));
        }
    }

    fn wait_for(seen: &Seen, count: usize) -> Vec<(LifecycleKind, i64)> {
        for _ in 0..200 {
            if seen.0.lock().len() >= count {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        seen.0.lock().clone()
    }

    fn decl(yaml: &str) -> ProviderDecl {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_publish_diffs_by_id() {
        let collector = Arc::new(ReferenceCollector::new(Duration::ZERO).unwrap());
        let seen = Arc::new(Seen::default());
        collector.connect(Arc::clone(&seen) as Arc<dyn EventSink>).unwrap();
        let source = ProviderSource::new("unused.yaml", Arc::clone(&collector));

        let first = source.publish(vec![decl("id: 1"), decl("id: 2")]);
        assert_eq!(first.added, 2);

        let second = source.publish(vec![
            decl("id: 1"),
            decl("id: 3"),
            decl("id: 2\nproperties:\n  whiteboard.resource: true"),
        ]);
        assert_eq!(
            second,
            ReloadSummary {
                added: 1,
                modified: 1,
                removed: 0
            }
        );

        let third = source.publish(vec![decl("id: 3")]);
        assert_eq!(third.removed, 2);
        assert!(source.publish(vec![decl("id: 3")]).is_empty());
        assert_eq!(source.declared().len(), 1);

        let events = wait_for(&seen, 6);
        assert_eq!(
            events,
            vec![
                (LifecycleKind::Add, 1),
                (LifecycleKind::Add, 2),
                (LifecycleKind::Add, 3),
                (LifecycleKind::Modify, 2),
                (LifecycleKind::Remove, 1),
                (LifecycleKind::Remove, 2),
            ]
        );
    }

    #[test]
    fn test_invalid_file_keeps_previous() {
        let collector = Arc::new(ReferenceCollector::new(Duration::ZERO).unwrap());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "providers:\n  - id: 5\n  - id: 6").unwrap();
        let source = ProviderSource::new(file.path(), Arc::clone(&collector));
        assert_eq!(source.reload().unwrap().added, 2);

        std::fs::write(file.path(), "providers:\n  - id: 5\n  - id: 5\n").unwrap();
        assert!(matches!(
            source.reload(),
            Err(ConfigError::DuplicateServiceId(5))
        ));
        assert_eq!(source.declared().len(), 2);

        std::fs::write(file.path(), "providers: [").unwrap();
        assert!(matches!(source.reload(), Err(ConfigError::Parse { .. })));
        assert_eq!(source.declared().len(), 2);

        std::fs::write(file.path(), "\n").unwrap();
        assert!(source.reload().unwrap().is_empty());
        assert_eq!(source.declared().len(), 2);

        std::fs::write(file.path(), "providers: []\n").unwrap();
        assert_eq!(source.reload().unwrap().removed, 2);
    }

    #[test]
    fn test_withdraw() {
        let collector = Arc::new(ReferenceCollector::new(Duration::ZERO).unwrap());
        let source = ProviderSource::new("unused.yaml", Arc::clone(&collector));
        source.publish(vec![decl("id: 7")]);
        assert_eq!(source.withdraw().removed, 1);
        assert!(source.declared().is_empty());
    }
}
