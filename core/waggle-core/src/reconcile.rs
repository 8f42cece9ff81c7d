//! Orphan purge: removes persisted rows whose tmux session is gone.
//!
//! Runs before every listing. A purge only happens when tmux gave a
//! confirmed answer. A degraded query (binary missing, no server, timeout)
//! says nothing about which sessions are alive, so nothing is deleted.

use std::collections::HashSet;

use crate::identity::SessionIdentity;
use crate::registry::{DegradedReason, RegistryOutcome, SessionRegistry, SessionTemplate};
use crate::store::Store;

/// What a reconciliation pass did. Informational only; a pass never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileReport {
    /// Orphans were found and deleted.
    Purged { count: usize },
    /// Every persisted row matched a live session.
    Clean,
    /// The registry could not be queried, so nothing was purged.
    Skipped(DegradedReason),
    /// The store could not be read or written.
    StoreUnavailable(String),
}

pub struct Reconciler<'a> {
    store: &'a Store,
    registry: &'a dyn SessionRegistry,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a Store, registry: &'a dyn SessionRegistry) -> Self {
        Self { store, registry }
    }

    pub fn run(&self) -> ReconcileReport {
        let live = match self.registry.list_sessions(SessionTemplate::KeysOnly) {
            RegistryOutcome::Live(sessions) => sessions,
            RegistryOutcome::Degraded(reason) => {
                tracing::debug!(reason = %reason, "Skipping orphan purge");
                return ReconcileReport::Skipped(reason);
            }
        };

        let live_keys: HashSet<String> = live
            .iter()
            .map(|session| session.identity.encode())
            .collect();

        let persisted = match self.store.select_all() {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "Orphan purge could not read the store");
                return ReconcileReport::StoreUnavailable(err.to_string());
            }
        };

        let orphaned: Vec<String> = persisted
            .into_iter()
            .map(|row| row.key)
            .filter(|key| !live_keys.contains(key))
            .collect();

        if orphaned.is_empty() {
            return ReconcileReport::Clean;
        }

        for key in &orphaned {
            match SessionIdentity::decode(key) {
                Ok(identity) => tracing::debug!(session = %identity.name, key = %key, "Purging orphan"),
                Err(_) => tracing::debug!(key = %key, "Purging malformed key"),
            }
        }

        match self.store.delete_by_keys(&orphaned) {
            Ok(count) => {
                tracing::info!(count, "Purged orphaned agent records");
                ReconcileReport::Purged { count }
            }
            Err(err) => {
                tracing::warn!(error = %err, orphans = orphaned.len(), "Orphan purge failed");
                ReconcileReport::StoreUnavailable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LiveSession;
    use crate::store::StatusRecord;

    struct FixedRegistry(RegistryOutcome);

    impl SessionRegistry for FixedRegistry {
        fn list_sessions(&self, _template: SessionTemplate) -> RegistryOutcome {
            self.0.clone()
        }
    }

    fn live(keys: &[(&str, &str, &str)]) -> FixedRegistry {
        FixedRegistry(RegistryOutcome::Live(
            keys.iter()
                .map(|(name, id, created)| LiveSession {
                    identity: SessionIdentity::new(*name, *id, *created),
                    directory: None,
                })
                .collect(),
        ))
    }

    fn seeded_store(dir: &std::path::Path, keys: &[&str]) -> Store {
        let store = Store::open(dir.join("state.db")).expect("open store");
        for key in keys {
            store
                .upsert(&StatusRecord::new(*key, "/repo", "working"))
                .expect("seed row");
        }
        store
    }

    fn persisted_keys(store: &Store) -> HashSet<String> {
        store
            .select_all()
            .expect("select")
            .into_iter()
            .map(|row| row.key)
            .collect()
    }

    #[test]
    fn purges_rows_without_live_session() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = seeded_store(dir.path(), &["n1+i1+c1", "n2+i2+c2", "n3+i3+c3"]);
        let registry = live(&[("n1", "i1", "c1"), ("n3", "i3", "c3"), ("n9", "i9", "c9")]);

        let report = Reconciler::new(&store, &registry).run();

        assert_eq!(report, ReconcileReport::Purged { count: 1 });
        assert_eq!(
            persisted_keys(&store),
            HashSet::from(["n1+i1+c1".to_string(), "n3+i3+c3".to_string()])
        );
    }

    #[test]
    fn name_reuse_with_new_created_marker_is_an_orphan() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = seeded_store(dir.path(), &["worker+$0+100"]);
        let registry = live(&[("worker", "$0", "200")]);

        assert_eq!(
            Reconciler::new(&store, &registry).run(),
            ReconcileReport::Purged { count: 1 }
        );
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn clean_when_everything_is_live() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = seeded_store(dir.path(), &["n1+i1+c1"]);
        let registry = live(&[("n1", "i1", "c1")]);

        assert_eq!(Reconciler::new(&store, &registry).run(), ReconcileReport::Clean);
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn confirmed_empty_listing_purges_everything() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = seeded_store(dir.path(), &["n1+i1+c1", "n2+i2+c2"]);
        let registry = live(&[]);

        assert_eq!(
            Reconciler::new(&store, &registry).run(),
            ReconcileReport::Purged { count: 2 }
        );
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn degraded_registry_skips_purge() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = seeded_store(dir.path(), &["n1+i1+c1", "n2+i2+c2"]);

        for reason in [
            DegradedReason::BinaryMissing,
            DegradedReason::NoServer,
            DegradedReason::TimedOut,
            DegradedReason::Failed("boom".to_string()),
        ] {
            let registry = FixedRegistry(RegistryOutcome::Degraded(reason.clone()));
            assert_eq!(
                Reconciler::new(&store, &registry).run(),
                ReconcileReport::Skipped(reason)
            );
        }
        assert_eq!(store.count().expect("count"), 2);
    }

    #[test]
    fn malformed_keys_are_purged_like_any_orphan() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = seeded_store(dir.path(), &["not-a-key", "n1+i1+c1"]);
        let registry = live(&[("n1", "i1", "c1")]);

        assert_eq!(
            Reconciler::new(&store, &registry).run(),
            ReconcileReport::Purged { count: 1 }
        );
        assert_eq!(persisted_keys(&store), HashSet::from(["n1+i1+c1".to_string()]));
    }

    #[test]
    fn unreachable_store_is_reported_not_raised() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::attach(dir.path().join("missing").join("state.db"));
        let registry = live(&[("n1", "i1", "c1")]);

        let report = Reconciler::new(&store, &registry).run();
        assert!(matches!(report, ReconcileReport::StoreUnavailable(_)));
    }
}
