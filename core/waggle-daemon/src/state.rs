//! Per-process state shared by connection threads.
//!
//! Holds only handles: the store path and the tmux registry. Each request
//! opens its own database connection and runs its own tmux queries, so
//! threads never contend on anything in this process.

use chrono::{DateTime, Utc};
use waggle_core::{AgentFilter, AgentView, SessionRegistry, Store};
use waggle_protocol::{
    AgentRecord, DeleteNamespaceParams, DeleteNamespaceResult, HealthInfo, ListAgentsParams,
    ListAgentsResult, PROTOCOL_VERSION,
};

pub struct SharedState {
    store: Store,
    registry: Box<dyn SessionRegistry>,
    started_at: DateTime<Utc>,
}

impl SharedState {
    pub fn new(store: Store, registry: Box<dyn SessionRegistry>) -> Self {
        Self {
            store,
            registry,
            started_at: Utc::now(),
        }
    }

    pub fn health(&self) -> HealthInfo {
        let record_count = match self.store.count() {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to count records for health check");
                None
            }
        };
        HealthInfo {
            status: "ok".to_string(),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
            started_at: self.started_at.to_rfc3339(),
            record_count,
        }
    }

    pub fn list_agents(&self, params: ListAgentsParams) -> ListAgentsResult {
        let filter = AgentFilter {
            name: params.name,
            repo: params.repo,
        };
        match waggle_core::list_agents(&self.store, self.registry.as_ref(), &filter) {
            Ok(agents) => {
                tracing::debug!(agents = agents.len(), "Listed agents");
                ListAgentsResult::Success {
                    agents: agents.into_iter().map(agent_record).collect(),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, code = err.code(), "list_agents failed");
                ListAgentsResult::Error {
                    error: format!("Failed to query database: {}", err),
                }
            }
        }
    }

    pub fn delete_namespace_agents(&self, params: DeleteNamespaceParams) -> DeleteNamespaceResult {
        let namespace = match waggle_core::resolve_namespace(
            params.root_uri.as_deref(),
            params.namespace.as_deref(),
        ) {
            Ok(namespace) => namespace,
            Err(err) => {
                tracing::debug!(error = %err, "Namespace could not be resolved");
                return DeleteNamespaceResult::Error {
                    error: err.to_string(),
                };
            }
        };

        match waggle_core::delete_namespace(&self.store, &namespace) {
            Ok(deleted_count) => DeleteNamespaceResult::Success { deleted_count },
            Err(err) => {
                tracing::warn!(error = %err, namespace = %namespace, "delete_namespace_agents failed");
                DeleteNamespaceResult::Error {
                    error: format!("Failed to clean up database: {}", err),
                }
            }
        }
    }
}

fn agent_record(view: AgentView) -> AgentRecord {
    AgentRecord {
        name: view.name,
        session_id: view.session_id,
        session_created: view.session_created,
        status: view.status,
        namespace: view.namespace,
        directory: view.directory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waggle_core::{
        DegradedReason, LiveSession, RegistryOutcome, SessionIdentity, SessionTemplate,
        StatusRecord,
    };

    struct StaticRegistry(Vec<LiveSession>);

    impl SessionRegistry for StaticRegistry {
        fn list_sessions(&self, _template: SessionTemplate) -> RegistryOutcome {
            RegistryOutcome::Live(self.0.clone())
        }
    }

    struct DownRegistry;

    impl SessionRegistry for DownRegistry {
        fn list_sessions(&self, _template: SessionTemplate) -> RegistryOutcome {
            RegistryOutcome::Degraded(DegradedReason::NoServer)
        }
    }

    fn state_with(dir: &std::path::Path, registry: Box<dyn SessionRegistry>) -> SharedState {
        let store = Store::open(dir.join("agent_state.db")).expect("open store");
        store
            .upsert(&StatusRecord::new("n1+i1+c1", "/r1", "working"))
            .expect("seed");
        store
            .upsert(&StatusRecord::new("n2+i2+c2", "/r2", "waiting"))
            .expect("seed");
        SharedState::new(store, registry)
    }

    #[test]
    fn health_reports_record_count() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_with(dir.path(), Box::new(DownRegistry));
        let health = state.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.protocol_version, PROTOCOL_VERSION);
        assert_eq!(health.record_count, Some(2));
    }

    #[test]
    fn list_agents_returns_store_rows_with_live_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = StaticRegistry(vec![LiveSession {
            identity: SessionIdentity::new("n1", "i1", "c1"),
            directory: Some("/r1".to_string()),
        }]);
        let state = state_with(dir.path(), Box::new(registry));

        match state.list_agents(ListAgentsParams::default()) {
            ListAgentsResult::Success { agents } => {
                assert_eq!(agents.len(), 1);
                assert_eq!(agents[0].name, "n1");
                assert_eq!(agents[0].directory.as_deref(), Some("/r1"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn list_agents_store_failure_is_tool_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::attach(dir.path().join("gone").join("agent_state.db"));
        let state = SharedState::new(store, Box::new(DownRegistry));

        match state.list_agents(ListAgentsParams::default()) {
            ListAgentsResult::Error { error } => {
                assert!(error.starts_with("Failed to query database"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn delete_prefers_root_uri_over_namespace() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_with(dir.path(), Box::new(DownRegistry));

        let result = state.delete_namespace_agents(DeleteNamespaceParams {
            root_uri: Some("file:///r1".to_string()),
            namespace: Some("/r2".to_string()),
        });
        assert_eq!(result, DeleteNamespaceResult::Success { deleted_count: 1 });
        assert_eq!(state.health().record_count, Some(1));
    }

    #[test]
    fn delete_without_namespace_asks_for_one() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_with(dir.path(), Box::new(DownRegistry));

        match state.delete_namespace_agents(DeleteNamespaceParams::default()) {
            DeleteNamespaceResult::Error { error } => {
                assert!(error.contains("namespace parameter"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(state.health().record_count, Some(2));
    }
}
