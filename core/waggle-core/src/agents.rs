//! Agent listing: persisted status joined with live tmux directories.
//!
//! The store decides which agents exist. tmux only contributes the
//! `directory` attribute, and a failed tmux query just leaves it empty.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::SessionIdentity;
use crate::reconcile::Reconciler;
use crate::registry::{RegistryOutcome, SessionRegistry, SessionTemplate};
use crate::store::{StatusRow, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFilter {
    /// Exact session name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Case-insensitive substring of the namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

impl AgentFilter {
    fn matches(&self, identity: &SessionIdentity, namespace: Option<&str>) -> bool {
        if let Some(name) = &self.name {
            if identity.name != *name {
                return false;
            }
        }
        if let Some(repo) = &self.repo {
            let Some(namespace) = namespace else {
                return false;
            };
            if !namespace.to_lowercase().contains(&repo.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentView {
    pub name: String,
    pub session_id: String,
    pub session_created: String,
    pub status: String,
    pub namespace: Option<String>,
    pub directory: Option<String>,
}

/// Lists agents in store-scan order.
///
/// Runs an orphan purge first, then reads the store. Only a store failure
/// is an error; rows with malformed keys are skipped.
pub fn list_agents(
    store: &Store,
    registry: &dyn SessionRegistry,
    filter: &AgentFilter,
) -> Result<Vec<AgentView>> {
    Reconciler::new(store, registry).run();

    let rows = store.select_all()?;
    let selected: Vec<(SessionIdentity, StatusRow)> = rows
        .into_iter()
        .filter_map(|row| match SessionIdentity::decode(&row.key) {
            Ok(identity) => Some((identity, row)),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping agent row");
                None
            }
        })
        .filter(|(identity, row)| filter.matches(identity, row.namespace.as_deref()))
        .collect();

    if selected.is_empty() {
        return Ok(Vec::new());
    }

    let directories = live_directories(registry);

    Ok(selected
        .into_iter()
        .map(|(identity, row)| {
            let directory = directories.get(&row.key).cloned();
            AgentView {
                name: identity.name,
                session_id: identity.instance_id,
                session_created: identity.created,
                status: row.status,
                namespace: row.namespace,
                directory,
            }
        })
        .collect())
}

/// Encoded key to live working directory. Empty when tmux is unavailable.
fn live_directories(registry: &dyn SessionRegistry) -> HashMap<String, String> {
    match registry.list_sessions(SessionTemplate::WithDirectory) {
        RegistryOutcome::Live(sessions) => sessions
            .into_iter()
            .filter_map(|session| {
                let directory = session.directory?;
                Some((session.identity.encode(), directory))
            })
            .collect(),
        RegistryOutcome::Degraded(reason) => {
            tracing::debug!(reason = %reason, "Directory enrichment unavailable");
            HashMap::new()
        }
    }
}
