//! # waggle-core
//!
//! Tracks what each tmux-hosted agent is doing. A hook writes one status row
//! per session into SQLite; this crate reads those rows back, purges rows
//! whose session is gone, joins the rest with live tmux data and deletes
//! rows by project directory.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Callers own their threading.
//! - **No shared state**: Each store operation opens its own connection; SQLite's
//!   file locking is the only synchronization between the daemon and hook processes.
//! - **Graceful degradation**: tmux being missing, empty or slow never fails a call.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use waggle_core::{list_agents, load_config, AgentFilter, Store};
//!
//! let config = load_config()?;
//! let store = Store::open(&config.database_path)?;
//! let agents = list_agents(&store, &config.registry(), &AgentFilter::default())?;
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod identity;
pub mod namespace;
pub mod reconcile;
pub mod registry;
pub mod store;

pub use agents::{list_agents, AgentFilter, AgentView};
pub use config::{load_config, load_config_from, waggle_dir, WaggleConfig};
pub use error::{Result, WaggleError};
pub use identity::{IdentityError, SessionIdentity, KEY_DELIMITER};
pub use namespace::{decode_root_uri, delete_namespace, normalize, resolve_namespace};
pub use reconcile::{ReconcileReport, Reconciler};
pub use registry::{
    DegradedReason, LiveSession, RegistryOutcome, SessionRegistry, SessionTemplate, TmuxCommand,
    TmuxRegistry,
};
pub use store::{StatusRecord, StatusRow, Store};
