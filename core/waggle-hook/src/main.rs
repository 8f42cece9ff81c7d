//! waggle-hook: status writer and query client for Waggle.
//!
//! ## Subcommands
//!
//! - `set-state`: Record the current tmux session's status (called by agent hooks)
//! - `list`: Ask the daemon for live agents
//! - `delete-namespace`: Ask the daemon to drop every agent under a directory

mod daemon_client;
mod logging;
mod set_state;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use waggle_protocol::{DeleteNamespaceParams, ListAgentsParams, Method};

#[derive(Parser)]
#[command(name = "waggle-hook")]
#[command(about = "Waggle agent status writer and client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a status for the enclosing tmux session
    SetState {
        /// Free-form status, e.g. "working" or "waiting". Nothing is written without one.
        #[arg(value_name = "STATUS")]
        status: Option<String>,
    },

    /// List agents known to the daemon
    List {
        /// Only the session with exactly this name
        #[arg(long)]
        name: Option<String>,

        /// Only agents whose directory contains this text (case-insensitive)
        #[arg(long)]
        repo: Option<String>,
    },

    /// Delete agent records for a directory and everything beneath it
    DeleteNamespace {
        /// Directory to clear (defaults to the current directory)
        #[arg(value_name = "PATH")]
        path: Option<String>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::SetState { status } => {
            // Status writes are non-critical: log errors but exit 0 to not disrupt the agent
            if let Err(e) = set_state::run(status.as_deref().unwrap_or_default()) {
                tracing::warn!(error = %e, "waggle-hook set-state failed");
            }
        }
        Commands::List { name, repo } => {
            let params = ListAgentsParams { name, repo };
            exit_with(query(Method::ListAgents, serde_json::to_value(params).ok()));
        }
        Commands::DeleteNamespace { path } => {
            let raw = path.unwrap_or_else(|| ".".to_string());
            // The daemon resolves relative paths against its own cwd, so send an absolute one.
            let namespace = match waggle_core::normalize(&raw) {
                Ok(namespace) => namespace,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            };
            let params = DeleteNamespaceParams {
                root_uri: None,
                namespace: Some(namespace),
            };
            exit_with(query(
                Method::DeleteNamespaceAgents,
                serde_json::to_value(params).ok(),
            ));
        }
    }
}

fn query(method: Method, params: Option<Value>) -> Result<Value, String> {
    let config = waggle_core::load_config().map_err(|e| e.to_string())?;
    let socket = daemon_client::socket_path(&config.socket_path);
    daemon_client::call(&socket, method, params)
}

/// Prints the tool result. Exits non-zero on transport or tool failure.
fn exit_with(result: Result<Value, String>) {
    match result {
        Ok(data) => {
            let pretty = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
            println!("{}", pretty);
            if data.get("status") == Some(&json!("error")) {
                std::process::exit(1);
            }
        }
        Err(message) => {
            tracing::warn!(error = %message, "waggle-hook query failed");
            eprintln!("{}", message);
            std::process::exit(1);
        }
    }
}
