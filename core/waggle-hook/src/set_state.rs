//! Status writer called on every agent state transition.
//!
//! ## Usage
//!
//! ```bash
//! waggle-hook set-state working
//! ```
//!
//! Reads the enclosing tmux session's identity, takes the shell's working
//! directory as the namespace and upserts one row. Control characters other
//! than tab and newline are stripped from the status; a status that ends up
//! blank is not written. Never fails the caller: `main` logs any error and
//! exits 0.

use std::env;
use std::path::Path;
use thiserror::Error;
use waggle_core::{
    load_config, normalize, DegradedReason, SessionIdentity, StatusRecord, Store, WaggleError,
};

const IDENTITY_FORMAT: &str = "#{session_name}\t#{session_id}\t#{session_created}";

#[derive(Error, Debug)]
pub enum SetStateError {
    #[error("No status given")]
    EmptyStatus,

    #[error("Not running inside tmux")]
    NotInTmux,

    #[error("Failed to read tmux session identity: {0}")]
    Tmux(DegradedReason),

    #[error("Unexpected tmux display-message output: {0:?}")]
    MalformedIdentity(String),

    #[error(transparent)]
    Core(#[from] WaggleError),
}

pub fn run(status: &str) -> Result<(), SetStateError> {
    let status = sanitize_status(status);
    if status.trim().is_empty() {
        return Err(SetStateError::EmptyStatus);
    }
    if env::var_os("TMUX").map_or(true, |value| value.is_empty()) {
        return Err(SetStateError::NotInTmux);
    }

    let config = load_config()?;
    let tmux = config.tmux_command();

    let mut args = vec!["display-message", "-p"];
    let pane = env::var("TMUX_PANE").ok().filter(|pane| !pane.is_empty());
    if let Some(pane) = pane.as_deref() {
        args.extend(["-t", pane]);
    }
    args.push(IDENTITY_FORMAT);

    let output = tmux
        .run(&args, config.reconcile_timeout)
        .map_err(SetStateError::Tmux)?;
    let identity = parse_identity(&output)
        .ok_or_else(|| SetStateError::MalformedIdentity(output.clone()))?;

    let cwd = env::current_dir()
        .map_err(|err| WaggleError::Io {
            context: "Failed to read current directory".to_string(),
            source: err,
        })?;
    let working_dir = shell_working_dir(env::var("PWD").ok().as_deref(), &cwd);
    let namespace = normalize(&working_dir)?;

    let store = Store::open(&config.database_path)?;
    let record = StatusRecord::new(identity.encode(), namespace, status);
    store.upsert(&record)?;

    tracing::info!(
        key = %record.key,
        namespace = %record.namespace,
        status = %record.status,
        "Recorded agent status"
    );
    Ok(())
}

/// Drops C0 control characters except tab and newline, plus DEL.
fn sanitize_status(status: &str) -> String {
    status
        .chars()
        .filter(|c| !matches!(*c, '\u{01}'..='\u{08}' | '\u{0b}'..='\u{1f}' | '\u{7f}'))
        .collect()
}

/// Parses one `name<TAB>id<TAB>created` line.
fn parse_identity(output: &str) -> Option<SessionIdentity> {
    let line = output.trim_end_matches(['\n', '\r']);
    let mut parts = line.splitn(3, '\t');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(id), Some(created)) if !name.is_empty() => {
            Some(SessionIdentity::new(name, id, created))
        }
        _ => None,
    }
}

/// `$PWD` keeps the path the shell was entered through, symlinks included,
/// which is what `pwd` prints. Fall back to the resolved cwd otherwise.
fn shell_working_dir(pwd: Option<&str>, cwd: &Path) -> String {
    match pwd {
        Some(pwd) if Path::new(pwd).is_absolute() => pwd.to_string(),
        _ => cwd.to_string_lossy().into_owned(),
    }
}
