//! Waggle daemon entrypoint.
//!
//! Answers agent status queries over a local Unix socket.
//!
//! ## Connection model
//!
//! One short-lived connection per query: the client writes a single JSON
//! request terminated by `\n`, the daemon writes a single JSON response
//! terminated by `\n` and closes. Each accepted connection runs on its own
//! thread against the shared [`SharedState`], and the store opens a fresh
//! SQLite connection per operation. Bad input is answered with an error
//! envelope; it never stops the accept loop.

use fs_err as fs;
use std::env;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use serde::Serialize;
use waggle_core::{load_config, Store};
use waggle_protocol::{
    parse_delete_namespace, parse_list_agents, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod state;

use state::SharedState;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn main() {
    init_logging();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let store = match Store::open(&config.database_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize database");
            std::process::exit(1);
        }
    };
    info!(path = %config.database_path.display(), "Database ready");

    let socket_path = config.socket_path.clone();
    let listener = match bind_socket(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        tmux = %config.tmux_binary,
        reconcile_timeout_ms = config.reconcile_timeout.as_millis() as u64,
        enrich_timeout_ms = config.enrich_timeout.as_millis() as u64,
        "Waggle daemon started"
    );

    let shared_state = Arc::new(SharedState::new(store, Box::new(config.registry())));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("WAGGLE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Binds the listening socket, replacing a stale socket left by a previous
/// run. Any other kind of file at that path is left alone.
fn bind_socket(socket_path: &Path) -> Result<UnixListener, String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent)
        .map_err(|err| format!("Failed to create socket directory: {}", err))?;

    match fs::symlink_metadata(socket_path) {
        Ok(meta) if meta.file_type().is_socket() => fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove stale socket: {}", err))?,
        Ok(_) => return Err("Path exists and is not a socket".to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(format!("Failed to inspect socket path: {}", err)),
    }

    UnixListener::bind(socket_path).map_err(|err| err.to_string())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let response = match read_request(&stream) {
        Ok(request) => {
            debug!(method = ?request.method, id = ?request.id, "Daemon request received");
            handle_request(request, &state)
        }
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            Response::error_with_info(None, err)
        }
    };

    if let Err(err) = write_response(&mut stream, &response) {
        debug!(error = %err, "Client went away before the response was written");
    }
}

/// Reads one request line, at most `MAX_REQUEST_BYTES` long.
fn read_request(stream: &UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

    let mut line = Vec::new();
    let mut reader = BufReader::new(stream).take(MAX_REQUEST_BYTES as u64 + 1);
    reader
        .read_until(b'\n', &mut line)
        .map_err(|err| match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                ErrorInfo::new("read_timeout", "request timed out")
            }
            _ => ErrorInfo::new("read_error", format!("failed to read request: {}", err)),
        })?;

    let body = line.strip_suffix(b"\n").unwrap_or(line.as_slice());
    if body.len() > MAX_REQUEST_BYTES {
        return Err(ErrorInfo::new(
            "request_too_large",
            "request exceeded maximum size",
        ));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(body).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => to_response(request.id, &state.health()),
        Method::ListAgents => match parse_list_agents(request.params) {
            Ok(params) => to_response(request.id, &state.list_agents(params)),
            Err(err) => Response::error_with_info(request.id, err),
        },
        Method::DeleteNamespaceAgents => match parse_delete_namespace(request.params) {
            Ok(params) => to_response(request.id, &state.delete_namespace_agents(params)),
            Err(err) => Response::error_with_info(request.id, err),
        },
    }
}

fn to_response<T: Serialize>(id: Option<String>, data: &T) -> Response {
    match serde_json::to_value(data) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    stream.write_all(&payload)?;
    stream.flush()
}
