//! Client helper for querying the waggle daemon.
//!
//! One request per connection. The daemon may run two tmux queries before it
//! answers a listing, so the read timeout is generous.

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use waggle_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};

const SOCKET_ENV: &str = "WAGGLE_DAEMON_SOCKET";
const READ_TIMEOUT_MS: u64 = 15_000;
const WRITE_TIMEOUT_MS: u64 = 1_000;
// Listings can be larger than any request.
const MAX_RESPONSE_BYTES: usize = MAX_REQUEST_BYTES * 16;

/// `$WAGGLE_DAEMON_SOCKET` when set, otherwise the configured path.
pub fn socket_path(configured: &Path) -> PathBuf {
    match env::var_os(SOCKET_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => configured.to_path_buf(),
    }
}

/// Sends `method` and returns the response `data`, or the transport error
/// as `code: message`.
pub fn call(socket: &Path, method: Method, params: Option<Value>) -> Result<Value, String> {
    let response = send_request(socket, Request::new(method, params))?;
    if !response.ok {
        let message = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string());
        return Err(message);
    }
    response
        .data
        .ok_or_else(|| "Daemon response had no data".to_string())
}

fn send_request(socket: &Path, request: Request) -> Result<Response, String> {
    let mut stream = UnixStream::connect(socket).map_err(|err| {
        format!(
            "Failed to connect to daemon socket {}: {}",
            socket.display(),
            err
        )
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_RESPONSE_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
