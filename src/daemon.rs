//! The daemon mode: a Unix-domain-socket server that accepts one-shot JSON
//! command envelopes and answers with JSON responses, so a long-lived
//! process can back operations where re-opening the state database and
//! re-authenticating per CLI invocation would be wasteful.
//!
//! One blocking accept loop, one thread per connection — each connection
//! carries exactly one request/response pair before it's closed, so there
//! is no need for an event loop or an async runtime here.

use std::io::{BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::WardenError;

/// One command envelope read from a connection: a command name and its
/// arguments, shaped the same as the equivalent CLI subcommand.
#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl Response {
    #[must_use]
    pub fn ok(result: serde_json::Value) -> Self {
        Self { success: true, result: Some(result), error: None }
    }

    #[must_use]
    pub fn err(err: &WardenError) -> Self {
        Self { success: false, result: None, error: Some(ErrorPayload { message: err.to_string() }) }
    }
}

/// The default socket path, under the OS temp directory, namespaced by an
/// identifier (typically the repository root's hash or name) so unrelated
/// projects on the same machine don't collide.
#[must_use]
pub fn default_socket_path(namespace: &str) -> PathBuf {
    std::env::temp_dir().join(format!("warden-{namespace}.sock"))
}

/// A bound, not-yet-serving daemon socket.
pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl DaemonServer {
    /// Bind a fresh socket at `socket_path`, removing a stale file left
    /// behind by a previous, uncleanly-terminated daemon.
    pub fn bind(socket_path: &Path) -> Result<Self, WardenError> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        Ok(Self { listener, socket_path: socket_path.to_owned() })
    }

    /// A socket at `socket_path` that already has a daemon listening on
    /// it and will answer requests. A stale, unlinked socket file reads as
    /// "not live" rather than erroring.
    #[must_use]
    pub fn is_live(socket_path: &Path) -> bool {
        UnixStream::connect(socket_path).is_ok()
    }

    /// Serve forever, dispatching each connection's single request to
    /// `handler` on its own thread. `handler` must be safe to call from
    /// multiple threads concurrently (it owns its own synchronization over
    /// the state database, e.g. one `Store` connection per call, or a
    /// shared `Mutex<Store>`).
    pub fn serve<F>(&self, handler: F) -> Result<(), WardenError>
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        let handler = std::sync::Arc::new(handler);
        for conn in self.listener.incoming() {
            let stream = match conn {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "daemon: failed to accept connection");
                    continue;
                }
            };
            let handler = std::sync::Arc::clone(&handler);
            std::thread::spawn(move || {
                if let Err(err) = serve_one(stream, handler.as_ref()) {
                    tracing::warn!(error = %err, "daemon: connection failed");
                }
            });
        }
        Ok(())
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn serve_one(mut stream: UnixStream, handler: &(impl Fn(Request) -> Response + ?Sized)) -> Result<(), WardenError> {
    let mut body = String::new();
    BufReader::new(stream.try_clone()?).read_to_string(&mut body)?;

    let response = match serde_json::from_str::<Request>(&body) {
        Ok(request) => handler(request),
        Err(err) => Response {
            success: false,
            result: None,
            error: Some(ErrorPayload { message: format!("malformed request: {err}") }),
        },
    };

    let payload = serde_json::to_vec(&response).unwrap_or_else(|_| b"{\"success\":false}".to_vec());
    stream.write_all(&payload)?;
    stream.shutdown(std::net::Shutdown::Write)?;
    Ok(())
}

/// Send a single request to a live daemon and wait for its response, the
/// client half used by the CLI layer when it finds the socket live.
pub fn send_request(socket_path: &Path, request: &Request) -> Result<Response, WardenError> {
    let mut stream = UnixStream::connect(socket_path)?;
    let body = serde_json::to_vec(request).map_err(|err| WardenError::ConfigError {
        path: socket_path.to_owned(),
        detail: format!("failed to encode daemon request: {err}"),
    })?;
    stream.write_all(&body)?;
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    serde_json::from_str(&reply).map_err(|err| WardenError::ConfigError {
        path: socket_path.to_owned(),
        detail: format!("malformed daemon response: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_path_is_namespaced() {
        let path = default_socket_path("abc123");
        assert!(path.to_string_lossy().contains("warden-abc123.sock"));
    }

    #[test]
    fn is_live_false_for_nonexistent_socket() {
        let path = std::env::temp_dir().join("warden-test-nonexistent-socket.sock");
        let _ = std::fs::remove_file(&path);
        assert!(!DaemonServer::is_live(&path));
    }

    #[test]
    fn round_trip_over_socket() {
        let path = std::env::temp_dir().join(format!("warden-test-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let server = DaemonServer::bind(&path).unwrap();
        let socket_path = path.clone();

        let join = std::thread::spawn(move || {
            for conn in server.listener.incoming().take(1) {
                let stream = conn.unwrap();
                serve_one(stream, &|req: Request| {
                    assert_eq!(req.command, "ping");
                    Response::ok(serde_json::json!({"pong": true}))
                })
                .unwrap();
            }
        });

        // `bind` already puts the socket in the listen backlog, so `connect`
        // can succeed before the spawned thread reaches `accept`.
        let response = send_request(&socket_path, &Request { command: "ping".to_owned(), args: serde_json::Value::Null })
            .unwrap();
        assert!(response.success);
        assert_eq!(response.result, Some(serde_json::json!({"pong": true})));

        join.join().unwrap();
        let _ = std::fs::remove_file(&socket_path);
    }
}
