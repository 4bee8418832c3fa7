//! `daemon start` / `daemon status` — the long-lived, socket-served variant
//! of the same commands every other module exposes.

use serde_json::Value;
use warden::daemon::{DaemonServer, Request, Response};
use warden::error::WardenError;

use crate::commands;
use crate::context::{CliContext, ContextOverrides};

/// Bind `socket_path` and serve requests until the process is killed. Each
/// request opens its own [`CliContext`] (its own store connection), since a
/// decompilation session is expected to sit idle between agent turns far
/// longer than a store open costs.
pub fn start(socket_path: &std::path::Path, overrides: ContextOverrides) -> Result<(), WardenError> {
    let server = DaemonServer::bind(socket_path)?;
    tracing::info!(path = %socket_path.display(), "daemon: listening");
    server.serve(move |request| dispatch(&overrides, request))
}

fn dispatch(overrides: &ContextOverrides, request: Request) -> Response {
    match handle(overrides, &request) {
        Ok(value) => Response::ok(value),
        Err(err) => Response::err(&err),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, WardenError> {
    serde_json::to_value(value).map_err(|err| WardenError::ConfigError {
        path: std::path::PathBuf::new(),
        detail: format!("failed to encode daemon response: {err}"),
    })
}

fn handle(overrides: &ContextOverrides, request: &Request) -> Result<Value, WardenError> {
    let mut ctx = CliContext::build(overrides)?;
    let args = &request.args;
    let arg_str = |key: &str| -> Option<String> { args.get(key).and_then(Value::as_str).map(str::to_owned) };
    let require = |key: &str| -> Result<String, WardenError> {
        arg_str(key).ok_or_else(|| WardenError::ConfigError {
            path: std::path::PathBuf::new(),
            detail: format!("daemon request `{}` missing required arg `{key}`", request.command),
        })
    };

    match request.command.as_str() {
        "extract.get" => {
            let name = require("name")?;
            let create_scratch = args.get("create_scratch").and_then(Value::as_bool).unwrap_or(false);
            to_value(commands::extract::get(&mut ctx, &name, create_scratch)?)
        }
        "claim.add" => to_value(commands::claim::add(&mut ctx, &require("name")?)?),
        "claim.release" => {
            let force = args.get("force").and_then(Value::as_bool).unwrap_or(false);
            to_value(commands::claim::release(&mut ctx, &require("name")?, force)?)
        }
        "worktree.status" => to_value(commands::worktree::status(&ctx)?),
        "state.status" => to_value(commands::state::status(&ctx)?),
        other => Err(WardenError::ConfigError {
            path: std::path::PathBuf::new(),
            detail: format!("unknown daemon command `{other}`"),
        }),
    }
}
