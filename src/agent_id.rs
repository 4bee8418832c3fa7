//! Agent ID derivation.
//!
//! Per-agent data — HTTP session cookies, scratch-ownership tokens,
//! match-history cache — must not cross-contaminate between concurrent
//! orchestrator sessions sharing one state-store file. The ID is derived
//! by walking the invoking process's ancestor chain and picking the
//! outermost orchestrator process, so every CLI invocation started under
//! the same orchestrator session resolves to the same ID.

use std::time::Duration;

use warden_core::model::AgentId;

const MAX_ANCESTOR_HOPS: u32 = 10;
const ORCHESTRATOR_PROCESS_NAMES: [&str; 1] = ["claude"];

/// Resolve the Agent ID for the current process: an explicit
/// `WARDEN_AGENT_ID` env var wins outright; otherwise walk `ps`-reported
/// parent PIDs looking for an orchestrator process; fall back to the
/// immediate parent PID if none is found.
#[must_use]
pub fn derive() -> AgentId {
    derive_with_env(std::env::var("WARDEN_AGENT_ID").ok())
}

fn derive_with_env(explicit: Option<String>) -> AgentId {
    if let Some(explicit) = explicit
        && let Ok(id) = AgentId::new(explicit)
    {
        return id;
    }

    let mut pid = std::process::id();
    let mut outermost_orchestrator: Option<u32> = None;
    for _ in 0..MAX_ANCESTOR_HOPS {
        let Some((ppid, comm)) = ps_ppid_comm(pid) else { break };
        if ORCHESTRATOR_PROCESS_NAMES.iter().any(|name| comm.to_lowercase().contains(name)) {
            outermost_orchestrator = Some(pid);
        }
        pid = ppid;
    }

    match outermost_orchestrator {
        Some(pid) => AgentId::new(format!("claude{pid}")).unwrap_or_else(|_| fallback_id()),
        None => fallback_id(),
    }
}

/// Falls back to this process's own parent PID when no ancestor looks like
/// an orchestrator, reusing the same `ps` lookup rather than an FFI call.
fn fallback_id() -> AgentId {
    let ppid = ps_ppid_comm(std::process::id())
        .map(|(ppid, _)| ppid)
        .unwrap_or(0);
    AgentId::new(format!("ppid{ppid}")).unwrap_or_else(|_| AgentId::new("unknown-agent").expect("static id is valid"))
}

/// Shell out to `ps` for one process's parent PID and command name.
fn ps_ppid_comm(pid: u32) -> Option<(u32, String)> {
    let output = crate::exec::run(
        "ps",
        &["-p", &pid.to_string(), "-o", "ppid=,comm="],
        std::path::Path::new("."),
        Duration::from_secs(1),
    )
    .ok()?;
    if !output.success() {
        return None;
    }
    let trimmed = output.stdout.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let ppid: u32 = parts.next()?.parse().ok()?;
    let comm = parts.next().unwrap_or_default().trim().to_string();
    Some((ppid, comm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_env_var_takes_priority() {
        let id = derive_with_env(Some("claude-explicit-1".to_owned()));
        assert_eq!(id.as_str(), "claude-explicit-1");
    }

    #[test]
    fn invalid_explicit_env_var_falls_through_to_process_walk() {
        // whitespace is rejected by AgentId, so this must not short-circuit
        // on the explicit value and must still produce *some* id.
        let id = derive_with_env(Some("has whitespace".to_owned()));
        assert!(!id.as_str().is_empty());
    }
}
