//! Base-URL auto-detection and caching ("URL auto-detection").
//!
//! The client tries an ordered candidate list, caches the first URL that
//! answers, and re-probes after the cache entry goes stale.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScratchError};

const CACHE_TTL_SECS: i64 = 3600;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    base_url: String,
    cached_at: DateTime<Utc>,
}

/// Resolve the scratch service's base URL: an explicit override wins
/// outright; otherwise a fresh cache entry is reused; otherwise each
/// candidate is probed in order and the first to answer is cached.
pub fn resolve_base_url(
    explicit: Option<&str>,
    candidates: &[String],
    cache_path: &Path,
) -> Result<String> {
    if let Some(url) = explicit {
        return Ok(url.trim_end_matches('/').to_string());
    }

    if let Some(entry) = read_cache(cache_path) {
        if Utc::now().signed_duration_since(entry.cached_at).num_seconds() < CACHE_TTL_SECS {
            return Ok(entry.base_url);
        }
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()?;
    for candidate in candidates {
        let trimmed = candidate.trim_end_matches('/');
        if client.get(trimmed).send().is_ok() {
            write_cache(cache_path, trimmed);
            return Ok(trimmed.to_string());
        }
    }
    Err(ScratchError::NoBaseUrlAvailable)
}

fn read_cache(path: &Path) -> Option<CacheEntry> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_cache(path: &Path, base_url: &str) {
    let entry = CacheEntry { base_url: base_url.to_string(), cached_at: Utc::now() };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(raw) = serde_json::to_string(&entry) {
        let _ = std::fs::write(path, raw);
    }
}

#[must_use]
pub fn default_cache_path(config_dir: &Path) -> PathBuf {
    config_dir.join("scratch_url_cache.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_url_always_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache.json");
        let resolved =
            resolve_base_url(Some("https://example.test/"), &[], &cache).unwrap();
        assert_eq!(resolved, "https://example.test");
    }

    #[test]
    fn no_candidates_and_no_cache_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache.json");
        let err = resolve_base_url(None, &[], &cache).unwrap_err();
        assert!(matches!(err, ScratchError::NoBaseUrlAvailable));
    }
}
