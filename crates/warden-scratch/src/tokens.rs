//! Per-agent claim-token persistence (`scratch_tokens_<agent>.json`).
//!
//! A scratch's `claim_token` is only returned once, on creation; the client
//! must remember it locally to re-claim ownership after a session expires.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    tokens: HashMap<String, String>,
}

impl TokenStore {
    pub fn load(path: &Path) -> Result<Self> {
        let tokens = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self { path: path.to_path_buf(), tokens })
    }

    #[must_use]
    pub fn get(&self, slug: &str) -> Option<&str> {
        self.tokens.get(slug).map(String::as_str)
    }

    pub fn set(&mut self, slug: &str, token: &str) -> Result<()> {
        self.tokens.insert(slug.to_string(), token.to_string());
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.tokens)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let mut store = TokenStore::load(&path).unwrap();
        store.set("abcd", "secret-token").unwrap();

        let reloaded = TokenStore::load(&path).unwrap();
        assert_eq!(reloaded.get("abcd"), Some("secret-token"));
        assert_eq!(reloaded.get("missing"), None);
    }
}
