//! The extractor boundary ("Deliberately OUT of scope"): resolving a
//! function name to its source file and entry-point address is the job of
//! the project's splits/symbols parsers, which this system treats as an
//! external collaborator rather than reimplementing.
//!
//! [`SplitsMap`] is the narrow port the Workflow Driver and Commit Applier
//! need from that collaborator. [`JsonSplitsMap`] is a thin adapter over
//! whatever JSON artifact the extractor produces — it does not parse the
//! project's native `splits.txt`/`symbols.txt`/`configure.py` formats
//! itself, only the already-resolved name-to-file-and-address mapping.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::WardenError;

/// Resolves a function name to the source file that defines (or should
/// define) it, and to its entry-point address.
pub trait SplitsMap {
    fn source_file_for(&self, function: &str) -> Option<String>;
    fn address_for(&self, function: &str) -> Option<u32>;
}

#[derive(Clone, Debug, Deserialize)]
struct SplitsEntry {
    source_file: String,
    #[serde(default)]
    address: Option<u32>,
}

/// A [`SplitsMap`] backed by a JSON file of `{function_name: {source_file,
/// address}}`, the shape the extractor's function-to-file lookup produces,
/// re-expressed here as a static artifact rather than a live parse.
#[derive(Clone, Debug, Default)]
pub struct JsonSplitsMap {
    entries: HashMap<String, SplitsEntry>,
}

impl JsonSplitsMap {
    pub fn load(path: &Path) -> Result<Self, WardenError> {
        let contents = std::fs::read_to_string(path)?;
        let entries: HashMap<String, SplitsEntry> =
            serde_json::from_str(&contents).map_err(|e| WardenError::ConfigError {
                path: path.to_owned(),
                detail: format!("malformed splits map: {e}"),
            })?;
        Ok(Self { entries })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl SplitsMap for JsonSplitsMap {
    fn source_file_for(&self, function: &str) -> Option<String> {
        self.entries.get(function).map(|e| e.source_file.clone())
    }

    fn address_for(&self, function: &str) -> Option<u32> {
        self.entries.get(function).and_then(|e| e.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_resolves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits_map.json");
        std::fs::write(
            &path,
            r#"{"lbRefract_800225D4": {"source_file": "melee/lb/lbrefract.c", "address": 2148040916}}"#,
        )
        .unwrap();
        let map = JsonSplitsMap::load(&path).unwrap();
        assert_eq!(map.source_file_for("lbRefract_800225D4").as_deref(), Some("melee/lb/lbrefract.c"));
        assert_eq!(map.address_for("lbRefract_800225D4"), Some(0x800225D4));
    }

    #[test]
    fn missing_function_resolves_to_none() {
        let map = JsonSplitsMap::empty();
        assert_eq!(map.source_file_for("Unknown_80000000"), None);
    }
}
