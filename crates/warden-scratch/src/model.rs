//! Wire DTOs for the remote scratch service. Response structs tolerate
//! unknown extra fields (serde's default, no `deny_unknown_fields`);
//! request structs only serialize the fields they declare.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub is_anonymous: bool,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_admin: bool,
}

/// Body of `POST /api/scratch`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ScratchCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub compiler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub compiler_flags: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default)]
    pub target_asm: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub diff_label: String,
}

/// The full scratch resource, returned from create/get/update/fork.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scratch {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub compiler: String,
    pub platform: String,
    pub compiler_flags: String,
    #[serde(default)]
    pub diff_flags: Vec<String>,
    pub source_code: String,
    pub context: String,
    #[serde(default)]
    pub diff_label: String,
    /// -1 if it doesn't compile, 0 for a perfect match, otherwise diff bytes.
    pub score: i64,
    pub max_score: i64,
    #[serde(default)]
    pub match_override: bool,
    #[serde(default)]
    pub libraries: Vec<Library>,
    pub parent: Option<String>,
    pub owner: Option<Profile>,
    pub language: Option<String>,
    /// Present only on the response to scratch creation.
    pub claim_token: Option<String>,
}

impl Scratch {
    #[must_use]
    pub fn match_percent(&self) -> f64 {
        crate::score_to_match_percent(self.score, self.max_score)
    }
}

/// Minimal scratch shape used in listing/family/search responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerseScratch {
    pub slug: String,
    pub name: String,
    pub owner: Option<Profile>,
    pub platform: String,
    pub compiler: String,
    pub score: i64,
    pub max_score: i64,
    #[serde(default)]
    pub match_override: bool,
    pub parent: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiffRow {
    pub key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiffOutput {
    pub arch_str: String,
    pub current_score: i64,
    pub max_score: i64,
    #[serde(default)]
    pub rows: Vec<DiffRow>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilationResult {
    pub success: bool,
    #[serde(default)]
    pub compiler_output: String,
    pub diff_output: Option<DiffOutput>,
    #[serde(default)]
    pub left_object: Option<String>,
    #[serde(default)]
    pub right_object: Option<String>,
}

impl CompilationResult {
    #[must_use]
    pub fn score(&self) -> i64 {
        self.diff_output.as_ref().map_or(-1, |d| d.current_score)
    }

    #[must_use]
    pub fn max_score(&self) -> i64 {
        self.diff_output.as_ref().map_or(-1, |d| d.max_score)
    }

    #[must_use]
    pub fn is_perfect(&self) -> bool {
        self.success && self.score == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecompilationResult {
    pub decompilation: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilerInfo {
    pub id: String,
    pub name: String,
    pub platform: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresetInfo {
    pub id: serde_json::Value,
    pub name: String,
    pub platform: String,
    pub compiler: String,
    pub compiler_flags: String,
}

/// Body of `PATCH /api/scratch/{slug}`; only set fields are serialized, and
/// the service rejects unrecognized fields, so this carries no catch-all.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ScratchUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_flags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_flags: Option<Vec<String>>,
}

/// Body of `POST`/`GET` `/api/scratch/{slug}/compile` overrides.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CompileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_flags: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ForkRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_flags: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ClaimResponse {
    #[serde(default)]
    pub success: bool,
}
