//! Layered configuration: built-in defaults, then `config.toml`, then
//! environment variables; the CLI layer applies explicit flags on top of
//! whatever this returns.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WardenConfig {
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// Path to the decompilation project's root, relative paths resolved
    /// against the current directory.
    #[serde(default = "default_repo_root")]
    pub root: PathBuf,

    /// Default claim TTL in seconds, used when a CLI caller doesn't
    /// override it.
    #[serde(default = "default_claim_ttl_secs")]
    pub default_claim_ttl_secs: i64,

    /// Number of consecutive broken builds in one worktree before
    /// `state status` flags it for attention.
    #[serde(default = "default_broken_build_threshold")]
    pub broken_build_threshold: u32,

    /// Path to the build-config source file, relative to `root`.
    #[serde(default = "default_build_config_path")]
    pub build_config_path: PathBuf,

    /// Compiler identifier passed to new scratches, e.g. `mwcc_247_108`.
    #[serde(default = "default_compiler")]
    pub default_compiler: String,

    /// Compiler flags passed to new scratches.
    #[serde(default)]
    pub default_compiler_flags: String,

    /// Target platform identifier passed to new scratches, e.g. `gc_wii`.
    #[serde(default = "default_platform")]
    pub default_platform: String,

    /// Run newly created, still-empty scratches through the remote
    /// decompiler before handing them to the agent. Off by default since
    /// decompiler availability is an external-service detail (§9, Open
    /// Question: decompiler availability).
    #[serde(default)]
    pub decompile_on_create: bool,

    /// `-I` directories passed to the system preprocessor when building
    /// the decompiler-only context (§4.4 "Preprocessor handling").
    #[serde(default)]
    pub preprocessor_include_dirs: Vec<PathBuf>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            root: default_repo_root(),
            default_claim_ttl_secs: default_claim_ttl_secs(),
            broken_build_threshold: default_broken_build_threshold(),
            build_config_path: default_build_config_path(),
            default_compiler: default_compiler(),
            default_compiler_flags: String::new(),
            default_platform: default_platform(),
            decompile_on_create: false,
            preprocessor_include_dirs: Vec::new(),
        }
    }
}

fn default_build_config_path() -> PathBuf {
    PathBuf::from("config/GALE01/build.config")
}

fn default_compiler() -> String {
    "mwcc_247_108".to_owned()
}

fn default_platform() -> String {
    "gc_wii".to_owned()
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

const fn default_claim_ttl_secs() -> i64 {
    3600
}

const fn default_broken_build_threshold() -> u32 {
    3
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".warden/state.db")
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScratchConfig {
    /// Ordered candidate base URLs to probe when no explicit URL is set.
    #[serde(default = "default_scratch_urls")]
    pub candidate_urls: Vec<String>,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self { candidate_urls: default_scratch_urls() }
    }
}

fn default_scratch_urls() -> Vec<String> {
    vec!["http://localhost:8000".to_string(), "https://decomp.me".to_string()]
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    #[serde(default = "default_ninja_timeout")]
    pub ninja_secs: u64,
    #[serde(default = "default_git_timeout")]
    pub git_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ninja_secs: default_ninja_timeout(),
            git_secs: default_git_timeout(),
            http_secs: default_http_timeout(),
        }
    }
}

const fn default_ninja_timeout() -> u64 {
    120
}

const fn default_git_timeout() -> u64 {
    30
}

const fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug)]
pub struct ConfigError {
    pub path: Option<PathBuf>,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl WardenConfig {
    /// Load from `path`, falling back to all defaults if the file is
    /// absent. A malformed file (bad TOML or an unknown field) is a user
    /// error, never a panic.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        let mut config = Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError { path: None, message }
        })
    }

    /// Environment variables take precedence over the file, but still
    /// under whatever explicit CLI flags the caller applies afterward.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WARDEN_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WARDEN_SCRATCH_URL") {
            self.scratch.candidate_urls = vec![v];
        }
        if let Ok(v) = std::env::var("WARDEN_REPO_ROOT") {
            self.repo.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WARDEN_CLAIM_TTL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.repo.default_claim_ttl_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = WardenConfig::load(Path::new("/nonexistent/warden/config.toml")).unwrap();
        assert_eq!(cfg, WardenConfig::default());
    }

    #[test]
    fn parses_partial_overrides() {
        let cfg = WardenConfig::parse(
            r#"
            [database]
            path = "/tmp/custom.db"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/custom.db"));
        assert_eq!(cfg.repo.default_claim_ttl_secs, 3600);
    }

    #[test]
    fn unknown_field_is_a_user_error_with_line_number() {
        let err = WardenConfig::parse("bogus_key = 1\n").unwrap_err();
        assert!(err.message.contains("line 1"));
    }
}
