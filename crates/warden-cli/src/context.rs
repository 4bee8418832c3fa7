//! Assembling a [`CliContext`] from configuration, environment, and
//! command-line overrides — the plumbing every subcommand shares.

use std::path::{Path, PathBuf};
use std::time::Duration;

use warden::agent_id;
use warden::config::WardenConfig;
use warden::error::WardenError;
use warden::splits::JsonSplitsMap;
use warden::workflow::{WorkflowConfig, WorkflowDriver};
use warden_core::Store;
use warden_core::model::AgentId;
use warden_scratch::{ClientConfig, ScratchClient};

/// `~/.config/warden`, created if absent.
pub fn config_dir() -> Result<PathBuf, WardenError> {
    let home = std::env::var_os("HOME").ok_or_else(|| WardenError::ConfigError {
        path: PathBuf::new(),
        detail: "HOME is not set; cannot locate the config directory".to_owned(),
    })?;
    let dir = PathBuf::from(home).join(".config").join("warden");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Flags the top-level CLI parser collects before any subcommand runs,
/// carried here to keep [`CliContext::build`]'s signature stable as
/// subcommands are added.
#[derive(Clone, Debug, Default)]
pub struct ContextOverrides {
    pub config_path: Option<PathBuf>,
    pub splits_path: Option<PathBuf>,
    pub scratch_url: Option<String>,
    pub repo_root: Option<PathBuf>,
}

/// Everything a subcommand needs: an open store connection, a scratch
/// client, the splits lookup, this invocation's agent id, and the resolved
/// configuration.
pub struct CliContext {
    pub store: Store,
    pub scratch: ScratchClient,
    pub splits: JsonSplitsMap,
    pub agent: AgentId,
    pub config: WardenConfig,
    pub workflow_config: WorkflowConfig,
}

impl CliContext {
    /// Load configuration, open the state store, and construct a scratch
    /// client, applying `overrides` on top of the config file and
    /// environment. Touches the `agents` registry row for this invocation's
    /// agent id.
    pub fn build(overrides: &ContextOverrides) -> Result<Self, WardenError> {
        let cfg_dir = config_dir()?;
        let config_path =
            overrides.config_path.clone().unwrap_or_else(|| cfg_dir.join("config.toml"));
        let mut config = WardenConfig::load(&config_path)?;

        if let Some(root) = &overrides.repo_root {
            config.repo.root = root.clone();
        }

        let agent = agent_id::derive();

        let db_path = if config.database.path.is_absolute() {
            config.database.path.clone()
        } else {
            config.repo.root.join(&config.database.path)
        };
        let mut store = Store::open(&db_path)?;
        store.touch_agent(&agent, Some(&config.repo.root.display().to_string()), None)?;

        let splits = match &overrides.splits_path {
            Some(p) => JsonSplitsMap::load(p)?,
            None => JsonSplitsMap::empty(),
        };

        let explicit_base_url = overrides
            .scratch_url
            .clone()
            .or_else(|| std::env::var("WARDEN_SCRATCH_URL").ok());
        let candidate_base_urls = if config.scratch.candidate_urls.is_empty() {
            vec!["http://localhost:8000".to_owned()]
        } else {
            config.scratch.candidate_urls.clone()
        };

        let scratch = ScratchClient::new(ClientConfig {
            cookie_store_path: cfg_dir.join(format!("cookies_{}.json", agent.as_str())),
            claim_tokens_path: cfg_dir.join(format!("scratch_tokens_{}.json", agent.as_str())),
            url_cache_path: cfg_dir.join("scratch_url_cache.json"),
            candidate_base_urls,
            explicit_base_url,
            timeout: Duration::from_secs(config.timeouts.http_secs),
            max_retries: 3,
        })?;

        let workflow_config = WorkflowConfig {
            worktree_path: config.repo.root.clone(),
            build_config_path: config.repo.build_config_path.clone(),
            ninja_timeout: Duration::from_secs(config.timeouts.ninja_secs),
            git_timeout: Duration::from_secs(config.timeouts.git_secs),
            claim_ttl_secs: config.repo.default_claim_ttl_secs,
            broken_build_threshold: config.repo.broken_build_threshold,
            compiler: config.repo.default_compiler.clone(),
            compiler_flags: config.repo.default_compiler_flags.clone(),
            platform: config.repo.default_platform.clone(),
            decompile_on_create: config.repo.decompile_on_create,
            preprocessor_include_dirs: config.repo.preprocessor_include_dirs.clone(),
        };

        Ok(Self { store, scratch, splits, agent, config, workflow_config })
    }

    /// Match-history cache path for this invocation's agent, per the
    /// per-agent-file naming convention.
    pub fn match_history_path(&self) -> Result<PathBuf, WardenError> {
        Ok(config_dir()?.join(format!("match_history_{}.json", self.agent.as_str())))
    }

    /// Borrow the pieces a [`WorkflowDriver`] needs for one call.
    pub fn driver(&mut self) -> WorkflowDriver<'_> {
        WorkflowDriver {
            store: &mut self.store,
            scratch: &mut self.scratch,
            splits: &self.splits,
            agent: self.agent.clone(),
            config: self.workflow_config.clone(),
        }
    }

    pub fn build_config_full_path(&self) -> PathBuf {
        self.config.repo.root.join(&self.config.repo.build_config_path)
    }

    pub fn source_full_path(&self, relative: &Path) -> PathBuf {
        self.config.repo.root.join(relative)
    }
}
