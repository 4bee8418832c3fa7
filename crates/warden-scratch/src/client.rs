//! Blocking REST client for the remote scratch service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cookie_store::CookieStore;
use reqwest::StatusCode;
use reqwest_cookie_store::CookieStoreMutex;
use serde::Serialize;
use tracing::instrument;

use crate::error::{Result, ScratchError};
use crate::model::{
    ClaimResponse, CompilationResult, CompileRequest, CompilerInfo, DecompilationResult,
    ForkRequest, PresetInfo, Scratch, ScratchCreate, ScratchUpdate, TerseScratch,
};
use crate::tokens::TokenStore;
use crate::url_detect;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Where this client keeps per-agent state on disk, and how it finds the
/// service. Paths are the CLI's responsibility to resolve (config
/// directory, agent id); this crate only reads and writes them.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub cookie_store_path: PathBuf,
    pub claim_tokens_path: PathBuf,
    pub url_cache_path: PathBuf,
    pub candidate_base_urls: Vec<String>,
    pub explicit_base_url: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cookie_store_path: PathBuf::from("cookies.json"),
            claim_tokens_path: PathBuf::from("scratch_tokens.json"),
            url_cache_path: PathBuf::from("scratch_url_cache.json"),
            candidate_base_urls: vec!["http://localhost:8000".to_string()],
            explicit_base_url: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

pub struct ScratchClient {
    http: reqwest::blocking::Client,
    cookie_store: Arc<CookieStoreMutex>,
    cookie_store_path: PathBuf,
    tokens: TokenStore,
    base_url: String,
    max_retries: u32,
}

impl ScratchClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = url_detect::resolve_base_url(
            config.explicit_base_url.as_deref(),
            &config.candidate_base_urls,
            &config.url_cache_path,
        )?;

        let store = load_cookie_store(&config.cookie_store_path);
        let cookie_store = Arc::new(CookieStoreMutex::new(store));
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .cookie_provider(Arc::clone(&cookie_store))
            .user_agent(concat!("warden-scratch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let tokens = TokenStore::load(&config.claim_tokens_path)?;

        Ok(Self {
            http,
            cookie_store,
            cookie_store_path: config.cookie_store_path,
            tokens,
            base_url,
            max_retries: config.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn persist_cookies(&self) {
        let store = self.cookie_store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.cookie_store_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(file) = std::fs::File::create(&self.cookie_store_path) {
            let mut writer = std::io::BufWriter::new(file);
            if let Err(e) = store.save_json(&mut writer) {
                tracing::warn!("failed to persist scratch cookie jar: {e}");
            }
        }
    }

    /// Run `f` with exponential backoff on transport-level failures (not on
    /// well-formed HTTP error responses, which callers handle themselves).
    fn with_retries<T>(&self, mut f: impl FnMut() -> reqwest::Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(250 * 2u64.pow(attempt));
                    tracing::warn!("scratch request failed ({e}), retrying in {backoff:?}");
                    std::thread::sleep(backoff);
                }
                Err(e) => return Err(ScratchError::Http(e)),
            }
        }
    }

    fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::blocking::Response,
    ) -> Result<T> {
        self.persist_cookies();
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ScratchError::Api { status: status.as_u16(), body });
        }
        Ok(response.json()?)
    }

    #[instrument(skip(self, body))]
    fn post_json<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let response = self.with_retries(|| self.http.post(&url).json(body).send())?;
        self.handle_response(response)
    }

    #[instrument(skip(self))]
    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self.with_retries(|| self.http.get(&url).send())?;
        self.handle_response(response)
    }

    // --- scratch CRUD -----------------------------------------------------

    pub fn create_scratch(&mut self, body: &ScratchCreate) -> Result<Scratch> {
        let scratch: Scratch = self.post_json("/api/scratch", body)?;
        if let Some(token) = &scratch.claim_token {
            self.tokens.set(&scratch.slug, token)?;
        }
        Ok(scratch)
    }

    pub fn get_scratch(&self, slug: &str) -> Result<Scratch> {
        self.get_json(&format!("/api/scratch/{slug}"))
    }

    pub fn update_scratch(&self, slug: &str, body: &ScratchUpdate) -> Result<Scratch> {
        let url = self.url(&format!("/api/scratch/{slug}"));
        let response = self.with_retries(|| self.http.patch(&url).json(body).send())?;
        self.handle_response(response)
    }

    /// Claim ownership of `slug` using the token saved at creation time.
    /// Called proactively after a 403 on a write endpoint.
    pub fn claim_scratch(&self, slug: &str) -> Result<bool> {
        let Some(token) = self.tokens.get(slug).map(str::to_string) else {
            return Err(ScratchError::OwnershipLost { slug: slug.to_string() });
        };
        let resp: ClaimResponse =
            self.post_json(&format!("/api/scratch/{slug}/claim"), &serde_json::json!({"token": token}))?;
        Ok(resp.success)
    }

    /// Compile `slug`. `save_score = true` issues the score-recording GET;
    /// `false` issues the non-recording POST with `overrides`. On a 403,
    /// re-claims with the saved token and retries once before giving up.
    pub fn compile(&self, slug: &str, overrides: Option<&CompileRequest>, save_score: bool) -> Result<CompilationResult> {
        match self.compile_once(slug, overrides, save_score) {
            Err(ScratchError::Api { status: 403, .. }) => {
                if self.claim_scratch(slug)? {
                    self.compile_once(slug, overrides, save_score)
                } else {
                    Err(ScratchError::OwnershipLost { slug: slug.to_string() })
                }
            }
            other => other,
        }
    }

    fn compile_once(&self, slug: &str, overrides: Option<&CompileRequest>, save_score: bool) -> Result<CompilationResult> {
        let path = format!("/api/scratch/{slug}/compile");
        if save_score || overrides.is_none() {
            self.get_json(&path)
        } else {
            self.post_json(&path, overrides.unwrap_or(&CompileRequest::default()))
        }
    }

    pub fn decompile(&self, slug: &str, context: Option<&str>, compiler: Option<&str>) -> Result<DecompilationResult> {
        #[derive(Serialize)]
        struct Body<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            context: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            compiler: Option<&'a str>,
        }
        self.post_json(&format!("/api/scratch/{slug}/decompile"), &Body { context, compiler })
    }

    pub fn fork(&mut self, slug: &str, params: &ForkRequest) -> Result<Scratch> {
        let scratch: Scratch = self.post_json(&format!("/api/scratch/{slug}/fork"), params)?;
        if let Some(token) = &scratch.claim_token {
            self.tokens.set(&scratch.slug, token)?;
        }
        Ok(scratch)
    }

    pub fn family(&self, slug: &str) -> Result<Vec<TerseScratch>> {
        self.get_json(&format!("/api/scratch/{slug}/family"))
    }

    pub fn search(
        &self,
        query: Option<&str>,
        platform: Option<&str>,
        compiler: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<TerseScratch>> {
        let mut url = url::Url::parse(&self.url("/api/scratch"))?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("page_size", &page_size.min(100).to_string());
            if let Some(q) = query {
                qp.append_pair("search", q);
            }
            if let Some(p) = platform {
                qp.append_pair("platform", p);
            }
            if let Some(c) = compiler {
                qp.append_pair("compiler", c);
            }
        }
        let response = self.with_retries(|| self.http.get(url.clone()).send())?;
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Page {
            Paginated { results: Vec<TerseScratch> },
            Bare(Vec<TerseScratch>),
        }
        let page: Page = self.handle_response(response)?;
        Ok(match page {
            Page::Paginated { results } => results,
            Page::Bare(v) => v,
        })
    }

    pub fn compilers(&self) -> Result<Vec<CompilerInfo>> {
        self.get_json("/api/compiler")
    }

    pub fn presets(&self) -> Result<Vec<PresetInfo>> {
        self.get_json("/api/preset")
    }
}

fn load_cookie_store(path: &std::path::Path) -> CookieStore {
    std::fs::File::open(path)
        .ok()
        .and_then(|f| CookieStore::load_json(std::io::BufReader::new(f)).ok())
        .unwrap_or_default()
}
