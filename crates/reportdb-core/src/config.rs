//! Layered configuration and path helpers.
//!
//! Uses Figment to merge built-in defaults + `reportdb.toml` +
//! `reportdb.<env>.toml` + `APP_*` env vars (nested keys split on `__`, e.g.
//! `APP_RETRIEVAL__TOP_K=8`). Provides helpers to expand `~` and `${VAR}`
//! and to resolve relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("reportdb.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("reportdb.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("reportdb.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("reportdb.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment, env_name: env_name.to_string() })
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extract and validate the typed settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(format!("Failed to extract settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub provider: ProviderSettings,
    pub cache: CacheSettings,
    pub data: DataSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.max_tokens == 0 || c.overlap_tokens >= c.max_tokens {
            return Err(Error::InvalidConfig(format!(
                "chunking: overlap_tokens ({}) must be smaller than max_tokens ({})",
                c.overlap_tokens, c.max_tokens
            )));
        }
        let r = &self.retrieval;
        if r.top_k == 0 || r.top_k > r.max_top_k {
            return Err(Error::InvalidConfig(format!("retrieval: top_k must be within 1..={}, got {}", r.max_top_k, r.top_k)));
        }
        if r.candidate_pool_multiplier == 0 {
            return Err(Error::InvalidConfig("retrieval: candidate_pool_multiplier must be at least 1".into()));
        }
        if !(r.rrf_constant.is_finite() && r.rrf_constant >= 0.0) {
            return Err(Error::InvalidConfig(format!("retrieval: rrf_constant must be a non-negative number, got {}", r.rrf_constant)));
        }
        let p = &self.provider;
        if p.timeout_ms == 0 {
            return Err(Error::InvalidConfig("provider: timeout_ms must be greater than zero".into()));
        }
        if p.batch_size == 0 || p.max_attempts == 0 || p.dimension == 0 {
            return Err(Error::InvalidConfig("provider: batch_size, max_attempts and dimension must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_tokens: 1000, overlap_tokens: 300 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub max_top_k: usize,
    pub rrf_constant: f64,
    pub candidate_pool_multiplier: usize,
    /// Conversation turns handed to a query rewriter.
    pub history_window: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5, max_top_k: 10, rrf_constant: 60.0, candidate_pool_multiplier: 3, history_window: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Openai,
    /// Deterministic feature hashing, no network.
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum BackoffSettings {
    None,
    Fixed { delay_ms: u64 },
    Exponential { initial_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Per-call budget; a call that exceeds it counts as unavailable.
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff: BackoffSettings,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Openai,
            model: "text-embedding-3-large".to_string(),
            dimension: 3072,
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            timeout_ms: 30_000,
            batch_size: 100,
            max_attempts: 3,
            backoff: BackoffSettings::Exponential { initial_ms: 500, max_ms: 8_000 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub dir: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true, dir: "~/.cache/reportdb".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub documents_dir: String,
    pub corpus_id: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { documents_dir: "data/normalized".to_string(), corpus_id: "default".to_string() }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().expect("defaults validate");
        assert_eq!(s.chunking.max_tokens, 1000);
        assert_eq!(s.retrieval.rrf_constant, 60.0);
    }

    #[test]
    fn file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "reportdb.toml",
                r#"
                [chunking]
                max_tokens = 400
                overlap_tokens = 50

                [retrieval]
                top_k = 4
                "#,
            )?;
            jail.create_file("reportdb.test.toml", "[retrieval]\ncandidate_pool_multiplier = 2\n")?;
            jail.set_env("RUST_ENV", "test");
            jail.set_env("APP_RETRIEVAL__TOP_K", "7");
            jail.set_env("APP_PROVIDER__KIND", "hashing");

            let cfg = Config::load().expect("load");
            let s = cfg.settings().expect("settings");
            assert_eq!(cfg.env_name(), "test");
            assert_eq!(s.chunking.max_tokens, 400);
            assert_eq!(s.retrieval.top_k, 7);
            assert_eq!(s.retrieval.candidate_pool_multiplier, 2);
            assert_eq!(s.provider.kind, ProviderKind::Hashing);
            assert_eq!(cfg.get::<usize>("chunking.overlap_tokens").expect("get"), 50);
            Ok(())
        });
    }

    #[test]
    fn invalid_overlap_is_rejected_at_load() {
        Jail::expect_with(|jail| {
            jail.create_file("reportdb.toml", "[chunking]\nmax_tokens = 100\noverlap_tokens = 100\n")?;
            let cfg = Config::load_for_env("dev").expect("load");
            assert!(matches!(cfg.settings(), Err(Error::InvalidConfig(_))));
            Ok(())
        });
    }

    #[test]
    fn top_k_outside_bounds_is_rejected() {
        let mut s = Settings::default();
        s.retrieval.top_k = 11;
        assert!(s.validate().is_err());
        s.retrieval.top_k = 0;
        assert!(s.validate().is_err());
        s.retrieval.top_k = 10;
        s.provider.timeout_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn backoff_reads_tagged_table() {
        Jail::expect_with(|jail| {
            jail.create_file("reportdb.toml", "[provider.backoff]\nstrategy = \"fixed\"\ndelay_ms = 25\n")?;
            let s = Config::load_for_env("dev").expect("load").settings().expect("settings");
            assert_eq!(s.provider.backoff, BackoffSettings::Fixed { delay_ms: 25 });
            Ok(())
        });
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let base = Path::new("/srv/reportdb");
        assert_eq!(resolve_with_base(base, "cache"), PathBuf::from("/srv/reportdb/cache"));
        assert_eq!(resolve_with_base(base, "/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
