use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ALLOWLIST: &[&str] = &[
    "gov.cn",
    ".gov.cn",
    ".nea.gov.cn",
    ".ndrc.gov.cn",
    ".mee.gov.cn",
    ".samr.gov.cn",
    ".csg.cn",
    ".sgcc.com.cn",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub allowlist: Vec<String>,
    pub retrieval: RetrievalConfig,
    pub composer: ComposerConfig,
    pub backends: BackendEndpoints,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            allowlist: DEFAULT_ALLOWLIST.iter().map(|entry| entry.to_string()).collect(),
            retrieval: RetrievalConfig::default(),
            composer: ComposerConfig::default(),
            backends: BackendEndpoints::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub vector_top_k: usize,
    pub vector_min_score: f64,
    pub vector_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub web_qa_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub target_budget_ms: u64,
    pub hard_budget_ms: u64,
    pub max_hard_errors: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_top_k: 8,
            vector_min_score: 0.12,
            vector_timeout_ms: 3_000,
            discovery_timeout_ms: 10_000,
            web_qa_timeout_ms: 15_000,
            max_retries: 1,
            retry_backoff_ms: 250,
            target_budget_ms: 2_000,
            hard_budget_ms: 15_000,
            max_hard_errors: 3,
        }
    }
}

impl RetrievalConfig {
    pub fn vector_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn web_qa_timeout(&self) -> Duration {
        Duration::from_millis(self.web_qa_timeout_ms)
    }

    pub fn hard_budget(&self) -> Duration {
        Duration::from_millis(self.hard_budget_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub max_quotes_per_source: usize,
    pub max_citations: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_quotes_per_source: 2,
            max_citations: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendEndpoints {
    pub vector_db_path: Option<PathBuf>,
    pub discovery_url: Option<String>,
    pub web_qa_url: Option<String>,
    pub api_key_env: Option<String>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_slice::<AppConfig>(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => AppConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.allowlist.is_empty() {
            bail!("allowlist must contain at least one host or .suffix entry");
        }

        for entry in &self.allowlist {
            let trimmed = entry.trim();
            if trimmed.is_empty() || trimmed == "." || trimmed.contains(['/', ':', ' ', '*']) {
                bail!("invalid allowlist entry '{entry}'; expected a host or a .suffix");
            }
        }

        let retrieval = &self.retrieval;
        if retrieval.vector_timeout_ms == 0
            || retrieval.discovery_timeout_ms == 0
            || retrieval.web_qa_timeout_ms == 0
        {
            bail!("backend timeouts must be greater than zero");
        }
        if retrieval.hard_budget_ms == 0 {
            bail!("hard_budget_ms must be greater than zero");
        }
        if retrieval.target_budget_ms > retrieval.hard_budget_ms {
            bail!(
                "target_budget_ms ({}) must not exceed hard_budget_ms ({})",
                retrieval.target_budget_ms,
                retrieval.hard_budget_ms
            );
        }
        if retrieval.vector_top_k == 0 {
            bail!("vector_top_k must be at least 1");
        }
        if self.composer.max_quotes_per_source == 0 || self.composer.max_citations == 0 {
            bail!("composer limits must be at least 1");
        }

        Ok(())
    }

    pub fn api_key(&self) -> Option<String> {
        let name = self.backends.api_key_env.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        std::env::var(name).ok().filter(|value| !value.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let raw = r#"{ "allowlist": [".gov.cn"], "retrieval": { "vector_top_k": 4 } }"#;
        let config: AppConfig = serde_json::from_str(raw).expect("config should parse");
        assert_eq!(config.allowlist, vec![".gov.cn".to_string()]);
        assert_eq!(config.retrieval.vector_top_k, 4);
        assert_eq!(config.retrieval.max_retries, 1);
        assert_eq!(config.composer.max_citations, 5);
        config.validate().expect("config should validate");
    }

    #[test]
    fn validate_rejects_empty_or_malformed_allowlists() {
        let mut config = AppConfig::default();
        config.allowlist.clear();
        assert!(config.validate().is_err());

        config.allowlist = vec!["https://gd.gov.cn".to_string()];
        let error = config.validate().expect_err("url-shaped entry should fail");
        assert!(error.to_string().contains("invalid allowlist entry"));
    }

    #[test]
    fn validate_rejects_target_budget_above_hard_cap() {
        let mut config = AppConfig::default();
        config.retrieval.target_budget_ms = 20_000;
        assert!(config.validate().is_err());
    }
}
