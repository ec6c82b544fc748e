use crate::attachment_analyzer::AttachmentAnalyzer;
use crate::cache::{self, Cache, InMemoryCache};
use crate::domain_reputation::{
    self, DomainReputationResult, DomainReputationService, HttpReputationService,
    StaticReputationService,
};
use crate::features::link_analyzer::{
    default_bad_categories, LinkAnalyzer, ReputationCache, DEFAULT_SUSPICIOUS_THRESHOLD,
};
use crate::pipeline::EmailAnalyzer;
use crate::resilience::{DependencySettings, Protected, ResilientClient};
use crate::sandbox::{self, HttpSandboxService, SandboxService};
use crate::scoring::{ScoringWeights, ThreatScorer};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted cache ttl (one year).
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub scoring: ScoringWeights,
    pub reputation: ReputationConfig,
    pub sandbox: Option<SandboxConfig>,
    pub cache: Option<CacheConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReputationProvider {
    Static {
        #[serde(default)]
        domains: Vec<DomainReputationResult>,
    },
    Http {
        base_url: String,
        #[serde(default)]
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub provider: ReputationProvider,
    pub suspicious_threshold: f64,
    pub bad_categories: Vec<String>,
    pub resilience: DependencySettings,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            provider: ReputationProvider::Static {
                domains: Vec::new(),
            },
            suspicious_threshold: DEFAULT_SUSPICIOUS_THRESHOLD,
            bad_categories: default_bad_categories(),
            resilience: DependencySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub base_url: String,
    #[serde(default)]
    pub resilience: DependencySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub resilience: DependencySettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            resilience: DependencySettings {
                timeout_seconds: 1.0,
                ..DependencySettings::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AnalyzerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: AnalyzerConfig = serde_yaml::from_str(content).context("parsing YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serializing config")
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring
            .validate()
            .map_err(|e| anyhow!("scoring: {e}"))?;

        let threshold = self.reputation.suspicious_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("reputation: suspicious_threshold must be within [0, 1]"));
        }
        if let ReputationProvider::Http { base_url, .. } = &self.reputation.provider {
            url::Url::parse(base_url)
                .with_context(|| format!("reputation: invalid base_url '{base_url}'"))?;
        }
        self.reputation
            .resilience
            .validate()
            .map_err(|e| anyhow!("reputation: {e}"))?;

        if let Some(sandbox) = &self.sandbox {
            url::Url::parse(&sandbox.base_url)
                .with_context(|| format!("sandbox: invalid base_url '{}'", sandbox.base_url))?;
            sandbox
                .resilience
                .validate()
                .map_err(|e| anyhow!("sandbox: {e}"))?;
        }

        if let Some(cache) = &self.cache {
            if cache.ttl_seconds > MAX_CACHE_TTL_SECS {
                return Err(anyhow!(
                    "cache: ttl_seconds must not exceed {MAX_CACHE_TTL_SECS}"
                ));
            }
            cache.resilience.validate().map_err(|e| anyhow!("cache: {e}"))?;
        }

        Ok(())
    }

    /// Wire up the pipeline: one resilient client per dependency type, shared
    /// by every analysis run through the returned analyzer.
    pub fn build_analyzer(&self) -> Result<EmailAnalyzer> {
        let links = LinkAnalyzer::new(self.reputation_binding()?)
            .with_threshold(self.reputation.suspicious_threshold)
            .with_bad_categories(self.reputation.bad_categories.clone());

        let links = match &self.cache {
            Some(cache_config) => {
                let store: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
                let client =
                    ResilientClient::from_settings(cache::SERVICE_NAME, &cache_config.resilience);
                links.with_cache(ReputationCache {
                    cache: Protected::new(store, Arc::new(client)),
                    ttl: Duration::from_secs(cache_config.ttl_seconds),
                })
            }
            None => links,
        };

        let attachments = match &self.sandbox {
            Some(sandbox_config) => {
                let settings = &sandbox_config.resilience;
                let service: Arc<dyn SandboxService> = Arc::new(HttpSandboxService::new(
                    &sandbox_config.base_url,
                    settings.timeout(),
                )?);
                let client = ResilientClient::from_settings(sandbox::SERVICE_NAME, settings);
                AttachmentAnalyzer::with_sandbox(Protected::new(service, Arc::new(client)))
            }
            None => AttachmentAnalyzer::new(),
        };

        Ok(EmailAnalyzer::new(
            attachments,
            links,
            ThreatScorer::new(self.scoring.clone()),
        ))
    }

    fn reputation_binding(&self) -> Result<Protected<dyn DomainReputationService>> {
        let settings = &self.reputation.resilience;
        let service: Arc<dyn DomainReputationService> = match &self.reputation.provider {
            ReputationProvider::Static { domains } => {
                Arc::new(StaticReputationService::new(domains.clone()))
            }
            ReputationProvider::Http { base_url, api_key } => Arc::new(HttpReputationService::new(
                base_url,
                api_key.clone(),
                settings.timeout(),
            )?),
        };
        let client = ResilientClient::from_settings(domain_reputation::SERVICE_NAME, settings);
        Ok(Protected::new(service, Arc::new(client)))
    }
}
