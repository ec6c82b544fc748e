use crate::error::{Result, ThreatError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const SERVICE_NAME: &str = "domain_reputation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainReputationResult {
    pub domain: String,
    pub reputation_score: f64,
    #[serde(default)]
    pub detection_count: u32,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl DomainReputationResult {
    pub fn new(domain: &str, reputation_score: f64, detection_count: u32, categories: &[&str]) -> Self {
        Self {
            domain: domain.to_lowercase(),
            reputation_score: clamp_score(reputation_score),
            detection_count,
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Neutral answer for a domain nobody has an opinion about.
    pub fn neutral(domain: &str) -> Self {
        Self::new(domain, 0.5, 0, &[])
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.5
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait DomainReputationService: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<DomainReputationResult>;
}

/// Wire format of the reputation HTTP API.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    reputation_score: f64,
    #[serde(default)]
    detections: u32,
    #[serde(default)]
    categories: Vec<String>,
}

pub struct HttpReputationService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpReputationService {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("phishguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ThreatError::external(SERVICE_NAME, e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl DomainReputationService for HttpReputationService {
    async fn lookup(&self, domain: &str) -> Result<DomainReputationResult> {
        let url = format!("{}/{}", self.base_url, domain);
        log::debug!("Querying reputation for {domain}");

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ThreatError::external(SERVICE_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = if status == StatusCode::TOO_MANY_REQUESTS {
                "rate limited".to_string()
            } else {
                format!("HTTP {status}")
            };
            return Err(ThreatError::external(SERVICE_NAME, message));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| ThreatError::invalid_response(SERVICE_NAME, e.to_string()))?;

        Ok(DomainReputationResult {
            domain: domain.to_lowercase(),
            reputation_score: clamp_score(body.reputation_score),
            detection_count: body.detections,
            categories: body.categories,
        })
    }
}

/// Offline reputation source backed by a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticReputationService {
    entries: HashMap<String, DomainReputationResult>,
}

impl StaticReputationService {
    pub fn new(entries: impl IntoIterator<Item = DomainReputationResult>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|mut entry| {
                    entry.domain = entry.domain.to_lowercase();
                    entry.reputation_score = clamp_score(entry.reputation_score);
                    (entry.domain.clone(), entry)
                })
                .collect(),
        }
    }
}

#[async_trait]
impl DomainReputationService for StaticReputationService {
    async fn lookup(&self, domain: &str) -> Result<DomainReputationResult> {
        let domain = domain.to_lowercase();
        Ok(self
            .entries
            .get(&domain)
            .cloned()
            .unwrap_or_else(|| DomainReputationResult::neutral(&domain)))
    }
}
