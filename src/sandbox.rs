use crate::email::AttachmentMeta;
use crate::error::{Result, ThreatError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SERVICE_NAME: &str = "sandbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxVerdict {
    Clean,
    Suspicious,
    Malicious,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxReport {
    pub verdict: SandboxVerdict,
    pub threat_score: f64,
}

impl SandboxReport {
    /// Detonation results at or above this score count as malicious.
    pub const MALICIOUS_SCORE: f64 = 0.7;

    pub fn is_malicious(&self) -> bool {
        self.verdict == SandboxVerdict::Malicious || self.threat_score >= Self::MALICIOUS_SCORE
    }
}

/// Detonation service for deeper attachment inspection.
#[async_trait]
pub trait SandboxService: Send + Sync {
    async fn analyze(&self, attachment: &AttachmentMeta) -> Result<SandboxReport>;
}

pub struct HttpSandboxService {
    client: Client,
    base_url: String,
}

impl HttpSandboxService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("phishguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ThreatError::external(SERVICE_NAME, e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SandboxService for HttpSandboxService {
    async fn analyze(&self, attachment: &AttachmentMeta) -> Result<SandboxReport> {
        log::debug!("Submitting {} to sandbox", attachment.filename);

        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(attachment)
            .send()
            .await
            .map_err(|e| ThreatError::external(SERVICE_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThreatError::external(SERVICE_NAME, format!("HTTP {status}")));
        }

        response
            .json::<SandboxReport>()
            .await
            .map_err(|e| ThreatError::invalid_response(SERVICE_NAME, e.to_string()))
    }
}
