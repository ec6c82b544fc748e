//! The email analysis pipeline.
//!
//! Feature extraction runs first and is the only step that can fail. The
//! attachment and link analyzers then run concurrently, both absorbing their
//! own dependency failures, and their outputs converge in the scorer and the
//! verdict classifier.

use crate::attachment_analyzer::{AttachmentAnalysis, AttachmentAnalyzer};
use crate::email::EmailRecord;
use crate::error::{Result, ThreatError};
use crate::features::link_analyzer::{LinkAnalysis, LinkAnalyzer};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::scoring::ThreatScorer;
use crate::verdict::{Verdict, VerdictClassifier};
use serde::{Deserialize, Serialize};

/// Confidence lost when the sandbox could not inspect an attachment.
const SANDBOX_UNAVAILABLE_PENALTY: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub message_id: String,
    pub threat_score: f64,
    pub verdict: Verdict,
    pub indicators: Vec<String>,
    pub confidence: Option<f64>,
}

impl AnalysisResult {
    /// True when some enrichment was unavailable and the verdict rests on
    /// partial signals.
    pub fn is_degraded(&self) -> bool {
        self.indicators
            .iter()
            .any(|i| i == "reputation_unavailable" || i == "sandbox_unavailable")
    }
}

/// Ordered, duplicate-free indicator list. The first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Indicators(Vec<String>);

impl Indicators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, indicator: impl Into<String>) {
        let indicator = indicator.into();
        if !self.0.contains(&indicator) {
            self.0.push(indicator);
        }
    }

    /// Append `other` after the existing entries, skipping ones already present.
    pub fn merge<I, S>(&mut self, other: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for indicator in other {
            self.push(indicator);
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

pub struct EmailAnalyzer {
    extractor: FeatureExtractor,
    attachments: AttachmentAnalyzer,
    links: LinkAnalyzer,
    scorer: ThreatScorer,
    classifier: VerdictClassifier,
}

impl EmailAnalyzer {
    pub fn new(attachments: AttachmentAnalyzer, links: LinkAnalyzer, scorer: ThreatScorer) -> Self {
        Self {
            extractor: FeatureExtractor::new(),
            attachments,
            links,
            scorer,
            classifier: VerdictClassifier::new(),
        }
    }

    /// Analyze one email.
    ///
    /// Fails only with [`ThreatError::Validation`]. Dependency outages are
    /// reflected in the indicators and the confidence instead.
    pub async fn analyze_email(&self, email: &EmailRecord) -> Result<AnalysisResult> {
        let features = self.extractor.extract(email)?;

        let (attachment_analysis, link_analysis) = tokio::join!(
            self.attachments.analyze_with_enrichment(&email.attachments),
            self.links.analyze(&email.urls),
        );

        let threat_score = self
            .scorer
            .score(&features, &attachment_analysis, &link_analysis);
        let verdict = self.classifier.classify(threat_score);

        let result = AnalysisResult {
            message_id: email.message_id.clone(),
            threat_score,
            verdict,
            indicators: collect_indicators(&features, &attachment_analysis, &link_analysis),
            confidence: Some(confidence(&attachment_analysis, &link_analysis)),
        };

        log::info!(
            "Analyzed '{}': verdict={} score={:.3} indicators={}",
            result.message_id,
            result.verdict,
            result.threat_score,
            result.indicators.len()
        );

        Ok(result)
    }

    /// Analyze an email given as JSON. `null` and non-object documents are
    /// rejected as invalid input.
    pub async fn analyze_json(&self, raw: &str) -> Result<AnalysisResult> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ThreatError::Validation(format!("malformed email document: {e}")))?;

        if !value.is_object() {
            return Err(ThreatError::Validation(
                "email document must be a JSON object".to_string(),
            ));
        }

        let email: EmailRecord = serde_json::from_value(value)
            .map_err(|e| ThreatError::Validation(format!("malformed email document: {e}")))?;
        self.analyze_email(&email).await
    }

    /// Blocking adapter for synchronous callers. Must not be called from
    /// inside an async runtime.
    pub fn analyze_email_blocking(&self, email: &EmailRecord) -> Result<AnalysisResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ThreatError::external("runtime", e.to_string()))?;
        runtime.block_on(self.analyze_email(email))
    }
}

fn collect_indicators(
    features: &FeatureVector,
    attachments: &AttachmentAnalysis,
    links: &LinkAnalysis,
) -> Vec<String> {
    let mut indicators = Indicators::new();

    if features.urgent_keyword_count > 0 {
        indicators.push(format!("urgent_language:{}", features.urgent_keyword_count));
    }
    if features.sender_domain.is_none() {
        indicators.push("missing_sender_domain");
    }
    indicators.merge(attachments.indicators.iter().cloned());
    indicators.merge(links.indicators.iter().cloned());

    indicators.into_vec()
}

fn confidence(attachments: &AttachmentAnalysis, links: &LinkAnalysis) -> f64 {
    let mut confidence = 1.0;

    let queried = links.queried_domains();
    if queried > 0 {
        let unavailable = links.unavailable_domains.len() as f64 / queried as f64;
        confidence *= 1.0 - 0.5 * unavailable;
    }
    if attachments.sandbox_unavailable {
        confidence -= SANDBOX_UNAVAILABLE_PENALTY;
    }

    f64::clamp(confidence, 0.0, 1.0)
}
