use crate::attachment_analyzer::AttachmentAnalysis;
use crate::features::link_analyzer::LinkAnalysis;
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};

/// Urgent keywords at which urgency pressure saturates.
const URGENCY_SATURATION: f64 = 3.0;

/// Reputation deficit used when no domain answered.
const NEUTRAL_REPUTATION_DEFICIT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub urgency: f64,
    pub attachment_risk: f64,
    pub link_risk: f64,
    pub reputation_deficit: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            urgency: 0.2,
            attachment_risk: 0.3,
            link_risk: 0.3,
            reputation_deficit: 0.2,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), String> {
        let weights = [
            self.urgency,
            self.attachment_risk,
            self.link_risk,
            self.reputation_deficit,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("scoring weights must be finite and non-negative".to_string());
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err("at least one scoring weight must be positive".to_string());
        }
        Ok(())
    }
}

/// The four normalized indicator terms, each in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreTerms {
    pub urgency: f64,
    pub attachment_risk: f64,
    pub link_risk: f64,
    pub reputation_deficit: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ThreatScorer {
    weights: ScoringWeights,
}

impl ThreatScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn terms(
        &self,
        features: &FeatureVector,
        attachments: &AttachmentAnalysis,
        links: &LinkAnalysis,
    ) -> ScoreTerms {
        ScoreTerms {
            urgency: unit(features.urgent_keyword_count as f64 / URGENCY_SATURATION),
            attachment_risk: ratio(attachments.suspicious_count, attachments.count),
            link_risk: ratio(links.suspicious_count, links.count),
            reputation_deficit: links
                .average_reputation()
                .map(|avg| unit(1.0 - avg))
                .unwrap_or(NEUTRAL_REPUTATION_DEFICIT),
        }
    }

    /// Weighted average of the indicator terms, clamped to [0,1].
    pub fn score(
        &self,
        features: &FeatureVector,
        attachments: &AttachmentAnalysis,
        links: &LinkAnalysis,
    ) -> f64 {
        let terms = self.terms(features, attachments, links);
        let w = &self.weights;

        let total_weight = w.urgency + w.attachment_risk + w.link_risk + w.reputation_deficit;
        if !total_weight.is_finite() || total_weight <= 0.0 {
            return 0.0;
        }

        let weighted = w.urgency * terms.urgency
            + w.attachment_risk * terms.attachment_risk
            + w.link_risk * terms.link_risk
            + w.reputation_deficit * terms.reputation_deficit;

        unit(weighted / total_weight)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    unit(part as f64 / whole.max(1) as f64)
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
