use serde::{Deserialize, Serialize};
use std::fmt;

pub const MALICIOUS_THRESHOLD: f64 = 0.9;
pub const SUSPICIOUS_THRESHOLD: f64 = 0.6;
pub const POTENTIALLY_UNWANTED_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    PotentiallyUnwanted,
    Suspicious,
    Malicious,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Clean => "clean",
            Verdict::PotentiallyUnwanted => "potentially_unwanted",
            Verdict::Suspicious => "suspicious",
            Verdict::Malicious => "malicious",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step function from threat score to verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictClassifier;

impl VerdictClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, score: f64) -> Verdict {
        match score {
            s if s >= MALICIOUS_THRESHOLD => Verdict::Malicious,
            s if s >= SUSPICIOUS_THRESHOLD => Verdict::Suspicious,
            s if s >= POTENTIALLY_UNWANTED_THRESHOLD => Verdict::PotentiallyUnwanted,
            _ => Verdict::Clean,
        }
    }
}
