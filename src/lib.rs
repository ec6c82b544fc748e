pub mod attachment_analyzer;
pub mod cache;
pub mod config;
pub mod domain_reputation;
pub mod email;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod resilience;
pub mod sandbox;
pub mod scoring;
pub mod verdict;

pub use config::AnalyzerConfig;
pub use email::{AttachmentMeta, EmailRecord};
pub use error::{Result, ThreatError};
pub use pipeline::{AnalysisResult, EmailAnalyzer};
pub use verdict::{Verdict, VerdictClassifier};
