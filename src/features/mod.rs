pub mod link_analyzer;

use crate::email::EmailRecord;
use crate::error::{Result, ThreatError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

/// Case-insensitive urgency phrases. Longer phrases come first so the
/// alternation prefers them over their prefixes.
pub const URGENCY_LEXICON: &[&str] = &[
    "your account will be closed",
    "account will be closed",
    "verify your account",
    "confirm your identity",
    "account suspended",
    "action required",
    "within 24 hours",
    "password expires",
    "unusual activity",
    "expires today",
    "final notice",
    "last warning",
    "limited time",
    "respond now",
    "act now",
    "immediately",
    "immediate",
    "urgent",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub subject_length: usize,
    pub body_length: usize,
    pub attachment_count: usize,
    pub link_count: usize,
    pub urgent_keyword_count: usize,
    pub sender_domain: Option<String>,
    pub link_domains: BTreeSet<String>,
}

pub struct FeatureExtractor {
    urgency_regex: Regex,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        let alternation = URGENCY_LEXICON
            .iter()
            .map(|phrase| regex::escape(phrase).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");

        Self {
            urgency_regex: Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
                .expect("urgency lexicon is a valid pattern"),
        }
    }

    pub fn extract(&self, email: &EmailRecord) -> Result<FeatureVector> {
        validate(email)?;

        let features = FeatureVector {
            subject_length: email.subject.chars().count(),
            body_length: email.body_text.chars().count(),
            attachment_count: email.attachments.len(),
            link_count: email.urls.len(),
            urgent_keyword_count: self.count_urgent_keywords(&email.subject)
                + self.count_urgent_keywords(&email.body_text),
            sender_domain: sender_domain(&email.sender),
            link_domains: link_domains(&email.urls),
        };

        log::debug!(
            "Extracted features for '{}': {} urgent keyword(s), {} link domain(s)",
            email.message_id,
            features.urgent_keyword_count,
            features.link_domains.len()
        );

        Ok(features)
    }

    pub fn count_urgent_keywords(&self, text: &str) -> usize {
        self.urgency_regex.find_iter(text).count()
    }
}

fn validate(email: &EmailRecord) -> Result<()> {
    let missing: Vec<&str> = [
        ("sender", &email.sender),
        ("subject", &email.subject),
        ("body", &email.body_text),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ThreatError::Validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}

/// Domain part of a sender address, lowercased.
pub fn sender_domain(address: &str) -> Option<String> {
    let (_, domain) = address.trim().rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('>').trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}

/// Host of a URL, lowercased. `None` for unparsable or host-less URLs.
pub fn url_host(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(|host| host.to_lowercase())
}

pub fn link_domains(urls: &[String]) -> BTreeSet<String> {
    urls.iter().filter_map(|url| url_host(url)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::AttachmentMeta;

    fn sample_email() -> EmailRecord {
        EmailRecord {
            message_id: "<1@example.com>".into(),
            subject: "Quarterly report".into(),
            sender: "alice@Example.com".into(),
            recipients: vec!["bob@example.org".into()],
            body_text: "Please find the report attached.".into(),
            body_html: None,
            attachments: vec![AttachmentMeta::new("report.pdf", "application/pdf", 2048)],
            urls: vec![
                "https://docs.example.com/report".into(),
                "https://cdn.example.net/logo.png".into(),
            ],
        }
    }

    #[test]
    fn test_counts_and_lengths() {
        let features = FeatureExtractor::new().extract(&sample_email()).unwrap();

        assert_eq!(features.attachment_count, 1);
        assert_eq!(features.link_count, 2);
        assert_eq!(features.subject_length, 16);
        assert_eq!(features.body_length, 32);
        assert_eq!(features.urgent_keyword_count, 0);
        assert_eq!(features.sender_domain.as_deref(), Some("example.com"));
        assert_eq!(
            features.link_domains.into_iter().collect::<Vec<_>>(),
            vec!["cdn.example.net".to_string(), "docs.example.com".to_string()]
        );
    }

    #[test]
    fn test_lengths_count_characters_not_bytes() {
        let mut email = sample_email();
        email.subject = "Grüße".into();
        let features = FeatureExtractor::new().extract(&email).unwrap();
        assert_eq!(features.subject_length, 5);
    }

    #[test]
    fn test_urgent_keywords_across_subject_and_body() {
        let extractor = FeatureExtractor::new();
        let mut email = sample_email();
        email.subject = "URGENT: Verify Your Account".into();
        email.body_text = "Act now or your account will be closed. Respond IMMEDIATELY.".into();

        let features = extractor.extract(&email).unwrap();
        // urgent, verify your account, act now, your account will be closed, immediately
        assert_eq!(features.urgent_keyword_count, 5);
    }

    #[test]
    fn test_keywords_need_word_boundaries() {
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.count_urgent_keywords("insurgent activity"), 0);
        assert_eq!(extractor.count_urgent_keywords("act\n now"), 1);
    }

    #[test]
    fn test_missing_required_fields_fail_validation() {
        let extractor = FeatureExtractor::new();

        let mut email = sample_email();
        email.sender = "   ".into();
        email.body_text.clear();

        match extractor.extract(&email) {
            Err(ThreatError::Validation(message)) => {
                assert!(message.contains("sender"));
                assert!(message.contains("body"));
                assert!(!message.contains("subject"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        assert!(extractor.extract(&EmailRecord::default()).is_err());
    }

    #[test]
    fn test_sender_domain() {
        assert_eq!(sender_domain("noreply@suspicious-domain.com"), Some("suspicious-domain.com".into()));
        assert_eq!(sender_domain("Alice <alice@Mail.Example.org>"), Some("mail.example.org".into()));
        assert_eq!(sender_domain("no-at-sign"), None);
        assert_eq!(sender_domain("user@"), None);
        assert_eq!(sender_domain(""), None);
    }

    #[test]
    fn test_link_domains_skip_unparsable_and_dedupe() {
        let urls = vec![
            "https://Login.Bank-Secure.xyz/a".to_string(),
            "http://login.bank-secure.xyz/b?c=d".to_string(),
            "not a url".to_string(),
            "mailto:someone@example.com".to_string(),
        ];
        let domains = link_domains(&urls);
        assert_eq!(domains.len(), 1);
        assert!(domains.contains("login.bank-secure.xyz"));
    }
}
