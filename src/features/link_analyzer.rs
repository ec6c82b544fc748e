use super::{link_domains, url_host};
use crate::cache::Cache;
use crate::domain_reputation::{DomainReputationResult, DomainReputationService};
use crate::resilience::Protected;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub const DEFAULT_SUSPICIOUS_THRESHOLD: f64 = 0.3;

pub fn default_bad_categories() -> Vec<String> {
    ["phishing", "malware", "spam", "botnet", "scam"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

/// Cross-analysis reputation cache. Best effort: any failure means "no cache".
pub struct ReputationCache {
    pub cache: Protected<dyn Cache>,
    pub ttl: Duration,
}

impl ReputationCache {
    fn key(domain: &str) -> String {
        format!("reputation:{domain}")
    }

    async fn get(&self, domain: &str) -> Option<DomainReputationResult> {
        let key = Self::key(domain);
        let cached = self
            .cache
            .client
            .execute(|| self.cache.service.get(&key))
            .await;

        match cached {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(result) => Some(result),
                Err(e) => {
                    log::warn!("Ignoring undecodable cache entry for {domain}: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Reputation cache read failed for {domain}: {e}");
                None
            }
        }
    }

    async fn put(&self, result: &DomainReputationResult) {
        let raw = match serde_json::to_string(result) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Could not encode reputation for {}: {e}", result.domain);
                return;
            }
        };

        let key = Self::key(&result.domain);
        let stored = self
            .cache
            .client
            .execute(|| self.cache.service.set(&key, raw.clone(), self.ttl))
            .await;
        if let Err(e) = stored {
            log::warn!("Reputation cache write failed for {}: {e}", result.domain);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAnalysis {
    /// Number of links, including unparsable ones.
    pub count: usize,
    /// Distinct link domains.
    pub domains: Vec<String>,
    /// Links whose domain is suspicious.
    pub suspicious_count: usize,
    pub suspicious_domains: Vec<String>,
    /// Reputation answers, sorted by domain.
    pub reputations: Vec<DomainReputationResult>,
    /// Domains whose lookup ultimately failed; treated as unknown.
    pub unavailable_domains: Vec<String>,
    pub indicators: Vec<String>,
}

impl LinkAnalysis {
    /// Mean reputation of the domains that answered, if any did.
    pub fn average_reputation(&self) -> Option<f64> {
        if self.reputations.is_empty() {
            return None;
        }
        let total: f64 = self.reputations.iter().map(|r| r.reputation_score).sum();
        Some(total / self.reputations.len() as f64)
    }

    pub fn queried_domains(&self) -> usize {
        self.reputations.len() + self.unavailable_domains.len()
    }
}

/// Merge two reputation maps. Entries from `fresh` take precedence over `cached`.
pub fn merge_reputations(
    cached: HashMap<String, DomainReputationResult>,
    fresh: HashMap<String, DomainReputationResult>,
) -> HashMap<String, DomainReputationResult> {
    let mut merged = cached;
    merged.extend(fresh);
    merged
}

pub struct LinkAnalyzer {
    reputation: Protected<dyn DomainReputationService>,
    cache: Option<ReputationCache>,
    suspicious_threshold: f64,
    bad_categories: Vec<String>,
}

impl LinkAnalyzer {
    pub fn new(reputation: Protected<dyn DomainReputationService>) -> Self {
        Self {
            reputation,
            cache: None,
            suspicious_threshold: DEFAULT_SUSPICIOUS_THRESHOLD,
            bad_categories: default_bad_categories(),
        }
    }

    pub fn with_cache(mut self, cache: ReputationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_threshold(mut self, suspicious_threshold: f64) -> Self {
        self.suspicious_threshold = suspicious_threshold;
        self
    }

    pub fn with_bad_categories(mut self, categories: Vec<String>) -> Self {
        self.bad_categories = categories.into_iter().map(|c| c.to_lowercase()).collect();
        self
    }

    pub fn is_suspicious_reputation(&self, result: &DomainReputationResult) -> bool {
        result.reputation_score < self.suspicious_threshold
            || result
                .categories
                .iter()
                .any(|c| self.bad_categories.contains(&c.to_lowercase()))
    }

    /// Look up every distinct link domain once and flag suspicious links.
    ///
    /// Lookup failures leave the domain unknown and add `reputation_unavailable`;
    /// they never fail the analysis.
    pub async fn analyze(&self, links: &[String]) -> LinkAnalysis {
        let domains = link_domains(links);

        let mut cached = HashMap::new();
        let mut fresh = HashMap::new();
        let mut unavailable = Vec::new();

        for domain in &domains {
            if let Some(hit) = self.cached_reputation(domain).await {
                log::debug!("Reputation cache hit for {domain}");
                cached.insert(domain.clone(), hit);
                continue;
            }

            match self
                .reputation
                .client
                .execute(|| self.reputation.service.lookup(domain))
                .await
            {
                Ok(result) => {
                    if let Some(cache) = &self.cache {
                        cache.put(&result).await;
                    }
                    fresh.insert(domain.clone(), result);
                }
                Err(e) => {
                    log::warn!("Reputation lookup for {domain} failed, treating as unknown: {e}");
                    unavailable.push(domain.clone());
                }
            }
        }

        let resolved = merge_reputations(cached, fresh);
        self.summarize(links, domains, resolved, unavailable)
    }

    async fn cached_reputation(&self, domain: &str) -> Option<DomainReputationResult> {
        match &self.cache {
            Some(cache) => cache.get(domain).await,
            None => None,
        }
    }

    fn summarize(
        &self,
        links: &[String],
        domains: BTreeSet<String>,
        resolved: HashMap<String, DomainReputationResult>,
        unavailable: Vec<String>,
    ) -> LinkAnalysis {
        let suspicious_domains: BTreeSet<String> = resolved
            .iter()
            .filter(|(_, result)| self.is_suspicious_reputation(result))
            .map(|(domain, _)| domain.clone())
            .collect();

        let suspicious_count = links
            .iter()
            .filter_map(|url| url_host(url))
            .filter(|host| suspicious_domains.contains(host))
            .count();

        let mut indicators: Vec<String> = suspicious_domains
            .iter()
            .map(|d| format!("suspicious_link_domain:{d}"))
            .collect();
        if !unavailable.is_empty() {
            indicators.push("reputation_unavailable".to_string());
        }

        let mut reputations: Vec<DomainReputationResult> = resolved.into_values().collect();
        reputations.sort_by(|a, b| a.domain.cmp(&b.domain));

        LinkAnalysis {
            count: links.len(),
            domains: domains.into_iter().collect(),
            suspicious_count,
            suspicious_domains: suspicious_domains.into_iter().collect(),
            reputations,
            unavailable_domains: unavailable,
            indicators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::{Result, ThreatError};
    use crate::resilience::{
        BreakerSettings, CircuitState, DependencySettings, ResilientClient, RetrySettings,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingReputation {
        table: HashMap<String, DomainReputationResult>,
        failing: Vec<String>,
        lookups: Mutex<Vec<String>>,
    }

    impl RecordingReputation {
        fn with(entries: Vec<DomainReputationResult>, failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                table: entries.into_iter().map(|r| (r.domain.clone(), r)).collect(),
                failing: failing.iter().map(|d| d.to_string()).collect(),
                lookups: Mutex::new(Vec::new()),
            })
        }

        fn lookups(&self) -> Vec<String> {
            self.lookups.lock().clone()
        }
    }

    #[async_trait]
    impl DomainReputationService for RecordingReputation {
        async fn lookup(&self, domain: &str) -> Result<DomainReputationResult> {
            self.lookups.lock().push(domain.to_string());
            if self.failing.iter().any(|d| d == domain) {
                return Err(ThreatError::external("domain_reputation", "upstream 503"));
            }
            Ok(self
                .table
                .get(domain)
                .cloned()
                .unwrap_or_else(|| DomainReputationResult::neutral(domain)))
        }
    }

    fn fast_settings(failure_threshold: u32) -> DependencySettings {
        DependencySettings {
            timeout_seconds: 1.0,
            retry: RetrySettings {
                max_attempts: 2,
                base_delay_secs: 0.001,
                ..RetrySettings::default()
            },
            breaker: BreakerSettings {
                failure_threshold,
                recovery_timeout_secs: 60.0,
            },
        }
    }

    fn analyzer(service: Arc<RecordingReputation>, failure_threshold: u32) -> LinkAnalyzer {
        let service: Arc<dyn DomainReputationService> = service;
        let client = ResilientClient::from_settings("domain_reputation", &fast_settings(failure_threshold));
        LinkAnalyzer::new(Protected::new(service, Arc::new(client)))
    }

    fn links(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn test_domains_are_looked_up_once() {
        let service = RecordingReputation::with(
            vec![DomainReputationResult::new("bad.example", 0.1, 9, &[])],
            &[],
        );
        let analyzer = analyzer(service.clone(), 5);

        let analysis = analyzer
            .analyze(&links(&[
                "https://bad.example/login",
                "https://bad.example/reset",
                "https://good.example/",
                "::not a url::",
            ]))
            .await;

        assert_eq!(service.lookups(), vec!["bad.example", "good.example"]);
        assert_eq!(analysis.count, 4);
        assert_eq!(analysis.domains, vec!["bad.example", "good.example"]);
        assert_eq!(analysis.suspicious_count, 2);
        assert_eq!(analysis.suspicious_domains, vec!["bad.example"]);
        assert_eq!(analysis.indicators, vec!["suspicious_link_domain:bad.example"]);
        assert_eq!(analysis.average_reputation(), Some(0.3));
    }

    #[tokio::test]
    async fn test_bad_category_is_suspicious_despite_score() {
        let service = RecordingReputation::with(
            vec![DomainReputationResult::new("cdn.example", 0.9, 1, &["Phishing"])],
            &[],
        );
        let analysis = analyzer(service, 5)
            .analyze(&links(&["https://cdn.example/x"]))
            .await;

        assert_eq!(analysis.suspicious_count, 1);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_unknown_not_suspicious() {
        let service = RecordingReputation::with(vec![], &["down.example"]);
        let analysis = analyzer(service.clone(), 5)
            .analyze(&links(&["https://down.example/", "https://ok.example/"]))
            .await;

        assert_eq!(analysis.suspicious_count, 0);
        assert_eq!(analysis.unavailable_domains, vec!["down.example"]);
        assert_eq!(analysis.reputations.len(), 1);
        assert_eq!(analysis.queried_domains(), 2);
        assert_eq!(analysis.indicators, vec!["reputation_unavailable"]);
        // Retried once before giving up
        assert_eq!(
            service.lookups(),
            vec!["down.example", "down.example", "ok.example"]
        );
    }

    #[tokio::test]
    async fn test_open_breaker_skips_remaining_lookups() {
        let service = RecordingReputation::with(vec![], &["a.example", "b.example", "c.example"]);
        let analyzer = analyzer(service.clone(), 2);

        let analysis = analyzer
            .analyze(&links(&["https://a.example", "https://b.example", "https://c.example"]))
            .await;

        assert_eq!(analysis.unavailable_domains.len(), 3);
        assert_eq!(analysis.average_reputation(), None);
        assert_eq!(service.lookups(), vec!["a.example", "a.example"]);
        assert_eq!(analyzer.reputation.client.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_cache_avoids_repeat_lookups_across_analyses() {
        let service = RecordingReputation::with(
            vec![DomainReputationResult::new("bad.example", 0.05, 3, &["malware"])],
            &[],
        );
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let cache_client = Arc::new(ResilientClient::from_settings("cache", &fast_settings(5)));
        let analyzer = analyzer(service.clone(), 5).with_cache(ReputationCache {
            cache: Protected::new(cache, cache_client),
            ttl: Duration::from_secs(60),
        });

        let urls = links(&["https://bad.example/a"]);
        let first = analyzer.analyze(&urls).await;
        let second = analyzer.analyze(&urls).await;

        assert_eq!(first, second);
        assert_eq!(service.lookups(), vec!["bad.example"]);
    }

    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(ThreatError::external("cache", "connection refused"))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(ThreatError::external("cache", "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_cache_failure_degrades_to_no_cache() {
        let service = RecordingReputation::with(
            vec![DomainReputationResult::new("bad.example", 0.05, 3, &[])],
            &[],
        );
        let cache: Arc<dyn Cache> = Arc::new(BrokenCache);
        let cache_client = Arc::new(ResilientClient::from_settings("cache", &fast_settings(5)));
        let analyzer = analyzer(service.clone(), 5).with_cache(ReputationCache {
            cache: Protected::new(cache, cache_client),
            ttl: Duration::from_secs(60),
        });

        let analysis = analyzer.analyze(&links(&["https://bad.example/a"])).await;

        assert_eq!(analysis.suspicious_count, 1);
        assert!(analysis.unavailable_domains.is_empty());
        assert_eq!(service.lookups(), vec!["bad.example"]);
    }

    #[test]
    fn test_merge_prefers_fresh_entries() {
        let cached = HashMap::from([
            ("a.example".to_string(), DomainReputationResult::new("a.example", 0.9, 0, &[])),
            ("b.example".to_string(), DomainReputationResult::new("b.example", 0.8, 0, &[])),
        ]);
        let fresh = HashMap::from([(
            "a.example".to_string(),
            DomainReputationResult::new("a.example", 0.2, 4, &["spam"]),
        )]);

        let merged = merge_reputations(cached, fresh);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["a.example"].reputation_score, 0.2);
        assert_eq!(merged["b.example"].reputation_score, 0.8);
    }
}
