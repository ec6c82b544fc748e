use crate::email::AttachmentMeta;
use crate::resilience::Protected;
use crate::sandbox::SandboxService;
use serde::{Deserialize, Serialize};

/// Executable, script and macro-bearing extensions.
const HIGH_RISK_EXTENSIONS: &[&str] = &[
    "exe", "scr", "bat", "cmd", "com", "pif", "vbs", "vbe", "js", "jse", "wsf", "wsh", "ps1",
    "msi", "jar", "hta", "cpl", "lnk", "reg", "dll", "app", "run", "sh", "docm", "dotm", "xlsm",
    "xltm", "xlam", "pptm", "potm", "ppsm", "sldm",
];

/// Extensions worth a sandbox detonation when not already flagged.
const INSPECTABLE_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "gz", "tar", "iso", "img", "pdf", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "rtf", "html", "htm",
];

/// Declared types that say nothing about the content.
const GENERIC_MIME_TYPES: &[&str] = &["", "application/octet-stream", "binary/octet-stream"];

fn expected_mime_types(extension: &str) -> Option<&'static [&'static str]> {
    let types: &'static [&'static str] = match extension {
        "pdf" => &["application/pdf", "application/x-pdf"],
        "doc" => &["application/msword"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "xls" => &["application/vnd.ms-excel"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        "ppt" => &["application/vnd.ms-powerpoint"],
        "pptx" => &["application/vnd.openxmlformats-officedocument.presentationml.presentation"],
        "rtf" => &["application/rtf", "text/rtf"],
        "txt" => &["text/plain"],
        "csv" => &["text/csv", "text/plain", "application/vnd.ms-excel"],
        "html" | "htm" => &["text/html"],
        "xml" => &["application/xml", "text/xml"],
        "json" => &["application/json"],
        "jpg" | "jpeg" => &["image/jpeg", "image/pjpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        "svg" => &["image/svg+xml"],
        "mp3" => &["audio/mpeg"],
        "mp4" => &["video/mp4"],
        "zip" => &["application/zip", "application/x-zip-compressed", "application/x-zip"],
        "rar" => &["application/x-rar-compressed", "application/vnd.rar"],
        "7z" => &["application/x-7z-compressed"],
        "gz" => &["application/gzip", "application/x-gzip"],
        "ics" => &["text/calendar"],
        _ => return None,
    };
    Some(types)
}

pub fn is_high_risk_extension(extension: &str) -> bool {
    HIGH_RISK_EXTENSIONS.contains(&extension)
}

/// True when the declared type contradicts a known extension.
pub fn has_mime_mismatch(attachment: &AttachmentMeta) -> bool {
    let mime = attachment.mime_type();
    if GENERIC_MIME_TYPES.contains(&mime.as_str()) {
        return false;
    }

    match attachment.extension().as_deref().and_then(expected_mime_types) {
        Some(expected) => !expected.contains(&mime.as_str()),
        None => false,
    }
}

pub fn is_suspicious(attachment: &AttachmentMeta) -> bool {
    let high_risk = attachment
        .extension()
        .map(|ext| is_high_risk_extension(&ext))
        .unwrap_or(false);
    high_risk || has_mime_mismatch(attachment)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentAnalysis {
    pub count: usize,
    pub total_size: u64,
    pub suspicious_count: usize,
    pub suspicious_files: Vec<String>,
    pub indicators: Vec<String>,
    pub sandbox_unavailable: bool,
}

pub struct AttachmentAnalyzer {
    sandbox: Option<Protected<dyn SandboxService>>,
}

impl Default for AttachmentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentAnalyzer {
    pub fn new() -> Self {
        Self { sandbox: None }
    }

    pub fn with_sandbox(sandbox: Protected<dyn SandboxService>) -> Self {
        Self {
            sandbox: Some(sandbox),
        }
    }

    /// Static attachment analysis. No external calls.
    pub fn analyze(&self, attachments: &[AttachmentMeta]) -> AttachmentAnalysis {
        let mut analysis = AttachmentAnalysis {
            count: attachments.len(),
            total_size: attachments.iter().map(|a| a.size).sum(),
            ..AttachmentAnalysis::default()
        };

        for attachment in attachments.iter().filter(|a| is_suspicious(a)) {
            analysis.mark_suspicious(&attachment.filename);
            analysis
                .indicators
                .push(format!("suspicious_attachment:{}", attachment.filename));
        }

        analysis
    }

    /// Static analysis followed by sandbox detonation of inspectable,
    /// not-yet-flagged attachments when a sandbox is bound.
    ///
    /// Sandbox failures never fail the analysis; they are recorded as
    /// `sandbox_unavailable`.
    pub async fn analyze_with_enrichment(&self, attachments: &[AttachmentMeta]) -> AttachmentAnalysis {
        let mut analysis = self.analyze(attachments);
        let Some(sandbox) = &self.sandbox else {
            return analysis;
        };

        let candidates = attachments.iter().filter(|a| {
            !is_suspicious(a)
                && a.extension()
                    .map(|ext| INSPECTABLE_EXTENSIONS.contains(&ext.as_str()))
                    .unwrap_or(false)
        });

        for attachment in candidates {
            let outcome = sandbox
                .client
                .execute(|| sandbox.service.analyze(attachment))
                .await;

            match outcome {
                Ok(report) if report.is_malicious() => {
                    log::info!(
                        "Sandbox flagged {} (score {:.2})",
                        attachment.filename,
                        report.threat_score
                    );
                    analysis.mark_suspicious(&attachment.filename);
                    analysis
                        .indicators
                        .push(format!("sandbox_malicious:{}", attachment.filename));
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Sandbox unavailable for {}: {}", attachment.filename, e);
                    if !analysis.sandbox_unavailable {
                        analysis.sandbox_unavailable = true;
                        analysis.indicators.push("sandbox_unavailable".to_string());
                    }
                }
            }
        }

        analysis
    }
}

impl AttachmentAnalysis {
    fn mark_suspicious(&mut self, filename: &str) {
        self.suspicious_count += 1;
        self.suspicious_files.push(filename.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, ThreatError};
    use crate::resilience::{DependencySettings, ResilientClient, RetrySettings};
    use crate::sandbox::{SandboxReport, SandboxVerdict};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_executable_is_always_suspicious() {
        for mime in ["application/x-msdownload", "application/pdf", "application/octet-stream", ""] {
            assert!(is_suspicious(&AttachmentMeta::new("script.exe", mime, 10)), "{mime}");
        }
        assert!(is_suspicious(&AttachmentMeta::new("invoice.pdf.EXE", "application/pdf", 10)));
        assert!(is_suspicious(&AttachmentMeta::new("budget.xlsm", "application/vnd.ms-excel.sheet.macroEnabled.12", 10)));
    }

    #[test]
    fn test_mime_mismatch() {
        assert!(is_suspicious(&AttachmentMeta::new("invoice.pdf", "application/x-msdownload", 10)));
        assert!(!is_suspicious(&AttachmentMeta::new("invoice.pdf", "application/pdf", 10)));
        assert!(!is_suspicious(&AttachmentMeta::new("invoice.pdf", "Application/PDF; name=invoice.pdf", 10)));
        assert!(!is_suspicious(&AttachmentMeta::new("invoice.pdf", "application/octet-stream", 10)));
        // Unknown extensions have no expectation to violate
        assert!(!is_suspicious(&AttachmentMeta::new("data.bin", "text/plain", 10)));
        assert!(!is_suspicious(&AttachmentMeta::new("README", "text/plain", 10)));
    }

    #[test]
    fn test_analyze_totals() {
        let analyzer = AttachmentAnalyzer::new();
        let analysis = analyzer.analyze(&[
            AttachmentMeta::new("photo.jpg", "image/jpeg", 1000),
            AttachmentMeta::new("setup.exe", "application/x-msdownload", 5000),
            AttachmentMeta::new("notes.txt", "text/plain", 24),
        ]);

        assert_eq!(analysis.count, 3);
        assert_eq!(analysis.total_size, 6024);
        assert_eq!(analysis.suspicious_count, 1);
        assert_eq!(analysis.suspicious_files, vec!["setup.exe".to_string()]);
        assert_eq!(analysis.indicators, vec!["suspicious_attachment:setup.exe".to_string()]);
    }

    #[test]
    fn test_analyze_empty() {
        let analysis = AttachmentAnalyzer::new().analyze(&[]);
        assert_eq!(analysis, AttachmentAnalysis::default());
    }

    struct ScriptedSandbox {
        calls: AtomicU32,
        report: Option<SandboxReport>,
    }

    #[async_trait]
    impl SandboxService for ScriptedSandbox {
        async fn analyze(&self, _attachment: &AttachmentMeta) -> Result<SandboxReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.report
                .clone()
                .ok_or_else(|| ThreatError::external("sandbox", "detonation cluster down"))
        }
    }

    fn bind(sandbox: Arc<ScriptedSandbox>) -> Protected<dyn SandboxService> {
        let settings = DependencySettings {
            retry: RetrySettings {
                max_attempts: 2,
                base_delay_secs: 0.001,
                ..RetrySettings::default()
            },
            ..DependencySettings::default()
        };
        let service: Arc<dyn SandboxService> = sandbox;
        Protected::new(service, Arc::new(ResilientClient::from_settings("sandbox", &settings)))
    }

    #[tokio::test]
    async fn test_sandbox_escalates_malicious_document() {
        let sandbox = Arc::new(ScriptedSandbox {
            calls: AtomicU32::new(0),
            report: Some(SandboxReport {
                verdict: SandboxVerdict::Malicious,
                threat_score: 0.95,
            }),
        });
        let analyzer = AttachmentAnalyzer::with_sandbox(bind(sandbox.clone()));

        let analysis = analyzer
            .analyze_with_enrichment(&[
                AttachmentMeta::new("invoice.docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document", 900),
                AttachmentMeta::new("payload.exe", "application/x-msdownload", 900),
                AttachmentMeta::new("photo.png", "image/png", 900),
            ])
            .await;

        // Only the docx is inspectable and not already flagged
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.suspicious_count, 2);
        assert_eq!(
            analysis.indicators,
            vec![
                "suspicious_attachment:payload.exe".to_string(),
                "sandbox_malicious:invoice.docx".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_sandbox_outage_degrades() {
        let sandbox = Arc::new(ScriptedSandbox {
            calls: AtomicU32::new(0),
            report: None,
        });
        let analyzer = AttachmentAnalyzer::with_sandbox(bind(sandbox.clone()));

        let analysis = analyzer
            .analyze_with_enrichment(&[
                AttachmentMeta::new("a.pdf", "application/pdf", 1),
                AttachmentMeta::new("b.zip", "application/zip", 1),
            ])
            .await;

        assert!(analysis.sandbox_unavailable);
        assert_eq!(analysis.suspicious_count, 0);
        assert_eq!(analysis.indicators, vec!["sandbox_unavailable".to_string()]);
        // Two attempts per attachment
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 4);
    }
}
