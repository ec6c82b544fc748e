use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

impl AttachmentMeta {
    pub fn new(filename: &str, content_type: &str, size: u64) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size,
        }
    }

    /// Lowercased final extension, if the filename has one.
    pub fn extension(&self) -> Option<String> {
        let name = self.filename.trim();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    /// Declared mime type without parameters, lowercased.
    pub fn mime_type(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }
}

/// Input to the analysis pipeline. Missing fields deserialize as empty and are
/// rejected by validation rather than by the decoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailRecord {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
    pub urls: Vec<String>,
}
