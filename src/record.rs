use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// A subject the listing reported as started after the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRecordRef {
    pub subject_id: u64,
    pub started_at: DateTime<Utc>,
}

/// The pipeline's storage-agnostic view of one vocabulary subject.
///
/// Only `id` takes part in deduplication. Built once by the transformer and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    id: u64,
    display_text: String,
    meanings: Vec<String>,
    readings: Vec<String>,
    audio_url: Option<String>,
    audio_content_type: Option<String>,
    tags: Option<Vec<String>>,
}

impl CanonicalRecord {
    pub fn new(id: u64, display_text: impl Into<String>) -> Self {
        Self {
            id,
            display_text: display_text.into(),
            meanings: Vec::new(),
            readings: Vec::new(),
            audio_url: None,
            audio_content_type: None,
            tags: None,
        }
    }

    pub fn with_meanings(mut self, meanings: Vec<String>) -> Self {
        self.meanings = meanings;
        self
    }

    pub fn with_readings(mut self, readings: Vec<String>) -> Self {
        self.readings = readings;
        self
    }

    pub fn with_audio_url(mut self, audio_url: Option<String>) -> Self {
        self.audio_url = audio_url;
        self
    }

    pub fn with_audio_content_type(mut self, content_type: Option<String>) -> Self {
        self.audio_content_type = content_type;
        self
    }

    pub fn with_tags(mut self, tags: Option<Vec<String>>) -> Self {
        self.tags = tags;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    pub fn meanings(&self) -> &[String] {
        &self.meanings
    }

    pub fn readings(&self) -> &[String] {
        &self.readings
    }

    pub fn audio_url(&self) -> Option<&str> {
        self.audio_url.as_deref()
    }

    /// The media type the payload declares for `audio_url`, if any.
    pub fn audio_content_type(&self) -> Option<&str> {
        self.audio_content_type.as_deref()
    }

    pub fn tags(&self) -> Option<&[String]> {
        self.tags.as_deref()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.id.to_string())
    }
}

/// Stable digest used for the duplicate lookup. Must stay identical across
/// releases or earlier imports stop being recognised.
pub fn fingerprint(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
