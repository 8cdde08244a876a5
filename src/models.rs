use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One page of `GET /assignments`.
#[derive(Debug, Deserialize)]
pub struct AssignmentPage {
    pub data: Vec<AssignmentEnvelope>,
    pub pages: Pages,
}

#[derive(Debug, Deserialize)]
pub struct Pages {
    pub next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentEnvelope {
    pub data: Assignment,
}

#[derive(Debug, Deserialize)]
pub struct Assignment {
    pub subject_id: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// `GET /subjects/{id}`.
#[derive(Debug, Deserialize)]
pub struct SubjectEnvelope {
    pub data: Subject,
}

#[derive(Debug, Deserialize)]
pub struct Subject {
    pub characters: String,
    pub meanings: Vec<Meaning>,
    pub auxiliary_meanings: Vec<AuxiliaryMeaning>,
    pub readings: Vec<Reading>,
    #[serde(default)]
    pub pronunciation_audios: Vec<PronunciationAudio>,
    #[serde(default)]
    pub parts_of_speech: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct Meaning {
    pub meaning: String,
    pub accepted_answer: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuxiliaryMeaning {
    pub meaning: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AuxiliaryMeaning {
    pub fn is_blacklisted(&self) -> bool {
        self.kind == "blacklist"
    }
}

#[derive(Debug, Deserialize)]
pub struct Reading {
    pub reading: String,
    pub accepted_answer: bool,
}

#[derive(Debug, Deserialize)]
pub struct PronunciationAudio {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}
