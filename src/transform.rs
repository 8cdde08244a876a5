use crate::error::{Result, SyncError};
use crate::http::{Clock, Fetcher, HttpClient};
use crate::models::{Subject, SubjectEnvelope};
use crate::record::{CanonicalRecord, RemoteRecordRef};

pub struct Transformer<'a, C, K> {
    fetcher: &'a Fetcher<C, K>,
    base_url: &'a str,
}

impl<'a, C: HttpClient, K: Clock> Transformer<'a, C, K> {
    pub fn new(fetcher: &'a Fetcher<C, K>, base_url: &'a str) -> Self {
        Self { fetcher, base_url }
    }

    pub fn subject_url(&self, subject_id: u64) -> String {
        format!("{}/subjects/{}", self.base_url.trim_end_matches('/'), subject_id)
    }

    pub async fn fetch_and_transform(&self, record_ref: &RemoteRecordRef) -> Result<CanonicalRecord> {
        let url = self.subject_url(record_ref.subject_id);
        let response = self.fetcher.fetch(&url).await?;
        let envelope: SubjectEnvelope = serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::decode(format!("subject {}", record_ref.subject_id), e))?;

        let record = transform(record_ref.subject_id, envelope.data);
        tracing::debug!(
            subject_id = record.id(),
            characters = record.display_text(),
            "loaded subject"
        );
        Ok(record)
    }
}

/// Maps a subject payload onto a canonical record.
///
/// Meanings are the accepted primary meanings followed by every auxiliary
/// meaning that is not blacklisted. Readings keep only accepted answers.
pub fn transform(subject_id: u64, subject: Subject) -> CanonicalRecord {
    let meanings = subject
        .meanings
        .into_iter()
        .filter(|m| m.accepted_answer)
        .map(|m| m.meaning)
        .chain(
            subject
                .auxiliary_meanings
                .into_iter()
                .filter(|m| !m.is_blacklisted())
                .map(|m| m.meaning),
        )
        .collect();

    let readings = subject
        .readings
        .into_iter()
        .filter(|r| r.accepted_answer)
        .map(|r| r.reading)
        .collect();

    let (audio_url, audio_content_type) = subject
        .pronunciation_audios
        .into_iter()
        .next()
        .map_or((None, None), |a| (Some(a.url), a.content_type));

    CanonicalRecord::new(subject_id, subject.characters)
        .with_meanings(meanings)
        .with_readings(readings)
        .with_audio_url(audio_url)
        .with_audio_content_type(audio_content_type)
        .with_tags(subject.parts_of_speech)
}
