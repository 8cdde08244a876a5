//! Deduplicating writer: maps canonical records onto notes in the local
//! collection, importing each subject at most once.

use std::collections::BTreeMap;

use crate::collection::{ChecksumScope, Collection, DedupScope, NewNote, NoteType};
use crate::error::{Result, SyncError};
use crate::http::{Clock, Fetcher, HttpClient};
use crate::record::CanonicalRecord;
use crate::schema::{
    self, FIELD_KANJI, FIELD_MEANINGS, FIELD_PARTS_OF_SPEECH, FIELD_PRONUNCIATION, FIELD_READING,
    FIELD_SUBJECT_ID,
};

const DEFAULT_AUDIO_EXTENSION: &str = "mp3";
const PREFERRED_AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "wav", "m4a"];
const FIELD_SEPARATOR: &str = ", ";

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub deck_name: String,
    pub include_audio: bool,
    pub dedup_scope: DedupScope,
}

pub struct Writer<'a, C, K> {
    collection: &'a Collection,
    fetcher: &'a Fetcher<C, K>,
    options: WriterOptions,
}

struct Target {
    note_type: NoteType,
    deck_id: i64,
    scope: ChecksumScope,
}

impl<'a, C: HttpClient, K: Clock> Writer<'a, C, K> {
    pub fn new(collection: &'a Collection, fetcher: &'a Fetcher<C, K>, options: WriterOptions) -> Self {
        Self {
            collection,
            fetcher,
            options,
        }
    }

    /// Writes every record whose fingerprint is not yet present and returns
    /// how many notes were created.
    ///
    /// Writes happen in one transaction that is committed once at the end,
    /// including when a record fails midway: notes written before the failure
    /// are kept, and the error is returned afterwards. If the commit itself
    /// fails the batch is rolled back and the collection stays usable.
    pub async fn write_all(&self, records: &[CanonicalRecord]) -> Result<usize> {
        let target = self.resolve_target().await?;

        self.collection.begin().await?;
        let mut written = 0;
        let outcome = self.write_records(records, &target, &mut written).await;
        let flushed = self.collection.flush().await;

        match (outcome, flushed) {
            (Ok(()), Ok(())) => Ok(written),
            (Ok(()), Err(e)) => Err(SyncError::Collection(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(flush_err)) => {
                tracing::warn!("failed to commit partial batch: {:#}", flush_err);
                Err(e)
            }
        }
    }

    async fn resolve_target(&self) -> Result<Target> {
        let note_type = schema::ensure_schema(self.collection).await?;
        let deck = self
            .collection
            .get_or_create_deck(&self.options.deck_name)
            .await?;

        let scope = match self.options.dedup_scope {
            DedupScope::Deck => ChecksumScope::Deck(deck.id),
            DedupScope::Collection => ChecksumScope::NoteType(note_type.id),
        };

        Ok(Target {
            note_type,
            deck_id: deck.id,
            scope,
        })
    }

    async fn write_records(
        &self,
        records: &[CanonicalRecord],
        target: &Target,
        written: &mut usize,
    ) -> Result<()> {
        for record in records {
            if self.fetcher.cancellation_token().is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if self.write_one(record, target).await? {
                *written += 1;
            }
        }
        Ok(())
    }

    async fn write_one(&self, record: &CanonicalRecord, target: &Target) -> Result<bool> {
        let csum = record.fingerprint();
        let existing = self
            .collection
            .find_notes_by_checksum(&csum, target.scope)
            .await?;
        if !existing.is_empty() {
            tracing::debug!(subject_id = record.id(), "already imported, skipping");
            return Ok(false);
        }

        let pronunciation = match record.audio_url() {
            Some(url) if self.options.include_audio => self.store_audio(record, url).await?,
            _ => String::new(),
        };

        let mut fields = BTreeMap::from([
            (FIELD_SUBJECT_ID.to_string(), record.id().to_string()),
            (FIELD_MEANINGS.to_string(), record.meanings().join(FIELD_SEPARATOR)),
            (FIELD_KANJI.to_string(), record.display_text().to_string()),
            (FIELD_READING.to_string(), record.readings().join(FIELD_SEPARATOR)),
            (FIELD_PRONUNCIATION.to_string(), pronunciation),
        ]);

        let parts_of_speech = record.tags().unwrap_or_default();
        if target.note_type.fields.iter().any(|f| f == FIELD_PARTS_OF_SPEECH) {
            fields.insert(
                FIELD_PARTS_OF_SPEECH.to_string(),
                parts_of_speech.join(FIELD_SEPARATOR),
            );
        }

        let note = NewNote {
            note_type_id: target.note_type.id,
            deck_id: target.deck_id,
            csum,
            fields,
            tags: parts_of_speech.iter().map(|t| tag_name(t)).collect(),
        };
        let note_id = self.collection.add_note(&note).await?;

        tracing::debug!(subject_id = record.id(), note_id, "wrote note");
        Ok(true)
    }

    /// Downloads the pronunciation into the media store and returns the
    /// field value that plays it.
    async fn store_audio(&self, record: &CanonicalRecord, url: &str) -> Result<String> {
        let response = self.fetcher.download(url).await?;
        let filename = format!(
            "{}.{}",
            media_stem(record),
            media_extension(record.audio_content_type().or(response.content_type()), url)
        );

        self.collection.write_media(&filename, &response.body).await?;
        tracing::debug!(subject_id = record.id(), filename = %filename, "stored audio");

        Ok(format!("[sound:{}]", filename))
    }
}

/// Media files are named after the vocabulary itself; characters that are
/// not valid in file names are replaced.
pub fn media_stem(record: &CanonicalRecord) -> String {
    let stem: String = record
        .display_text()
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if stem.is_empty() {
        record.id().to_string()
    } else {
        stem
    }
}

pub fn media_extension(content_type: Option<&str>, url: &str) -> String {
    let from_mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|exts| {
            exts.iter()
                .copied()
                .find(|ext| PREFERRED_AUDIO_EXTENSIONS.contains(ext))
                .or_else(|| exts.first().copied())
        });
    if let Some(ext) = from_mime {
        return ext.to_string();
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    match last_segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_AUDIO_EXTENSION.to_string(),
    }
}

fn tag_name(part_of_speech: &str) -> String {
    part_of_speech.split_whitespace().collect::<Vec<_>>().join("_")
}
