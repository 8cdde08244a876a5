//! The importer's note type, looked up by name and versioned.
//!
//! Each generation only ever appends fields, so an older note type is brought
//! up to date by adding whatever is missing and replacing the templates.

use anyhow::Result;

use crate::collection::{Collection, NoteType, Template};

pub const NOTE_TYPE_NAME: &str = "WaniKaniVocabAddOn";
pub const TEMPLATE_NAME: &str = "WaniKaniVocabCard";

pub const FIELD_SUBJECT_ID: &str = "WaniKaniSubjectId";
pub const FIELD_MEANINGS: &str = "Meanings";
pub const FIELD_KANJI: &str = "Kanji";
pub const FIELD_READING: &str = "Reading";
pub const FIELD_PRONUNCIATION: &str = "Pronunciation";
pub const FIELD_PARTS_OF_SPEECH: &str = "PartsOfSpeech";

/// Fields in the order each generation introduced them.
const GENERATIONS: &[&[&str]] = &[
    &[
        FIELD_SUBJECT_ID,
        FIELD_MEANINGS,
        FIELD_KANJI,
        FIELD_READING,
        FIELD_PRONUNCIATION,
    ],
    &[FIELD_PARTS_OF_SPEECH],
];

pub const CURRENT_VERSION: i64 = GENERATIONS.len() as i64;

pub fn fields_for(version: i64) -> Vec<String> {
    GENERATIONS
        .iter()
        .take(version.max(0) as usize)
        .flat_map(|generation| generation.iter().map(|f| f.to_string()))
        .collect()
}

pub fn templates_for(version: i64) -> Vec<Template> {
    let mut afmt = format!(
        "{{{{{FIELD_MEANINGS}}}}}<hr>{{{{{FIELD_KANJI}}}}}<hr>{{{{{FIELD_READING}}}}}<hr>{{{{{FIELD_PRONUNCIATION}}}}}"
    );
    if version >= 2 {
        afmt.push_str(&format!("<hr>{{{{{FIELD_PARTS_OF_SPEECH}}}}}"));
    }

    vec![Template {
        name: TEMPLATE_NAME.to_string(),
        qfmt: format!("{{{{{FIELD_MEANINGS}}}}}"),
        afmt,
    }]
}

/// Returns the importer's note type, creating or upgrading it as needed.
/// Safe to call before every batch.
pub async fn ensure_schema(collection: &Collection) -> Result<NoteType> {
    let Some(existing) = collection.note_type_by_name(NOTE_TYPE_NAME).await? else {
        tracing::info!(version = CURRENT_VERSION, "creating note type {}", NOTE_TYPE_NAME);
        return collection
            .add_note_type(
                NOTE_TYPE_NAME,
                CURRENT_VERSION,
                &fields_for(CURRENT_VERSION),
                &templates_for(CURRENT_VERSION),
            )
            .await;
    };

    if existing.version > CURRENT_VERSION {
        tracing::warn!(
            version = existing.version,
            supported = CURRENT_VERSION,
            "note type is newer than this build, using it as is"
        );
        return Ok(existing);
    }
    if existing.version == CURRENT_VERSION {
        return Ok(existing);
    }

    let mut fields = existing.fields.clone();
    for field in fields_for(CURRENT_VERSION) {
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    let templates = templates_for(CURRENT_VERSION);

    tracing::info!(
        from = existing.version,
        to = CURRENT_VERSION,
        "migrating note type {}",
        NOTE_TYPE_NAME
    );
    collection
        .update_note_type(existing.id, CURRENT_VERSION, &fields, &templates)
        .await?;

    Ok(NoteType {
        version: CURRENT_VERSION,
        fields,
        templates,
        ..existing
    })
}
