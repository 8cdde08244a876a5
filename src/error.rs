use std::error::Error;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Everything that can abort a sync cycle.
///
/// Rate limiting (429) and the listing's "data is still fresh" (422) are
/// flow-control signals handled inside the fetcher and lister; they never
/// show up here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("unexpected payload for {context}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("download of {url} failed with status {status}")]
    MediaFetch { url: String, status: u16 },

    #[error("collection error")]
    Collection(#[source] anyhow::Error),

    #[error("sync cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn transport(url: &str, reason: impl ToString) -> Self {
        SyncError::Transport {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        SyncError::Decode {
            context: context.into(),
            source,
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(error: anyhow::Error) -> Self {
        SyncError::Collection(error)
    }
}

/// Renders an error and all of its sources as `outer: inner: root`.
pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
