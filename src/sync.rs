//! The sync cycle: list, fetch, write, then advance the watermark.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::collection::{Collection, DedupScope};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http::{Clock, Fetcher, HttpClient};
use crate::lister::Lister;
use crate::progress::{NoopProgress, ProgressObserver};
use crate::record::{CanonicalRecord, RemoteRecordRef};
use crate::transform::Transformer;
use crate::writer::{Writer, WriterOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Listing,
    Fetching,
    Writing,
    Succeeded,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Listing => "listing",
            SyncState::Fetching => "fetching",
            SyncState::Writing => "writing",
            SyncState::Succeeded => "succeeded",
            SyncState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a cycle needs to know, passed in explicitly at construction.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub api_base_url: String,
    pub deck_name: String,
    pub include_audio: bool,
    pub dedup_scope: DedupScope,
    pub last_sync: Option<DateTime<Utc>>,
}

impl From<&Config> for SyncSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            api_base_url: cfg.api_base_url.clone(),
            deck_name: cfg.deck_name.clone(),
            include_audio: cfg.include_audio,
            dedup_scope: cfg.dedup_scope,
            last_sync: cfg.last_sync,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub listed: usize,
    pub fetched: usize,
    pub written: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// The watermark to persist for the next cycle.
    pub watermark: DateTime<Utc>,
    pub stats: SyncStats,
}

pub struct SyncEngine<C, K> {
    settings: SyncSettings,
    fetcher: Fetcher<C, K>,
    collection: Collection,
    progress: Arc<dyn ProgressObserver>,
    state: SyncState,
}

impl<C: HttpClient, K: Clock> SyncEngine<C, K> {
    pub fn new(settings: SyncSettings, fetcher: Fetcher<C, K>, collection: Collection) -> Self {
        Self {
            settings,
            fetcher,
            collection,
            progress: Arc::new(NoopProgress),
            state: SyncState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Cancelling this token aborts the cycle at the next record boundary or
    /// rate-limit wait.
    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.fetcher.cancellation_token().clone()
    }

    /// Runs one cycle.
    ///
    /// Only a fully successful cycle moves the watermark, and it moves to the
    /// time the cycle started rather than to any record's timestamp. A failed
    /// cycle leaves it alone; notes written before the failure stay and are
    /// skipped as duplicates next time.
    pub async fn run(&mut self) -> Result<SyncOutcome> {
        let started = self.fetcher.clock().now();
        tracing::info!(
            since = ?self.settings.last_sync,
            deck = %self.settings.deck_name,
            "starting sync cycle"
        );

        let result = self.run_stages().await;
        match result {
            Ok(stats) => {
                let watermark = self
                    .settings
                    .last_sync
                    .map_or(started, |previous| previous.max(started));
                self.settings.last_sync = Some(watermark);
                self.state = SyncState::Succeeded;

                tracing::info!(
                    listed = stats.listed,
                    written = stats.written,
                    skipped = stats.skipped,
                    watermark = %watermark,
                    "sync cycle complete"
                );
                Ok(SyncOutcome { watermark, stats })
            }
            Err(e) => {
                let failed_in = self.state;
                self.state = SyncState::Failed;
                match &e {
                    SyncError::Cancelled => tracing::warn!(stage = %failed_in, "sync cycle cancelled"),
                    _ => tracing::error!(
                        stage = %failed_in,
                        error = %crate::error::unpack_error(&e),
                        "sync cycle failed"
                    ),
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        self.state = SyncState::Listing;
        let refs = Lister::new(&self.fetcher, &self.settings.api_base_url)
            .list_changed_subject_ids(self.settings.last_sync)
            .await?;
        stats.listed = refs.len();

        if refs.is_empty() {
            tracing::info!("no new vocabulary");
            return Ok(stats);
        }

        self.state = SyncState::Fetching;
        let records = self.fetch_records(&refs).await?;
        stats.fetched = records.len();

        self.state = SyncState::Writing;
        let options = WriterOptions {
            deck_name: self.settings.deck_name.clone(),
            include_audio: self.settings.include_audio,
            dedup_scope: self.settings.dedup_scope,
        };
        let written = Writer::new(&self.collection, &self.fetcher, options)
            .write_all(&records)
            .await?;
        stats.written = written;
        stats.skipped = records.len() - written;

        Ok(stats)
    }

    async fn fetch_records(
        &self,
        refs: &[RemoteRecordRef],
    ) -> Result<Vec<CanonicalRecord>> {
        let transformer = Transformer::new(&self.fetcher, &self.settings.api_base_url);
        let total = refs.len();
        let mut records = Vec::with_capacity(total);

        for (i, record_ref) in refs.iter().enumerate() {
            if self.fetcher.cancellation_token().is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let record = transformer.fetch_and_transform(record_ref).await?;
            let label = format!(
                "Loading WaniKani vocabulary: {} ({}/{})",
                record.display_text(),
                i + 1,
                total
            );
            self.progress.update(&label, i + 1, total);
            records.push(record);
        }

        Ok(records)
    }
}
