//! Walks the cursor-linked assignments listing.

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{Stream, TryStreamExt, stream};

use crate::error::{Result, SyncError};
use crate::http::{Clock, Fetcher, HttpClient};
use crate::models::AssignmentPage;
use crate::record::RemoteRecordRef;

/// The listing answers 422 when nothing changed since `updated_after`.
const FRESH_DATA_STATUS: u16 = 422;

pub struct Lister<'a, C, K> {
    fetcher: &'a Fetcher<C, K>,
    base_url: &'a str,
}

impl<'a, C: HttpClient, K: Clock> Lister<'a, C, K> {
    pub fn new(fetcher: &'a Fetcher<C, K>, base_url: &'a str) -> Self {
        Self { fetcher, base_url }
    }

    pub fn first_page_url(&self, since: Option<DateTime<Utc>>) -> String {
        let mut url = format!(
            "{}/assignments?started=true&subject_types=vocabulary",
            self.base_url.trim_end_matches('/')
        );
        if let Some(since) = since {
            let ts = since.to_rfc3339_opts(SecondsFormat::Micros, true);
            url.push_str("&updated_after=");
            url.push_str(&urlencoding::encode(&ts));
        }
        url
    }

    /// Lazily yields the filtered refs of each page, in page order, following
    /// `pages.next_url` until it is null. Nothing is checkpointed: a failed
    /// walk restarts from the first page next time.
    pub fn pages(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> impl Stream<Item = Result<Vec<RemoteRecordRef>>> + '_ {
        let first = self.first_page_url(since);

        stream::try_unfold(Some(first), move |next| async move {
            match next {
                Some(url) => self.fetch_page(&url, since).await,
                None => Ok(None),
            }
        })
    }

    /// Returns the page's refs and the cursor to the next page, or `None` when
    /// the server reports fresh data.
    async fn fetch_page(
        &self,
        url: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<(Vec<RemoteRecordRef>, Option<String>)>> {
        let response = self.fetcher.send(url).await?;
        if response.status == FRESH_DATA_STATUS {
            tracing::info!("data is still fresh, nothing to list");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(SyncError::transport(
                url,
                format!("unexpected status {}", response.status),
            ));
        }

        let page: AssignmentPage = serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::decode(format!("assignments page {}", url), e))?;
        let refs = filter_started_since(&page, since);
        tracing::debug!(url = %url, kept = refs.len(), total = page.data.len(), "listed page");

        Ok(Some((refs, page.pages.next_url)))
    }

    pub async fn list_changed_subject_ids(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecordRef>> {
        self.pages(since).try_concat().await
    }
}

/// The server filters on the assignment envelope's update time; whether a
/// subject is new to us is decided by its own `started_at`.
pub fn filter_started_since(
    page: &AssignmentPage,
    since: Option<DateTime<Utc>>,
) -> Vec<RemoteRecordRef> {
    page.data
        .iter()
        .filter_map(|envelope| {
            let started_at = envelope.data.started_at?;
            let is_new = since.is_none_or(|since| started_at >= since);
            is_new.then_some(RemoteRecordRef {
                subject_id: envelope.data.subject_id,
                started_at,
            })
        })
        .collect()
}
