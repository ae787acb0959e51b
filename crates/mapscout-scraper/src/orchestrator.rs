//! Run driver: one search per query, then extraction of every reference.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use mapscout_core::{AppConfig, ListingDetails, ListingRecord, Query};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::sleep;

use crate::consent::{dismiss_consent, ConsentPolicy};
use crate::error::{ScrapeError, SessionError};
use crate::feed::{collect_references, FeedPolicy, ScrollPolicy};
use crate::normalize::search_url;
use crate::retry::retry_with_backoff;
use crate::session::BrowserSession;
use crate::view::{extract_listing, ViewPolicy};

/// Saved-record interval between progress log lines.
const PROGRESS_EVERY: usize = 5;

/// Everything the pipeline needs to know about timing and targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub maps_base_url: String,
    pub language: String,
    pub search_settle: Duration,
    pub navigation_retries: u32,
    pub navigation_backoff: Duration,
    pub consent: ConsentPolicy,
    pub feed: FeedPolicy,
    pub view: ViewPolicy,
    /// Upper bound on concurrent listing extractions.
    pub workers: usize,
}

impl PipelineConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig, max_pages: u32) -> Self {
        let consent = ConsentPolicy {
            timeout: config.consent_timeout(),
            ..ConsentPolicy::default()
        };
        let feed = FeedPolicy {
            feed_timeout: config.feed_timeout(),
            max_pages,
            scroll: ScrollPolicy {
                settle: config.scroll_settle(),
                stagnation_threshold: config.scroll_stagnation_threshold,
                max_iterations: config.scroll_max_iterations,
            },
            ..FeedPolicy::default()
        };
        let view = ViewPolicy {
            load_timeout: config.listing_timeout(),
            ..ViewPolicy::default()
        };
        Self {
            maps_base_url: config.maps_base_url.clone(),
            language: config.language.clone(),
            search_settle: config.search_settle(),
            navigation_retries: 2,
            navigation_backoff: Duration::from_secs(1),
            consent,
            feed,
            view,
            workers: config.workers.max(1),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default(), FeedPolicy::default().max_pages)
    }
}

/// Drives searches and extractions over a set of browser sessions.
///
/// The first session runs every search; all sessions share the extraction
/// work, at most `workers` at a time.
pub struct Orchestrator<S> {
    config: PipelineConfig,
    sessions: Vec<S>,
    consent_dismissed: bool,
}

impl<S: BrowserSession> Orchestrator<S> {
    #[must_use]
    pub fn new(config: PipelineConfig, session: S) -> Self {
        Self {
            config,
            sessions: vec![session],
            consent_dismissed: false,
        }
    }

    /// # Errors
    ///
    /// Returns [`ScrapeError::NoSessions`] if `sessions` is empty.
    pub fn with_sessions(config: PipelineConfig, sessions: Vec<S>) -> Result<Self, ScrapeError> {
        if sessions.is_empty() {
            return Err(ScrapeError::NoSessions);
        }
        Ok(Self {
            config,
            sessions,
            consent_dismissed: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Gives the sessions back, e.g. for shutdown.
    #[must_use]
    pub fn into_sessions(self) -> Vec<S> {
        self.sessions
    }

    /// Runs every query in order and returns the records of all listings
    /// that loaded with a name.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Session`] only when a session is lost; every
    /// other failure skips the affected query or listing.
    pub async fn run(&mut self, queries: &[Query]) -> Result<Vec<ListingRecord>, ScrapeError> {
        let mut records = Vec::new();
        let total = queries.len();

        for (position, query) in queries.iter().enumerate() {
            tracing::info!(
                area = %query.area,
                keyword = %query.keyword,
                query = position + 1,
                total,
                "searching"
            );
            let references = self.discover(query).await?;
            let saved = self.extract_all(query, &references, &mut records).await?;
            tracing::info!(area = %query.area, saved, references = references.len(), "area complete");
        }

        tracing::info!(total = records.len(), "scrape finished");
        Ok(records)
    }

    /// Searches for `query` and collects its listing references.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Session`] if the search session is lost.
    pub async fn discover(&mut self, query: &Query) -> Result<BTreeSet<String>, ScrapeError> {
        let url = search_url(
            &self.config.maps_base_url,
            &query.search_phrase(),
            &self.config.language,
        );
        let session = self.sessions.first_mut().ok_or(ScrapeError::NoSessions)?;

        let navigated = retry_with_backoff(
            self.config.navigation_retries,
            self.config.navigation_backoff,
            session,
            |s: &mut S| {
                let url = url.clone();
                Box::pin(async move { s.navigate(&url).await })
            },
        )
        .await;
        match navigated {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                tracing::warn!(area = %query.area, error = %err, "search navigation failed, skipping area");
                return Ok(BTreeSet::new());
            }
        }

        if !self.consent_dismissed {
            self.consent_dismissed = dismiss_consent(session, &self.config.consent).await?;
        }
        sleep(self.config.search_settle).await;

        let references = collect_references(session, &self.config.feed).await?;
        tracing::info!(area = %query.area, references = references.len(), "search collected");
        Ok(references)
    }

    /// Extracts every reference and appends named listings to `records`.
    /// Returns how many were saved.
    async fn extract_all(
        &mut self,
        query: &Query,
        references: &BTreeSet<String>,
        records: &mut Vec<ListingRecord>,
    ) -> Result<usize, ScrapeError> {
        let workers = self.config.workers.min(self.sessions.len()).max(1);
        let view = self.config.view;
        let pool = SessionPool::new(std::mem::take(&mut self.sessions));

        let outcome = {
            let pool = &pool;
            let mut extractions = stream::iter(references.iter().enumerate())
                .map(|(index, reference)| async move {
                    let mut lease = pool.acquire().await;
                    let result = match lease.as_mut().and_then(Lease::session) {
                        Some(session) => extract_listing(session, reference, &view).await,
                        None => Err(SessionError::Fatal("session pool closed".to_string())),
                    };
                    (index, reference, result)
                })
                .buffer_unordered(workers);

            let mut saved = 0usize;
            let mut failure = None;
            while let Some((index, reference, result)) = extractions.next().await {
                match result {
                    Ok(Some(details)) => {
                        if push_record(records, details, query) {
                            saved += 1;
                            if saved % PROGRESS_EVERY == 0 {
                                tracing::info!(area = %query.area, saved, "extraction progress");
                            }
                        } else {
                            tracing::debug!(index, reference = %reference, "listing without a name discarded");
                        }
                    }
                    Ok(None) => tracing::debug!(index, reference = %reference, "listing skipped"),
                    Err(err) => {
                        tracing::error!(index, reference = %reference, error = %err, "browser session lost");
                        failure = Some(err);
                        break;
                    }
                }
            }
            failure.map_or(Ok(saved), Err)
        };

        self.sessions = pool.into_inner();
        outcome.map_err(ScrapeError::from)
    }
}

fn push_record(records: &mut Vec<ListingRecord>, details: ListingDetails, query: &Query) -> bool {
    match ListingRecord::from_details(details, query) {
        Some(record) => {
            records.push(record);
            true
        }
        None => false,
    }
}

/// Fixed set of sessions handed out one at a time.
struct SessionPool<S> {
    idle: Mutex<Vec<S>>,
    permits: Semaphore,
}

impl<S> SessionPool<S> {
    fn new(sessions: Vec<S>) -> Self {
        let permits = Semaphore::new(sessions.len());
        Self {
            idle: Mutex::new(sessions),
            permits,
        }
    }

    /// Waits for an idle session. `None` only if the pool is broken.
    async fn acquire(&self) -> Option<Lease<'_, S>> {
        let permit = self.permits.acquire().await.ok()?;
        let session = self.idle.lock().ok()?.pop()?;
        Some(Lease {
            pool: self,
            session: Some(session),
            _permit: permit,
        })
    }

    fn into_inner(self) -> Vec<S> {
        self.idle
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Exclusive use of one pooled session; returned to the pool on drop.
struct Lease<'a, S> {
    pool: &'a SessionPool<S>,
    session: Option<S>,
    _permit: SemaphorePermit<'a>,
}

impl<S> Lease<'_, S> {
    fn session(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }
}

impl<S> Drop for Lease<'_, S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            match self.pool.idle.lock() {
                Ok(mut idle) => idle.push(session),
                Err(poisoned) => poisoned.into_inner().push(session),
            }
        }
    }
}
