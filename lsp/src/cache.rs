//! Versioned result cache for pull diagnostics.
//!
//! For each source the cache remembers the versions it last saw and the result
//! id it last handed out. Staleness is checked in tiers:
//!
//! 1. cheap version (edit stamp): equal means unchanged;
//! 2. expensive version (content checksum): equal means the stamp moved
//!    without a content change, still unchanged;
//! 3. data checksum (only with [`VersionedPullCache::get_or_compute_new_data`]):
//!    the data is recomputed, and if it hashes the same as last time the
//!    client keeps what it has.
//!
//! Tiers only apply when the client's previous result id matches the cache's.
//! Anything else gets a fresh, never reused result id.
//!
//! A computation that fails is reported under a result id the cache never
//! records, so the client's next pull recomputes instead of matching it.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use diagpull_types::{ProjectOrDocumentId, ResultId};
use serde::Serialize;

use crate::checksum::Checksum;
use crate::report::PreviousPullResult;

/// Process-wide so result ids stay unique across categories and handlers.
static NEXT_RESULT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct CacheEntry<C, E> {
    cheap: C,
    expensive: E,
    result_id: ResultId,
    /// Hash of the data last reported under `result_id`, when known.
    data_checksum: Option<Checksum>,
}

/// What [`VersionedPullCache::get_or_compute_new_data`] decided for a source.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheOutcome<D> {
    /// The client's previous result is still current.
    Unchanged,
    /// New data, recorded under `result_id`.
    Updated { result_id: ResultId, data: D },
    /// The data could not be computed. `result_id` is not recorded.
    Failed { result_id: ResultId },
}

enum VersionCheck<C, E> {
    Unchanged,
    Stale {
        cheap: C,
        expensive: E,
        /// Entry the client is in sync with, if any.
        in_sync: Option<CacheEntry<C, E>>,
    },
}

pub struct VersionedPullCache<C, E> {
    /// Prefix for result ids, normally the category name.
    unique_key: String,
    entries: DashMap<ProjectOrDocumentId, CacheEntry<C, E>>,
}

impl<C, E> VersionedPullCache<C, E>
where
    C: Clone + PartialEq + Debug + Send + Sync,
    E: Clone + PartialEq + Debug + Send + Sync,
{
    #[must_use]
    pub fn new(unique_key: impl Into<String>) -> Self {
        Self {
            unique_key: unique_key.into(),
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Result id the cache last assigned to `source_id`.
    #[must_use]
    pub fn result_id(&self, source_id: ProjectOrDocumentId) -> Option<ResultId> {
        self.entries.get(&source_id).map(|e| e.result_id.clone())
    }

    /// Decide from versions alone whether `source_id` needs a new result.
    ///
    /// There is no separate version scope argument: `compute_cheap` and
    /// `compute_expensive` capture whatever scope the versions are taken over
    /// (for diagnostics, the owning project and the projects it references).
    ///
    /// Returns `None` when the client's previous result is still current,
    /// otherwise a fresh result id that the caller must report new data under.
    pub async fn get_new_result_id<CF, CFut, EF, EFut>(
        &self,
        previous: &HashMap<ProjectOrDocumentId, PreviousPullResult>,
        source_id: ProjectOrDocumentId,
        compute_cheap: CF,
        compute_expensive: EF,
    ) -> Option<ResultId>
    where
        CF: FnOnce() -> CFut,
        CFut: Future<Output = C>,
        EF: FnOnce() -> EFut,
        EFut: Future<Output = E>,
    {
        match self
            .check_versions(previous, source_id, compute_cheap, compute_expensive)
            .await
        {
            VersionCheck::Unchanged => None,
            VersionCheck::Stale {
                cheap, expensive, ..
            } => Some(self.store(source_id, cheap, expensive, None)),
        }
    }

    /// Like [`Self::get_new_result_id`], but computes the data for stale
    /// sources and suppresses the new result when the data hashes the same as
    /// what the client already holds.
    ///
    /// `compute_data` yields `Ok(None)` when the source failed this round. The
    /// entry is then forgotten and the outcome carries an unrecorded result id.
    /// `Err` aborts without touching the entry.
    pub async fn get_or_compute_new_data<D, Err, CF, CFut, EF, EFut, DF, DFut>(
        &self,
        previous: &HashMap<ProjectOrDocumentId, PreviousPullResult>,
        source_id: ProjectOrDocumentId,
        compute_cheap: CF,
        compute_expensive: EF,
        compute_data: DF,
    ) -> Result<CacheOutcome<D>, Err>
    where
        D: Serialize,
        CF: FnOnce() -> CFut,
        CFut: Future<Output = C>,
        EF: FnOnce() -> EFut,
        EFut: Future<Output = E>,
        DF: FnOnce() -> DFut,
        DFut: Future<Output = Result<Option<D>, Err>>,
    {
        let (cheap, expensive, in_sync) = match self
            .check_versions(previous, source_id, compute_cheap, compute_expensive)
            .await
        {
            VersionCheck::Unchanged => return Ok(CacheOutcome::Unchanged),
            VersionCheck::Stale {
                cheap,
                expensive,
                in_sync,
            } => (cheap, expensive, in_sync),
        };

        let Some(data) = compute_data().await? else {
            tracing::debug!(
                cache = %self.unique_key,
                source = %source_id,
                "Computation failed; nothing recorded"
            );
            self.entries.remove(&source_id);
            return Ok(CacheOutcome::Failed {
                result_id: self.next_result_id(),
            });
        };
        let checksum = Checksum::of_serialized(&data);

        if let Some(entry) = in_sync
            && checksum.is_some()
            && entry.data_checksum == checksum
        {
            tracing::debug!(
                cache = %self.unique_key,
                source = %source_id,
                "Recomputed data is identical; keeping result id"
            );
            self.record_versions(source_id, &entry.result_id, cheap, expensive);
            return Ok(CacheOutcome::Unchanged);
        }

        let result_id = self.store(source_id, cheap, expensive, checksum);
        Ok(CacheOutcome::Updated { result_id, data })
    }

    /// Drop entries for sources that no longer exist.
    pub fn retain(&self, mut keep: impl FnMut(ProjectOrDocumentId) -> bool) {
        self.entries.retain(|id, _| keep(*id));
    }

    async fn check_versions<CF, CFut, EF, EFut>(
        &self,
        previous: &HashMap<ProjectOrDocumentId, PreviousPullResult>,
        source_id: ProjectOrDocumentId,
        compute_cheap: CF,
        compute_expensive: EF,
    ) -> VersionCheck<C, E>
    where
        CF: FnOnce() -> CFut,
        CFut: Future<Output = C>,
        EF: FnOnce() -> EFut,
        EFut: Future<Output = E>,
    {
        // Clone out so no map guard is held across an await.
        let cached = self.entries.get(&source_id).map(|e| e.clone());
        let in_sync = match (previous.get(&source_id), cached) {
            (Some(prev), Some(entry)) if prev.result_id == entry.result_id => Some(entry),
            _ => None,
        };

        let cheap = compute_cheap().await;

        let Some(entry) = in_sync else {
            let expensive = compute_expensive().await;
            return VersionCheck::Stale {
                cheap,
                expensive,
                in_sync: None,
            };
        };

        if entry.cheap == cheap {
            return VersionCheck::Unchanged;
        }

        let expensive = compute_expensive().await;
        if entry.expensive == expensive {
            tracing::debug!(
                cache = %self.unique_key,
                source = %source_id,
                "Version moved without a content change"
            );
            self.record_versions(source_id, &entry.result_id, cheap, expensive);
            return VersionCheck::Unchanged;
        }

        VersionCheck::Stale {
            cheap,
            expensive,
            in_sync: Some(entry),
        }
    }

    /// Refresh the versions of an entry that keeps its result id. Skipped if a
    /// concurrent request already moved the entry to another id.
    fn record_versions(
        &self,
        source_id: ProjectOrDocumentId,
        result_id: &ResultId,
        cheap: C,
        expensive: E,
    ) {
        if let Some(mut entry) = self.entries.get_mut(&source_id)
            && entry.result_id == *result_id
        {
            entry.cheap = cheap;
            entry.expensive = expensive;
        }
    }

    fn store(
        &self,
        source_id: ProjectOrDocumentId,
        cheap: C,
        expensive: E,
        data_checksum: Option<Checksum>,
    ) -> ResultId {
        let result_id = self.next_result_id();
        self.entries.insert(
            source_id,
            CacheEntry {
                cheap,
                expensive,
                result_id: result_id.clone(),
                data_checksum,
            },
        );
        result_id
    }

    fn next_result_id(&self) -> ResultId {
        ResultId::new(format!(
            "{}:{}",
            self.unique_key,
            NEXT_RESULT_ID.fetch_add(1, Ordering::Relaxed)
        ))
    }
}
