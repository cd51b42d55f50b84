//! Store Module
//!
//! All process-local mutable state (intent cache, last-good specs, quota
//! buckets, experiments, proof cards) sits behind the [`Store`] trait and is
//! injected into the composer. Every method completes inside one
//! synchronous critical section; nothing holds a lock across an `.await`.

pub mod cache;
pub mod clock;
mod memory;

pub use cache::TtlCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::contracts::Spec;
use crate::experiments::Experiment;
use crate::intent::IntentResolution;
use crate::safety::proof::ProofCard;

/// Quota window sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaWindow {
    Minute,
    Day,
}

impl QuotaWindow {
    pub fn millis(self) -> u64 {
        match self {
            QuotaWindow::Minute => 60_000,
            QuotaWindow::Day => 86_400_000,
        }
    }
}

/// Request counter for one identity and window. Replaced once `reset_at_ms`
/// has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBucket {
    pub count: u32,
    pub reset_at_ms: u64,
}

pub trait Store: Send + Sync {
    fn cached_intent(&self, key: &str) -> Option<IntentResolution>;
    fn cache_intent(&self, key: &str, value: IntentResolution);

    fn last_good(&self, session_id: &str) -> Option<Spec>;
    /// Callers must only invoke this after a passing contracts check.
    fn commit_last_good(&self, session_id: &str, spec: Spec);

    /// Fetches the minute and day buckets for `identity` (creating or
    /// renewing expired ones), applies `f` to both in one atomic step and
    /// returns them as `(minute, day)`.
    fn update_buckets(
        &self,
        identity: &str,
        now_ms: u64,
        f: &mut dyn FnMut(&mut QuotaBucket, &mut QuotaBucket),
    ) -> (QuotaBucket, QuotaBucket);

    fn insert_experiment(&self, experiment: Experiment);
    fn experiment(&self, id: &str) -> Option<Experiment>;
    /// Applies `f` to the stored experiment and returns the updated copy.
    fn update_experiment(&self, id: &str, f: &mut dyn FnMut(&mut Experiment))
        -> Option<Experiment>;
    fn remove_experiment(&self, id: &str) -> Option<Experiment>;

    fn put_proof(&self, card: ProofCard);
    fn proof(&self, page_id: &str) -> Option<ProofCard>;
}

/// Locks `m`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
