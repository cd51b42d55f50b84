use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{lock, Clock, QuotaBucket, QuotaWindow, Store, TtlCache};
use crate::contracts::Spec;
use crate::experiments::Experiment;
use crate::intent::IntentResolution;
use crate::safety::proof::ProofCard;

/// Single-process [`Store`] backed by mutex-guarded maps.
pub struct MemoryStore {
    intents: TtlCache<IntentResolution>,
    last_good: Mutex<HashMap<String, Spec>>,
    buckets: Mutex<BucketTable>,
    experiments: Mutex<HashMap<String, Experiment>>,
    proofs: Mutex<HashMap<String, ProofCard>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>, cache_ttl_ms: u64, cache_max_entries: usize) -> Self {
        Self {
            intents: TtlCache::new(clock, cache_ttl_ms, cache_max_entries),
            last_good: Mutex::new(HashMap::new()),
            buckets: Mutex::new(BucketTable::default()),
            experiments: Mutex::new(HashMap::new()),
            proofs: Mutex::new(HashMap::new()),
        }
    }

    /// Quota buckets currently held, live or not yet swept.
    pub fn quota_bucket_count(&self) -> usize {
        lock(&self.buckets).live.len()
    }
}

#[derive(Default)]
struct BucketTable {
    live: HashMap<(String, QuotaWindow), QuotaBucket>,
    next_sweep_ms: u64,
}

impl BucketTable {
    fn current(&self, identity: &str, window: QuotaWindow, now_ms: u64) -> QuotaBucket {
        self.live
            .get(&(identity.to_string(), window))
            .copied()
            .filter(|b| b.reset_at_ms > now_ms)
            .unwrap_or(QuotaBucket {
                count: 0,
                reset_at_ms: now_ms + window.millis(),
            })
    }

    /// Drops expired buckets, at most once per minute.
    fn sweep(&mut self, now_ms: u64) {
        if now_ms < self.next_sweep_ms {
            return;
        }
        let before = self.live.len();
        self.live.retain(|_, b| b.reset_at_ms > now_ms);
        self.next_sweep_ms = now_ms + QuotaWindow::Minute.millis();
        let dropped = before - self.live.len();
        if dropped > 0 {
            debug!("Swept {} expired quota buckets", dropped);
        }
    }
}

impl Store for MemoryStore {
    fn cached_intent(&self, key: &str) -> Option<IntentResolution> {
        self.intents.get(key)
    }

    fn cache_intent(&self, key: &str, value: IntentResolution) {
        self.intents.set(key, value);
    }

    fn last_good(&self, session_id: &str) -> Option<Spec> {
        lock(&self.last_good).get(session_id).cloned()
    }

    fn commit_last_good(&self, session_id: &str, spec: Spec) {
        debug!("Committing last-good spec for session {}", session_id);
        lock(&self.last_good).insert(session_id.to_string(), spec);
    }

    fn update_buckets(
        &self,
        identity: &str,
        now_ms: u64,
        f: &mut dyn FnMut(&mut QuotaBucket, &mut QuotaBucket),
    ) -> (QuotaBucket, QuotaBucket) {
        let mut table = lock(&self.buckets);
        table.sweep(now_ms);
        let mut minute = table.current(identity, QuotaWindow::Minute, now_ms);
        let mut day = table.current(identity, QuotaWindow::Day, now_ms);
        f(&mut minute, &mut day);
        table.live.insert((identity.to_string(), QuotaWindow::Minute), minute);
        table.live.insert((identity.to_string(), QuotaWindow::Day), day);
        (minute, day)
    }

    fn insert_experiment(&self, experiment: Experiment) {
        lock(&self.experiments).insert(experiment.id.clone(), experiment);
    }

    fn experiment(&self, id: &str) -> Option<Experiment> {
        lock(&self.experiments).get(id).cloned()
    }

    fn update_experiment(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut Experiment),
    ) -> Option<Experiment> {
        let mut experiments = lock(&self.experiments);
        let exp = experiments.get_mut(id)?;
        f(exp);
        Some(exp.clone())
    }

    fn remove_experiment(&self, id: &str) -> Option<Experiment> {
        lock(&self.experiments).remove(id)
    }

    fn put_proof(&self, card: ProofCard) {
        lock(&self.proofs).insert(card.page_id.clone(), card);
    }

    fn proof(&self, page_id: &str) -> Option<ProofCard> {
        lock(&self.proofs).get(page_id).cloned()
    }
}
