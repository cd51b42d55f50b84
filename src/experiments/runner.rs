use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::Arm;
use crate::store::{lock, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    StillRunning,
    Concluded(Arm),
    /// Already stopped or removed; the poller should exit.
    Finished,
}

/// One auto-stop poller per running experiment. Each poller owns its
/// interval and is aborted when the experiment is torn down.
#[derive(Clone)]
pub struct ExperimentRunner {
    store: Arc<dyn Store>,
    interval: Duration,
    tasks: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl ExperimentRunner {
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(Duration::from_millis(10)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Evaluates `id` once and stops it if a winner is declared.
    pub fn tick_once(&self, id: &str) -> TickOutcome {
        let mut outcome = TickOutcome::Finished;
        self.store.update_experiment(id, &mut |exp| {
            if !exp.is_running() {
                return;
            }
            outcome = match exp.evaluate().winner {
                Some(winner) => {
                    exp.conclude(winner);
                    TickOutcome::Concluded(winner)
                }
                None => TickOutcome::StillRunning,
            };
        });
        if let TickOutcome::Concluded(winner) = outcome {
            info!("Experiment {} auto-stopped, winner {:?}", id, winner);
        }
        outcome
    }

    /// Starts polling `id`. A poller already running for it is replaced.
    pub fn start(&self, id: &str) {
        let runner = self.clone();
        let exp_id = id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(runner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match runner.tick_once(&exp_id) {
                    TickOutcome::StillRunning => continue,
                    TickOutcome::Concluded(_) | TickOutcome::Finished => break,
                }
            }
            lock(&runner.tasks).remove(&exp_id);
            debug!("Auto-stop poller for {} exited", exp_id);
        });

        if let Some(previous) = lock(&self.tasks).insert(id.to_string(), handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Aborts the poller for `id`. Returns whether one was running.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.tasks).remove(id) {
            Some(handle) => {
                handle.abort();
                debug!("Cancelled auto-stop poller for {}", id);
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, id: &str) -> bool {
        lock(&self.tasks).contains_key(id)
    }

    pub fn active(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn shutdown(&self) {
        for (_, handle) in lock(&self.tasks).drain() {
            handle.abort();
        }
    }
}
