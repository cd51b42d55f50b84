use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::budget::SessionBudget;
use super::provider::{label_prompt, parse_intent_labels, LLMProvider, LABEL_SYSTEM_PROMPT};
use super::{canonical_prompt, playbook, rules, IntentResolution, IntentSource};
use crate::safety::context::DrainLevel;
use crate::store::{Store, TtlCache};

const LOCAL_MODEL_CONFIDENCE: f64 = 0.75;
const CLOUD_MODEL_CONFIDENCE: f64 = 0.85;

/// Local inference rung: a primary model with an optional backup, each
/// bounded by `timeout`.
pub struct LocalModels {
    pub provider: Arc<dyn LLMProvider>,
    pub primary: String,
    pub backup: Option<String>,
    pub timeout: Duration,
}

/// Remote escalation target. Without one, the escalation rung runs the
/// broad keyword classifier instead.
pub struct CloudModel {
    pub provider: Arc<dyn LLMProvider>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub drain: DrainLevel,
    /// Skip the quick keyword guess and go straight to the wider strategies.
    pub wide: bool,
}

/// Playbook, cache, quick guess, local model, budgeted escalation, default.
/// `resolve` always produces an answer.
pub struct IntentLadder {
    store: Arc<dyn Store>,
    local: Option<LocalModels>,
    cloud: Option<CloudModel>,
    budget: SessionBudget,
    escalation_cents: f64,
    escalation_tokens: u32,
}

impl IntentLadder {
    pub fn new(store: Arc<dyn Store>, budget: SessionBudget) -> Self {
        Self {
            store,
            local: None,
            cloud: None,
            budget,
            escalation_cents: 0.02,
            escalation_tokens: 800,
        }
    }

    pub fn with_local(mut self, local: LocalModels) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_cloud(mut self, cloud: CloudModel) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_escalation_cost(mut self, cents: f64, tokens: u32) -> Self {
        self.escalation_cents = cents;
        self.escalation_tokens = tokens;
        self
    }

    pub fn budget(&self) -> &SessionBudget {
        &self.budget
    }

    pub async fn resolve(&self, prompt: &str, session_id: &str, opts: ResolveOptions) -> IntentResolution {
        let key = TtlCache::<IntentResolution>::hash_key(&canonical_prompt(prompt));

        if let Some(res) = playbook::pick_from_playbook(prompt) {
            info!("Intent resolved from playbook");
            self.store.cache_intent(&key, res.clone());
            return res;
        }

        if let Some(mut hit) = self.store.cached_intent(&key) {
            debug!("Intent cache hit ({})", &key[..12]);
            hit.source = IntentSource::Cached;
            return hit;
        }

        let res = self.resolve_uncached(prompt, session_id, opts).await;
        info!(
            "Intent resolved via {:?} (confidence {:.2})",
            res.source, res.confidence
        );
        // a default produced while drain skipped rungs must not outlive the drain
        if opts.drain == DrainLevel::Off || res.source != IntentSource::Fallback {
            self.store.cache_intent(&key, res.clone());
        }
        res
    }

    async fn resolve_uncached(&self, prompt: &str, session_id: &str, opts: ResolveOptions) -> IntentResolution {
        if !opts.wide {
            if let Some(guess) = rules::quick_guess(prompt) {
                return guess;
            }
        }

        if opts.drain != DrainLevel::Hard {
            if let Some(res) = self.try_local(prompt).await {
                return res;
            }
        }

        if opts.drain == DrainLevel::Off {
            if let Some(res) = self.escalate(prompt, session_id).await {
                return res;
            }
            debug!("Escalation budget exhausted for session {}", session_id);
        }

        rules::safe_default(prompt)
    }

    async fn try_local(&self, prompt: &str) -> Option<IntentResolution> {
        let local = self.local.as_ref()?;
        let models = std::iter::once(&local.primary).chain(local.backup.as_ref());
        for model in models {
            if let Some(intent) = ask(local.provider.as_ref(), model, prompt, local.timeout).await {
                let chips = rules::chips_for(&intent);
                return Some(IntentResolution::new(
                    intent,
                    LOCAL_MODEL_CONFIDENCE,
                    chips,
                    IntentSource::LocalModel,
                ));
            }
        }
        None
    }

    /// Budget-gated last rung. Only a remote call is charged; the broad
    /// classifier just needs budget left. `None` when the budget refuses.
    async fn escalate(&self, prompt: &str, session_id: &str) -> Option<IntentResolution> {
        let Some(cloud) = &self.cloud else {
            if self.budget.check_status(session_id).is_exhausted {
                return None;
            }
            return Some(rules::broad_classify(prompt));
        };

        if !self
            .budget
            .try_charge(session_id, self.escalation_cents, self.escalation_tokens)
        {
            return None;
        }
        if let Some(intent) = ask(cloud.provider.as_ref(), &cloud.model, prompt, cloud.timeout).await {
            let chips = rules::chips_for(&intent);
            return Some(IntentResolution::new(intent, CLOUD_MODEL_CONFIDENCE, chips, IntentSource::Cloud));
        }
        Some(rules::broad_classify(prompt))
    }
}

/// One bounded model call. Timeouts, transport errors and unparseable
/// replies all come back as `None`.
async fn ask(
    provider: &dyn LLMProvider,
    model: &str,
    prompt: &str,
    limit: Duration,
) -> Option<super::Intent> {
    let call = provider.generate(model, label_prompt(prompt), Some(LABEL_SYSTEM_PROMPT.to_string()));
    match timeout(limit, call).await {
        Ok(Ok(reply)) => {
            let parsed = parse_intent_labels(&reply);
            if parsed.is_none() {
                warn!("Model {} returned unparseable labels", model);
            }
            parsed
        }
        Ok(Err(e)) => {
            warn!("Model {} failed: {}", model, e);
            None
        }
        Err(_) => {
            warn!("Model {} timed out after {:?}", model, limit);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Reply(&'static str),
        Fail,
        Hang,
    }

    struct MockProvider {
        by_model: Vec<(&'static str, Behaviour)>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(by_model: Vec<(&'static str, Behaviour)>) -> Arc<Self> {
            Arc::new(Self {
                by_model,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        async fn generate(&self, model: &str, _prompt: String, _system: Option<String>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.by_model.iter().find(|(m, _)| *m == model).map(|(_, b)| b) {
                Some(Behaviour::Reply(text)) => Ok(text.to_string()),
                Some(Behaviour::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("{}".to_string())
                }
                Some(Behaviour::Fail) | None => Err(anyhow!("model unavailable")),
            }
        }
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new(Arc::new(ManualClock::new(0)), 60_000, 100))
    }

    fn local(provider: Arc<MockProvider>, backup: Option<&str>) -> LocalModels {
        LocalModels {
            provider,
            primary: "phi3:mini".into(),
            backup: backup.map(String::from),
            timeout: Duration::from_millis(2500),
        }
    }

    const VAGUE: &str = "a page for my thing";

    #[tokio::test]
    async fn test_playbook_short_circuits() {
        let provider = MockProvider::new(vec![]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000)).with_local(local(provider.clone(), None));
        let res = ladder
            .resolve("saas with a dark look for devs", "s", ResolveOptions::default())
            .await;
        assert_eq!(res.source, IntentSource::Playbook);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000));
        let prompt = "Minimal dark SaaS waitlist for developers";
        let first = ladder.resolve(prompt, "s", ResolveOptions::default()).await;
        assert_eq!(first.source, IntentSource::RuleGuess);

        let second = ladder
            .resolve("  minimal DARK saas   waitlist for developers", "s", ResolveOptions::default())
            .await;
        assert_eq!(second.source, IntentSource::Cached);
        assert_eq!(second.intent, first.intent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_timeout_falls_through_to_escalation() {
        let provider = MockProvider::new(vec![("phi3:mini", Behaviour::Hang)]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000)).with_local(local(provider, None));
        let res = ladder.resolve(VAGUE, "s", ResolveOptions::default()).await;
        assert_eq!(res.source, IntentSource::Classifier);
        assert!(res.confidence >= 0.4 && res.confidence <= 0.95);
        // no remote call, nothing charged
        assert_eq!(ladder.budget().check_status("s").tokens_remaining, 4000);
    }

    #[tokio::test]
    async fn test_backup_model_used_when_primary_fails() {
        let provider = MockProvider::new(vec![
            ("phi3:mini", Behaviour::Fail),
            ("qwen2:1.5b", Behaviour::Reply(r#"{"goal":"contact","color_scheme":"light"}"#)),
        ]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000))
            .with_local(local(provider.clone(), Some("qwen2:1.5b")));
        let res = ladder.resolve(VAGUE, "s", ResolveOptions::default()).await;
        assert_eq!(res.source, IntentSource::LocalModel);
        assert_eq!(res.intent.goal, "contact");
        assert!((res.confidence - 0.75).abs() < f64::EPSILON);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_yields_safe_default() {
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.0, 0));
        let res = ladder.resolve("something dark", "s", ResolveOptions::default()).await;
        assert_eq!(res.source, IntentSource::Fallback);
        assert_eq!(res.intent.color_scheme, "dark");
        assert!((res.confidence - 0.55).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cloud_model_preferred_over_classifier() {
        let cloud = MockProvider::new(vec![("gpt-4o-mini", Behaviour::Reply(r#"{"audience":"founders"}"#))]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000)).with_cloud(CloudModel {
            provider: cloud,
            model: "gpt-4o-mini".into(),
            timeout: Duration::from_secs(20),
        });
        let res = ladder.resolve(VAGUE, "s", ResolveOptions::default()).await;
        assert_eq!(res.source, IntentSource::Cloud);
        assert_eq!(res.intent.audience, "founders");
        assert_eq!(ladder.budget().check_status("s").tokens_remaining, 3200);
    }

    #[tokio::test]
    async fn test_hard_drain_skips_model_rungs() {
        let provider = MockProvider::new(vec![("phi3:mini", Behaviour::Reply(r#"{"goal":"demo"}"#))]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000)).with_local(local(provider.clone(), None));
        let opts = ResolveOptions {
            drain: DrainLevel::Hard,
            wide: false,
        };
        let res = ladder.resolve(VAGUE, "s", opts).await;
        assert_eq!(res.source, IntentSource::Fallback);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_soft_drain_keeps_local_but_skips_escalation() {
        let provider = MockProvider::new(vec![("phi3:mini", Behaviour::Fail)]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000)).with_local(local(provider.clone(), None));
        let opts = ResolveOptions {
            drain: DrainLevel::Soft,
            wide: false,
        };
        let res = ladder.resolve(VAGUE, "s", opts).await;
        assert_eq!(res.source, IntentSource::Fallback);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ladder.budget().check_status("s").tokens_remaining, 4000);
    }

    #[tokio::test]
    async fn test_wide_skips_quick_guess() {
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000));
        let opts = ResolveOptions {
            drain: DrainLevel::Off,
            wide: true,
        };
        let res = ladder
            .resolve("Minimal dark SaaS waitlist for developers", "s", opts)
            .await;
        assert_eq!(res.source, IntentSource::Classifier);
    }

    #[tokio::test]
    async fn test_drain_default_is_not_served_after_drain_lifts() {
        let provider = MockProvider::new(vec![("phi3:mini", Behaviour::Reply(r#"{"goal":"demo"}"#))]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000)).with_local(local(provider.clone(), None));
        let hard = ResolveOptions {
            drain: DrainLevel::Hard,
            wide: false,
        };
        let drained = ladder.resolve(VAGUE, "s", hard).await;
        assert_eq!(drained.source, IntentSource::Fallback);

        let res = ladder.resolve(VAGUE, "s", ResolveOptions::default()).await;
        assert_eq!(res.source, IntentSource::LocalModel);
        assert_eq!(res.intent.goal, "demo");

        let again = ladder.resolve(VAGUE, "s", ResolveOptions::default()).await;
        assert_eq!(again.source, IntentSource::Cached);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_cloud_call_still_charged_and_classified() {
        let cloud = MockProvider::new(vec![("gpt-4o-mini", Behaviour::Fail)]);
        let ladder = IntentLadder::new(store(), SessionBudget::new(0.5, 4000)).with_cloud(CloudModel {
            provider: cloud.clone(),
            model: "gpt-4o-mini".into(),
            timeout: Duration::from_secs(20),
        });
        let res = ladder.resolve(VAGUE, "s", ResolveOptions::default()).await;
        assert_eq!(res.source, IntentSource::Classifier);
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ladder.budget().check_status("s").tokens_remaining, 3200);
    }
}
