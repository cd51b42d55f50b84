//! Service configuration, read from the environment (after `.env`).

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::safety::{ContextDefaults, QuotaConfig};

const DEV_SECRET: &str = "dev-only-not-for-production";

#[derive(Debug, Clone)]
pub struct ComposeConfig {
    pub bind_addr: String,
    pub max_body_bytes: usize,
    pub quota: QuotaConfig,
    pub cache_ttl_ms: u64,
    pub cache_max_entries: usize,

    pub ollama_url: String,
    pub local_model: String,
    pub local_backup_model: Option<String>,
    pub local_timeout: Duration,
    pub cloud_url: Option<String>,
    pub cloud_api_key: Option<String>,
    pub cloud_model: String,
    pub cloud_timeout: Duration,

    pub session_max_cents: f64,
    pub session_max_tokens: u32,
    pub escalation_cents: f64,
    pub escalation_tokens: u32,

    pub policy_version: String,
    pub policy_secret: String,
    pub max_cls: f64,
    pub max_lcp_ms: u32,
    pub require_a11y: bool,
    pub block_pii: bool,

    pub context: ContextDefaults,
    pub ab_poll: Duration,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_body_bytes: 256 * 1024,
            quota: QuotaConfig::default(),
            cache_ttl_ms: 600_000,
            cache_max_entries: 2_000,
            ollama_url: "http://localhost:11434".to_string(),
            local_model: "phi3:mini".to_string(),
            local_backup_model: None,
            local_timeout: Duration::from_millis(2_500),
            cloud_url: None,
            cloud_api_key: None,
            cloud_model: "gpt-4o-mini".to_string(),
            cloud_timeout: Duration::from_millis(20_000),
            session_max_cents: 0.5,
            session_max_tokens: 4_000,
            escalation_cents: 0.02,
            escalation_tokens: 800,
            policy_version: "2.0.0".to_string(),
            policy_secret: DEV_SECRET.to_string(),
            max_cls: 0.25,
            max_lcp_ms: 4_000,
            require_a11y: false,
            block_pii: true,
            context: ContextDefaults::default(),
            ab_poll: Duration::from_millis(5_000),
        }
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match var(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            default
        }),
    }
}

fn flag_or(key: &str, default: bool) -> bool {
    match var(key).map(|v| v.to_lowercase()) {
        None => default,
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            warn!("Ignoring unparseable {}={:?}", key, v);
            default
        }
    }
}

impl ComposeConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let quota = QuotaConfig {
            enabled: flag_or("QUOTA_ENABLED", d.quota.enabled),
            per_min: parse_or("QUOTA_PER_MIN", d.quota.per_min).max(1),
            per_day: parse_or("QUOTA_PER_DAY", d.quota.per_day).max(1),
            backoff_frac: parse_or("QUOTA_BACKOFF_FRAC", d.quota.backoff_frac).min(0.99),
            backoff: Duration::from_millis(parse_or("QUOTA_BACKOFF_MS", 200u64)),
            plan_header: var("QUOTA_PLAN_HEADER").unwrap_or(d.quota.plan_header),
            free_plans: var("QUOTA_FREE_PLANS")
                .map(|v| {
                    v.split(',')
                        .map(|p| p.trim().to_lowercase())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or(d.quota.free_plans),
        };

        let policy_secret = var("POLICY_HMAC_SECRET").unwrap_or_else(|| {
            warn!("POLICY_HMAC_SECRET not set, signing proofs with the development secret");
            d.policy_secret.clone()
        });

        Self {
            bind_addr: var("BIND_ADDR").unwrap_or(d.bind_addr),
            max_body_bytes: parse_or("MAX_BODY_BYTES", d.max_body_bytes),
            quota,
            cache_ttl_ms: parse_or("CACHE_TTL_MS", d.cache_ttl_ms),
            cache_max_entries: parse_or("CACHE_MAX_ENTRIES", d.cache_max_entries).max(1),
            ollama_url: var("OLLAMA_URL").unwrap_or(d.ollama_url),
            local_model: var("LOCAL_LLM").unwrap_or(d.local_model),
            local_backup_model: var("LOCAL_LLM_BACKUP"),
            local_timeout: Duration::from_millis(parse_or("LOCAL_TIMEOUT_MS", 2_500u64)),
            cloud_url: var("CLOUD_URL"),
            cloud_api_key: var("CLOUD_API_KEY"),
            cloud_model: var("CLOUD_MODEL").unwrap_or(d.cloud_model),
            cloud_timeout: Duration::from_millis(parse_or("CLOUD_TIMEOUT_MS", 20_000u64)),
            session_max_cents: parse_or("SESSION_MAX_CENTS", d.session_max_cents),
            session_max_tokens: parse_or("SESSION_MAX_TOKENS", d.session_max_tokens),
            escalation_cents: parse_or("CLOUD_EST_CENTS", d.escalation_cents),
            escalation_tokens: parse_or("CLOUD_EST_TOKENS", d.escalation_tokens),
            policy_version: var("SUP_POLICY_VERSION").unwrap_or(d.policy_version),
            policy_secret,
            max_cls: parse_or("SUP_MAX_CLS", d.max_cls),
            max_lcp_ms: parse_or("SUP_MAX_LCP_MS", d.max_lcp_ms),
            require_a11y: flag_or("SUP_REQUIRE_A11Y", d.require_a11y),
            block_pii: flag_or("SUP_BLOCK_PII_STRICT", d.block_pii),
            context: ContextDefaults::from_env(),
            ab_poll: Duration::from_millis(parse_or("AB_POLL_MS", 5_000u64)),
        }
    }
}
