//! Execution context resolution.
//!
//! Drain level, execution tier and proof strictness each come from a request
//! header first, then the environment default, then a built-in default.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainLevel {
    #[default]
    Off,
    Soft,
    Hard,
}

impl DrainLevel {
    /// `1`, `true` and `on` are shortcuts for `hard`; anything unknown is `off`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "soft" => DrainLevel::Soft,
            "hard" | "1" | "true" | "on" => DrainLevel::Hard,
            _ => DrainLevel::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecTier {
    #[serde(rename = "safe-html")]
    SafeHtml,
    #[serde(rename = "light-js")]
    LightJs,
    #[default]
    #[serde(rename = "full")]
    Full,
}

impl ExecTier {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "safe-html" | "safe" | "html" => ExecTier::SafeHtml,
            "light-js" | "light" | "lite" => ExecTier::LightJs,
            _ => ExecTier::Full,
        }
    }

    pub fn allows_script(self) -> bool {
        !matches!(self, ExecTier::SafeHtml)
    }
}

/// Environment-sourced defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextDefaults {
    pub drain: Option<String>,
    pub exec_tier: Option<String>,
    pub proof_strict: Option<String>,
}

impl ContextDefaults {
    pub fn from_env() -> Self {
        Self {
            drain: std::env::var("DRAIN_MODE").ok(),
            exec_tier: std::env::var("EXEC_TIER_DEFAULT").ok(),
            proof_strict: std::env::var("PROOF_STRICT").ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecContext {
    pub drain: DrainLevel,
    pub tier: ExecTier,
    pub proof_strict: bool,
    pub no_js: bool,
}

fn strict_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "strict")
}

pub fn resolve_context(headers: &HeaderMap, defaults: &ContextDefaults) -> ExecContext {
    let pick = |header: &str, env: &Option<String>| -> Option<String> {
        headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map(String::from)
            .or_else(|| env.clone().filter(|v| !v.trim().is_empty()))
    };

    let drain = pick("x-drain-mode", &defaults.drain)
        .map(|v| DrainLevel::parse(&v))
        .unwrap_or_default();
    let tier = pick("x-exec-tier", &defaults.exec_tier)
        .map(|v| ExecTier::parse(&v))
        .unwrap_or_default();
    let proof_strict = pick("x-proof-strict", &defaults.proof_strict)
        .map(|v| strict_flag(&v))
        .unwrap_or(false);

    ExecContext {
        drain,
        tier,
        proof_strict,
        no_js: drain == DrainLevel::Hard || !tier.allows_script(),
    }
}
