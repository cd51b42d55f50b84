//! Error taxonomy for the composition pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::safety::risk::PolicyDecision;

/// User-facing failure buckets. Every [`ComposeError`] maps onto one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SupBlock,
    ContractsFailed,
    QuotaExceeded,
    BodyTooLarge,
    AbuseDetected,
    InternalError,
    Unknown,
}

impl FailureKind {
    /// Accepts the canonical names plus hyphenated and status-code aliases.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "sup_block" | "sup-block" => FailureKind::SupBlock,
            "contracts_failed" | "contracts-failed" => FailureKind::ContractsFailed,
            "quota_exceeded" | "quota-exceeded" | "429" => FailureKind::QuotaExceeded,
            "body_too_large" | "body-too-large" | "413" => FailureKind::BodyTooLarge,
            "abuse_detected" | "abuse-detected" => FailureKind::AbuseDetected,
            "internal_error" | "500" => FailureKind::InternalError,
            _ => FailureKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::SupBlock => "sup_block",
            FailureKind::ContractsFailed => "contracts_failed",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::BodyTooLarge => "body_too_large",
            FailureKind::AbuseDetected => "abuse_detected",
            FailureKind::InternalError => "internal_error",
            FailureKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("policy gate blocked the draft: {}", .decision.reasons.join(", "))]
    SupBlock { decision: PolicyDecision },

    #[error("contracts failed: {}", .reasons.join(", "))]
    ContractsFailed { reasons: Vec<String> },

    #[error("quota exceeded, retry in {retry_after_secs}s")]
    QuotaExceeded { limit: u32, retry_after_secs: u64 },

    #[error("request body too large")]
    BodyTooLarge,

    #[error("abuse detected: {}", .reasons.join(", "))]
    AbuseDetected { reasons: Vec<String> },

    #[error("risky claims under strict proof mode")]
    ProofGateFail { decision: PolicyDecision },

    #[error("experiment {0} not found")]
    ExperimentNotFound(String),

    #[error("experiment {0} is stopped")]
    ExperimentStopped(String),

    #[error("no proof card for page {0}")]
    ProofNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ComposeError {
    /// Stable machine-readable code for the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ComposeError::SupBlock { .. } => "sup_block",
            ComposeError::ContractsFailed { .. } => "contracts_failed",
            ComposeError::QuotaExceeded { .. } => "quota_exceeded",
            ComposeError::BodyTooLarge => "body_too_large",
            ComposeError::AbuseDetected { .. } => "abuse_detected",
            ComposeError::ProofGateFail { .. } => "proof_gate_fail",
            ComposeError::ExperimentNotFound(_) => "experiment_not_found",
            ComposeError::ExperimentStopped(_) => "experiment_stopped",
            ComposeError::ProofNotFound(_) => "proof_not_found",
            ComposeError::InvalidRequest(_) => "invalid_request",
            ComposeError::Internal(_) => "internal_error",
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ComposeError::SupBlock { .. } | ComposeError::ProofGateFail { .. } => FailureKind::SupBlock,
            ComposeError::ContractsFailed { .. } => FailureKind::ContractsFailed,
            ComposeError::QuotaExceeded { .. } => FailureKind::QuotaExceeded,
            ComposeError::BodyTooLarge => FailureKind::BodyTooLarge,
            ComposeError::AbuseDetected { .. } => FailureKind::AbuseDetected,
            ComposeError::Internal(_) => FailureKind::InternalError,
            ComposeError::ExperimentNotFound(_)
            | ComposeError::ExperimentStopped(_)
            | ComposeError::ProofNotFound(_)
            | ComposeError::InvalidRequest(_) => FailureKind::Unknown,
        }
    }

    /// Refinement for the fallback code, e.g. `claims` for `sup_block.claims`.
    pub fn reason(&self) -> Option<String> {
        match self {
            ComposeError::SupBlock { decision } => decision.primary_category().map(String::from),
            ComposeError::ProofGateFail { .. } => Some("proof".to_string()),
            _ => None,
        }
    }

    /// Ordered reasons, when the failure carries any.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            ComposeError::SupBlock { decision } | ComposeError::ProofGateFail { decision } => {
                decision.reasons.clone()
            }
            ComposeError::ContractsFailed { reasons } | ComposeError::AbuseDetected { reasons } => {
                reasons.clone()
            }
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;
