//! Performance & UX Estimates
//!
//! Deterministic, render-free estimates used by the contracts verifier and
//! the risk gate. Numbers are heuristics derived from section byte budgets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::registry::{SectionId, PAGE_BUDGET_BYTES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetVerdict {
    pub ok: bool,
    pub bytes: u32,
    pub over_by: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfEstimate {
    pub bytes: u32,
    pub lcp_est_ms: u32,
    pub cls_est: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UxAudit {
    /// 0..=100
    pub score: u32,
    pub issues: Vec<String>,
}

/// Soft accessibility findings. They never fail contracts; the risk gate
/// reads `pass` when a11y is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A11yAudit {
    pub pass: bool,
    pub issues: Vec<String>,
}

pub fn estimate_bytes(sections: &[SectionId]) -> u32 {
    sections.iter().map(|s| s.budget_bytes()).sum()
}

pub fn check_budget(sections: &[SectionId]) -> BudgetVerdict {
    let bytes = estimate_bytes(sections);
    BudgetVerdict {
        ok: bytes <= PAGE_BUDGET_BYTES,
        bytes,
        over_by: bytes.saturating_sub(PAGE_BUDGET_BYTES),
    }
}

pub fn estimate_perf(sections: &[SectionId]) -> PerfEstimate {
    let bytes = estimate_bytes(sections);
    // 600ms baseline plus ~30ms per KB shipped
    let lcp_est_ms = 600 + (bytes as u64 * 30 / 1_000) as u32;
    let cls: f64 = sections.iter().map(|s| s.shift_estimate()).sum();
    PerfEstimate {
        bytes,
        lcp_est_ms,
        cls_est: (cls * 1000.0).round() / 1000.0,
    }
}

pub fn audit_copy(sections: &[SectionId], copy: &BTreeMap<String, String>) -> UxAudit {
    let mut issues = Vec::new();
    let mut score: i32 = 100;

    let len = |k: &str| copy.get(k).map(|v| v.chars().count()).unwrap_or(0);

    if len("HERO_TITLE") > 70 {
        issues.push("headline_too_long".to_string());
        score -= 15;
    }
    if len("HERO_SUB") > 160 {
        issues.push("subhead_too_long".to_string());
        score -= 10;
    }
    if len("CTA_LABEL") > 24 {
        issues.push("cta_label_too_long".to_string());
        score -= 15;
    }
    if !sections
        .iter()
        .any(|s| matches!(s, SectionId::CtaSimple | SectionId::HeroBasic))
    {
        issues.push("no_primary_cta".to_string());
        score -= 25;
    }
    if sections.len() > 4 {
        issues.push("dense_layout".to_string());
        score -= 10;
    }

    UxAudit {
        score: score.clamp(0, 100) as u32,
        issues,
    }
}
