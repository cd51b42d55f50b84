//! Contracts Module
//!
//! Verifies and hardens candidate specs before they may become a session's
//! last-good state. [`verify_and_prepare`] is pure; [`ContractsGuard`] wires it
//! to the store and refuses to commit anything that fails.

pub mod perf;
pub mod registry;
mod spec;

pub use perf::{A11yAudit, BudgetVerdict, PerfEstimate, UxAudit};
pub use registry::{SectionId, DEFAULT_SECTIONS, PAGE_BUDGET_BYTES};
pub use spec::{merge_patch, Brand, Layout, Patch, Spec};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ComposeError;
use crate::store::Store;

pub const MAX_COPY_CHARS: usize = 300;
pub const TONES: [&str; 4] = ["minimal", "bold", "playful", "serious"];
pub const MAX_CTA_LABEL_CHARS: usize = 24;

const WEAK_DARK_LUMINANCE: f64 = 0.08;
const WEAK_LIGHT_LUMINANCE: f64 = 0.7;

lazy_static! {
    static ref EXECUTABLE_COPY: Regex =
        Regex::new(r"(?i)(<\s*script|javascript\s*:|<[^>]*\bon[a-z]+\s*=)").unwrap();
    static ref HEX_COLOR: Regex = Regex::new(r"^#?([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").unwrap();
}

/// Outcome of a contracts check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub budgets: BudgetVerdict,
    pub issues: Vec<String>,
    pub failures: Vec<String>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.budgets.ok && self.issues.is_empty() && self.failures.is_empty()
    }

    /// Flat, ordered list of everything that made the verdict fail.
    pub fn reasons(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.budgets.ok {
            out.push(format!("budget:over_by:{}", self.budgets.over_by));
        }
        out.extend(self.issues.iter().cloned());
        out.extend(self.failures.iter().cloned());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedSpec {
    pub spec: Spec,
    pub verdict: Verdict,
    pub perf: PerfEstimate,
    pub ux: UxAudit,
    pub a11y: A11yAudit,
}

/// Normalises `candidate` and checks it against section, copy, brand and
/// budget contracts. Feeding `prepared.spec` back in yields the same result.
pub fn verify_and_prepare(candidate: &Spec) -> PreparedSpec {
    let sections = registry::normalize_sections(&candidate.layout.sections);
    let allowed = registry::allowed_slots(&sections);

    let mut copy = BTreeMap::new();
    let mut failures = Vec::new();
    for slot in &allowed {
        let hardened = candidate
            .copy
            .get(*slot)
            .map(|raw| harden_copy(raw))
            .unwrap_or_default();
        let value = if hardened.is_empty() {
            registry::default_copy(slot).unwrap_or_default().to_string()
        } else {
            hardened
        };
        if EXECUTABLE_COPY.is_match(&value) {
            failures.push(format!("safety:script_in_copy:{}", slot));
        }
        copy.insert(slot.to_string(), value);
    }

    let brand = harden_brand(&candidate.brand);
    let mut issues = Vec::new();
    if brand.dark == Some(true) {
        if let Some(lum) = brand.primary.as_deref().and_then(relative_luminance) {
            if lum < 0.03 {
                issues.push("a11y:low_contrast_primary".to_string());
            }
        }
    }

    let budgets = perf::check_budget(&sections);
    let perf = perf::estimate_perf(&sections);
    let ux = perf::audit_copy(&sections, &copy);
    let a11y = audit_a11y(&brand, &copy);

    let spec = Spec {
        layout: Layout {
            sections: sections.iter().map(|s| s.as_str().to_string()).collect(),
        },
        copy,
        brand,
        intent: candidate.intent.clone(),
    };

    PreparedSpec {
        spec,
        verdict: Verdict {
            budgets,
            issues,
            failures,
        },
        perf,
        ux,
        a11y,
    }
}

/// Contrast and label checks that are below the hard-stop bar.
fn audit_a11y(brand: &Brand, copy: &BTreeMap<String, String>) -> A11yAudit {
    let mut issues = Vec::new();
    if let Some(lum) = brand.primary.as_deref().and_then(relative_luminance) {
        let weak = if brand.dark == Some(true) {
            (0.03..WEAK_DARK_LUMINANCE).contains(&lum)
        } else {
            lum > WEAK_LIGHT_LUMINANCE
        };
        if weak {
            issues.push("a11y:weak_contrast_primary".to_string());
        }
    }
    if copy
        .get("CTA_LABEL")
        .is_some_and(|l| l.chars().count() > MAX_CTA_LABEL_CHARS)
    {
        issues.push("a11y:cta_label_too_long".to_string());
    }
    A11yAudit {
        pass: issues.is_empty(),
        issues,
    }
}

fn harden_copy(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    cleaned.trim().chars().take(MAX_COPY_CHARS).collect::<String>().trim_end().to_string()
}

fn harden_brand(brand: &Brand) -> Brand {
    Brand {
        primary: brand.primary.as_deref().and_then(normalize_hex),
        dark: brand.dark,
        tone: brand
            .tone
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| TONES.contains(&t.as_str())),
    }
}

/// Lowercase `#rrggbb`, expanding the 3-digit form. `None` if not a colour.
pub fn normalize_hex(raw: &str) -> Option<String> {
    let caps = HEX_COLOR.captures(raw.trim())?;
    let digits = caps.get(1)?.as_str().to_lowercase();
    if digits.len() == 3 {
        let expanded: String = digits.chars().flat_map(|c| [c, c]).collect();
        Some(format!("#{}", expanded))
    } else {
        Some(format!("#{}", digits))
    }
}

fn relative_luminance(hex: &str) -> Option<f64> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |i: usize| -> Option<f64> {
        let v = u8::from_str_radix(&digits[i..i + 2], 16).ok()? as f64 / 255.0;
        Some(if v <= 0.03928 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        })
    };
    Some(0.2126 * channel(0)? + 0.7152 * channel(2)? + 0.0722 * channel(4)?)
}

/// Hard-stop guard around mutating operations.
#[derive(Clone)]
pub struct ContractsGuard {
    store: Arc<dyn Store>,
}

impl ContractsGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Merges `patch` over the session's last-good spec (empty if none) and
    /// verifies the result. Never touches the store.
    pub fn check(&self, session_id: &str, patch: &Patch) -> Result<PreparedSpec, ComposeError> {
        let base = self.store.last_good(session_id).unwrap_or_default();
        let candidate = merge_patch(&base, patch);
        let prepared = verify_and_prepare(&candidate);
        if prepared.verdict.passed() {
            debug!("Contracts passed for session {}", session_id);
            Ok(prepared)
        } else {
            let reasons = prepared.verdict.reasons();
            warn!("Contracts hard stop for session {}: {:?}", session_id, reasons);
            Err(ComposeError::ContractsFailed { reasons })
        }
    }

    /// `check`, then commit the prepared spec as the new last-good.
    pub fn apply(&self, session_id: &str, patch: &Patch) -> Result<PreparedSpec, ComposeError> {
        let prepared = self.check(session_id, patch)?;
        self.store
            .commit_last_good(session_id, prepared.spec.clone());
        Ok(prepared)
    }
}
