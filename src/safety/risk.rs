//! Risk & Policy Gate
//!
//! [`compute_risk_vector`] scores a prompt, its copy and the page's perf/UX
//! estimates. [`RiskPolicy::decide`] turns that vector into an
//! allow/strict/block decision with ordered reasons. Both are pure.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

lazy_static! {
    static ref SUPERLATIVE: Regex = Regex::new(
        r"(?i)(?:^|[^a-z0-9])(#[ ]?1|no\.?\s*1|no\s*1|no1|number\s*one|top|best|leading|largest)(?:[^a-z0-9]|$)"
    )
    .unwrap();
    static ref PERCENT_SYMBOL: Regex =
        Regex::new(r"(?:^|[^\d])\d{1,3}(?:,\d{3})*(?:\.\d+)?\s?%(?:\D|$)").unwrap();
    static ref PERCENT_WORD: Regex =
        Regex::new(r"(?i)\b\d{1,3}(?:,\d{3})*(?:\.\d+)?\s?percent\b").unwrap();
    static ref MULTIPLIER: Regex = Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*x(?:\W|$)").unwrap();
    static ref COMPARATIVE: Regex =
        Regex::new(r"(?i)\b(better|faster|cheaper|lighter|stronger|smarter)\b").unwrap();
    static ref FACTUAL: Regex =
        Regex::new(r"(?i)\b(according to|study|report|data|benchmark|research)\b").unwrap();
    static ref TESTIMONIAL: Regex =
        Regex::new(r"(?i)\b(customer|client|user)s?\b.*\b(said|says|review|testimonial)\b").unwrap();
    static ref EMAIL: Regex = Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap();
    static ref PHONE: Regex = Regex::new(
        r"\b(?:\+?\d{1,3}[-.\s]?)?(?:\(?\d{2,4}\)?[-.\s]?)?\d{3,4}[-.\s]?\d{4}\b"
    )
    .unwrap();
    static ref CARD: Regex = Regex::new(
        r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6(?:011|5\d{2}))[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b"
    )
    .unwrap();
    static ref SCAM_LANG: Regex =
        Regex::new(r"(?i)(free\s*money|guaranteed\s*profit|pump\s*and\s*dump)").unwrap();
    static ref SKETCHY_PROMPT: Regex =
        Regex::new(r"(?i)(deepfake|impersonate|bypass|jailbreak)").unwrap();
}

/// Slots whose copy makes product claims.
const CLAIM_SLOTS: [&str; 9] = [
    "HERO_TITLE", "HERO_SUB", "CTA_HEAD", "F1_TITLE", "F1_BODY", "F2_TITLE", "F2_BODY", "F3_TITLE",
    "F3_BODY",
];

/// True when `text` carries a superlative, a percentage or a multiplier.
pub fn has_risky_claims(text: &str) -> bool {
    SUPERLATIVE.is_match(text)
        || PERCENT_SYMBOL.is_match(text)
        || PERCENT_WORD.is_match(text)
        || MULTIPLIER.is_match(text)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyClaims {
    pub superlative: u32,
    pub percent: u32,
    pub multiplier: u32,
    pub comparative: u32,
    pub factual: u32,
    pub testimonial: u32,
    pub missing_proof: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePerf {
    pub cls_est: Option<f64>,
    pub lcp_est_ms: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct A11ySignal {
    pub pass: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PiiSignal {
    pub present: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbuseSignals {
    pub sketchy: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskVector {
    pub prompt_risk: bool,
    pub copy_claims: CopyClaims,
    pub device_perf: DevicePerf,
    pub ux_score: Option<u32>,
    pub a11y: A11ySignal,
    pub pii: PiiSignal,
    pub abuse_signals: AbuseSignals,
}

impl RiskVector {
    pub fn has_claims(&self) -> bool {
        let c = &self.copy_claims;
        self.prompt_risk || c.superlative > 0 || c.percent > 0 || c.multiplier > 0
    }
}

pub struct RiskInputs<'a> {
    pub prompt: &'a str,
    pub copy: &'a BTreeMap<String, String>,
    pub cls_est: Option<f64>,
    pub lcp_est_ms: Option<u32>,
    pub ux_score: Option<u32>,
    pub a11y_pass: Option<bool>,
}

pub fn compute_risk_vector(inputs: &RiskInputs<'_>) -> RiskVector {
    let mut claims = CopyClaims::default();

    for (slot, value) in inputs.copy {
        let mut slot_has_claim = false;
        for line in value.split(['\n', '\r']).filter(|l| !l.is_empty()) {
            let hits = [
                (SUPERLATIVE.is_match(line), &mut claims.superlative),
                (
                    PERCENT_SYMBOL.is_match(line) || PERCENT_WORD.is_match(line),
                    &mut claims.percent,
                ),
                (MULTIPLIER.is_match(line), &mut claims.multiplier),
                (COMPARATIVE.is_match(line), &mut claims.comparative),
            ];
            for (hit, counter) in hits {
                if hit {
                    *counter += 1;
                    slot_has_claim = true;
                }
            }
        }
        if FACTUAL.is_match(value) {
            claims.factual += 1;
        }
        if TESTIMONIAL.is_match(value) {
            claims.testimonial += 1;
        }
        if slot_has_claim && CLAIM_SLOTS.contains(&slot.as_str()) {
            claims.missing_proof += 1;
        }
    }

    let all_text = std::iter::once(inputs.prompt)
        .chain(inputs.copy.values().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    let mut abuse = Vec::new();
    if SCAM_LANG.is_match(&all_text) {
        abuse.push("scam_lang".to_string());
    }
    if SKETCHY_PROMPT.is_match(&all_text) {
        abuse.push("sketchy_prompt".to_string());
    }

    RiskVector {
        prompt_risk: has_risky_claims(inputs.prompt),
        copy_claims: claims,
        device_perf: DevicePerf {
            cls_est: inputs.cls_est,
            lcp_est_ms: inputs.lcp_est_ms,
        },
        ux_score: inputs.ux_score,
        a11y: A11ySignal {
            pass: inputs.a11y_pass,
        },
        pii: PiiSignal {
            present: EMAIL.is_match(&all_text) || PHONE.is_match(&all_text) || CARD.is_match(&all_text),
        },
        abuse_signals: AbuseSignals {
            sketchy: !abuse.is_empty(),
            reasons: abuse,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    Off,
    On,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    Allow,
    Strict,
    Block,
}

impl DecisionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionMode::Allow => "allow",
            DecisionMode::Strict => "strict",
            DecisionMode::Block => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub mode: DecisionMode,
    pub reasons: Vec<String>,
    pub policy_version: String,
}

impl PolicyDecision {
    /// Category of the first reason (`claims`, `abuse`, ...), used to refine
    /// failure codes.
    pub fn primary_category(&self) -> Option<&str> {
        self.reasons.first().map(|r| r.split(':').next().unwrap_or(r))
    }
}

#[derive(Debug, Clone)]
pub struct RiskPolicy {
    pub version: String,
    pub max_cls: f64,
    pub max_lcp_ms: u32,
    pub require_a11y: bool,
    pub block_pii: bool,
    pub gates: HashMap<String, GateMode>,
    pub default_gate: GateMode,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            version: "2.0.0".to_string(),
            max_cls: 0.25,
            max_lcp_ms: 4000,
            require_a11y: false,
            block_pii: true,
            gates: HashMap::new(),
            default_gate: GateMode::On,
        }
    }
}

impl RiskPolicy {
    pub fn with_gate(mut self, route: &str, gate: GateMode) -> Self {
        self.gates.insert(route.to_string(), gate);
        self
    }

    pub fn gate_for(&self, route: &str) -> GateMode {
        self.gates.get(route).copied().unwrap_or(self.default_gate)
    }

    /// Ordered reasons: perf, claims, a11y, prompt, pii, abuse.
    fn reasons(&self, risk: &RiskVector) -> Vec<String> {
        let mut reasons = Vec::new();

        if risk.device_perf.cls_est.is_some_and(|c| c > self.max_cls) {
            reasons.push("perf:high_cls".to_string());
        }
        if risk.device_perf.lcp_est_ms.is_some_and(|l| l > self.max_lcp_ms) {
            reasons.push("perf:slow_lcp".to_string());
        }

        let c = &risk.copy_claims;
        if c.missing_proof > 0 {
            for (count, kind) in [
                (c.superlative, "superlative"),
                (c.percent, "percent"),
                (c.multiplier, "multiplier"),
                (c.comparative, "comparative"),
            ] {
                if count > 0 {
                    reasons.push(format!("claims:{}", kind));
                }
            }
        }

        if self.require_a11y && risk.a11y.pass == Some(false) {
            reasons.push("a11y:fail".to_string());
        }
        if risk.prompt_risk {
            reasons.push("prompt:risky".to_string());
        }
        if self.block_pii && risk.pii.present {
            reasons.push("pii:present".to_string());
        }
        for r in &risk.abuse_signals.reasons {
            reasons.push(format!("abuse:{}", r));
        }
        reasons
    }

    pub fn decide(&self, route: &str, risk: &RiskVector) -> PolicyDecision {
        let decision = |mode, reasons| PolicyDecision {
            mode,
            reasons,
            policy_version: self.version.clone(),
        };

        let gate = self.gate_for(route);
        if gate == GateMode::Off {
            return decision(DecisionMode::Allow, vec!["gate_off".to_string()]);
        }

        let reasons = self.reasons(risk);
        let has = |prefix: &str| reasons.iter().any(|r| r.starts_with(prefix));

        let mode = match gate {
            GateMode::Strict if reasons.is_empty() => DecisionMode::Strict,
            GateMode::Strict => DecisionMode::Block,
            _ if has("abuse:") || has("pii:") => DecisionMode::Block,
            _ if has("claims:") || has("prompt:") || has("perf:") || has("a11y:") => {
                DecisionMode::Strict
            }
            _ => DecisionMode::Allow,
        };
        decision(mode, reasons)
    }
}
