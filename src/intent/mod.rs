//! Intent Module
//!
//! Turns a free-text brief into a structured [`Intent`] through an ordered
//! ladder of strategies, cheapest first. Every strategy yields the same
//! [`IntentResolution`] shape, tagged with the [`IntentSource`] that produced it.

pub mod budget;
mod ladder;
pub mod playbook;
pub mod provider;
pub mod rules;

pub use budget::{BudgetStatus, SessionBudget};
pub use ladder::{CloudModel, IntentLadder, LocalModels, ResolveOptions};
pub use provider::{LLMProvider, OllamaProvider, OpenAICompatibleProvider};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::contracts::{registry, Brand, Layout, Spec};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub vibe: String,
    #[serde(default)]
    pub color_scheme: String,
    #[serde(default)]
    pub density: String,
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

impl Intent {
    /// Number of non-section fields carrying a value (out of 7).
    pub fn filled_fields(&self) -> usize {
        [
            &self.audience,
            &self.goal,
            &self.industry,
            &self.vibe,
            &self.color_scheme,
            &self.density,
            &self.complexity,
        ]
        .iter()
        .filter(|v| !v.is_empty())
        .count()
    }

    pub fn is_dark(&self) -> bool {
        self.color_scheme == "dark"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Playbook,
    Cached,
    RuleGuess,
    LocalModel,
    Cloud,
    /// Broad keyword classifier standing in for the cloud rung.
    Classifier,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResolution {
    pub intent: Intent,
    pub confidence: f64,
    pub chips: Vec<String>,
    pub source: IntentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<BTreeMap<String, String>>,
}

impl IntentResolution {
    pub fn new(intent: Intent, confidence: f64, chips: Vec<String>, source: IntentSource) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            chips,
            source,
            brand_color: None,
            copy: None,
        }
    }

    /// Candidate spec for this resolution: intent sections with default copy,
    /// overlaid with any copy the strategy supplied.
    pub fn to_spec(&self) -> Spec {
        let sections = registry::normalize_sections(&self.intent.sections);
        let mut copy = registry::defaults_for_sections(&sections);
        if let Some(extra) = &self.copy {
            copy.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let tone = match self.intent.vibe.as_str() {
            "" => None,
            v => Some(v.to_string()),
        };
        Spec {
            layout: Layout {
                sections: sections.iter().map(|s| s.as_str().to_string()).collect(),
            },
            copy,
            brand: Brand {
                primary: self.brand_color.clone(),
                dark: Some(self.intent.is_dark()),
                tone,
            },
            intent: Some(self.intent.clone()),
        }
    }
}

/// Trimmed, whitespace-collapsed, lowercased prompt. Cache keys hash this.
pub fn canonical_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
