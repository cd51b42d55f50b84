//! Experiments Module
//!
//! Two-arm page experiments. Counters only grow while an experiment is
//! running; once stopped nothing on it changes again.

mod runner;
pub mod stats;

pub use runner::{ExperimentRunner, TickOutcome};
pub use stats::{evaluate, sprt, z_test, Evaluation, SprtResult, ZTestResult};

use serde::{Deserialize, Serialize};

use crate::contracts::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arm {
    A,
    B,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentArm {
    pub views: u64,
    pub conversions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentConfig {
    pub confidence: f64,
    pub min_views: u64,
    pub min_conversions: u64,
    pub sequential: bool,
    pub power: f64,
    pub alpha: f64,
    /// Relative minimum detectable effect for the sequential test.
    pub mde: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            min_views: 100,
            min_conversions: 5,
            sequential: false,
            power: 0.8,
            alpha: 0.05,
            mde: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentState {
    Running,
    Stopped,
}

/// What a variant ships: the patch plus where it can be previewed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default)]
    pub patch: Patch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewTarget {
    pub arm: Arm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "A")]
    pub a: ExperimentArm,
    #[serde(rename = "B")]
    pub b: ExperimentArm,
    pub variant_a: Variant,
    pub variant_b: Variant,
    pub config: ExperimentConfig,
    pub state: ExperimentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Arm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewTarget>,
    pub created_at: String,
}

impl Experiment {
    pub fn new(session_id: &str, variant_a: Variant, variant_b: Variant, config: ExperimentConfig) -> Self {
        Self {
            id: format!("exp_{}", uuid::Uuid::new_v4().simple()),
            session_id: session_id.to_string(),
            a: ExperimentArm::default(),
            b: ExperimentArm::default(),
            variant_a,
            variant_b,
            config,
            state: ExperimentState::Running,
            winner: None,
            preview: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ExperimentState::Running
    }

    pub fn variant(&self, arm: Arm) -> &Variant {
        match arm {
            Arm::A => &self.variant_a,
            Arm::B => &self.variant_b,
        }
    }

    /// Adds views/conversions to `arm`. No-op once stopped.
    pub fn record(&mut self, arm: Arm, views: u64, conversions: u64) -> bool {
        if !self.is_running() {
            return false;
        }
        let counters = match arm {
            Arm::A => &mut self.a,
            Arm::B => &mut self.b,
        };
        counters.views = counters.views.saturating_add(views);
        counters.conversions = counters.conversions.saturating_add(conversions);
        true
    }

    /// Stops the experiment with `winner`, pointing the preview at it.
    pub fn conclude(&mut self, winner: Arm) {
        let variant = self.variant(winner).clone();
        self.state = ExperimentState::Stopped;
        self.winner = Some(winner);
        self.preview = Some(PreviewTarget {
            arm: winner,
            page_id: variant.page_id,
            url: variant.url,
        });
    }

    pub fn evaluate(&self) -> Evaluation {
        stats::evaluate(&self.a, &self.b, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment() -> Experiment {
        let b = Variant {
            page_id: Some("pg_b".into()),
            url: Some("/preview/pg_b".into()),
            ..Default::default()
        };
        Experiment::new("s1", Variant::default(), b, ExperimentConfig::default())
    }

    #[test]
    fn test_record_stops_after_conclusion() {
        let mut e = experiment();
        assert!(e.record(Arm::A, 10, 1));
        assert_eq!(e.a, ExperimentArm { views: 10, conversions: 1 });

        e.conclude(Arm::B);
        assert!(!e.record(Arm::A, 10, 1));
        assert_eq!(e.a.views, 10);
        assert_eq!(e.preview.as_ref().and_then(|p| p.page_id.as_deref()), Some("pg_b"));
    }

    #[test]
    fn test_config_defaults_fill_partial_json() {
        let cfg: ExperimentConfig = serde_json::from_str(r#"{"sequential":true,"minViews":50}"#).unwrap();
        assert!(cfg.sequential);
        assert_eq!(cfg.min_views, 50);
        assert_eq!(cfg.min_conversions, 5);
        assert!((cfg.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serializes_arms_as_a_b() {
        let v = serde_json::to_value(experiment()).unwrap();
        assert_eq!(v["A"]["views"], 0);
        assert_eq!(v["state"], "running");
        assert!(v["id"].as_str().unwrap().starts_with("exp_"));
    }
}
