//! Auto-stop statistics: a one-sided two-proportion z-test and Wald's
//! sequential probability ratio test.

use serde::{Deserialize, Serialize};

use super::{Arm, ExperimentArm, ExperimentConfig};

/// Abramowitz-Stegun 7.1.26, max error ~1.5e-7.
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t) * (-x * x).exp();
    sign * y
}

pub fn cdf_std_norm(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZTestResult {
    pub conf: f64,
    pub p_a: f64,
    pub p_b: f64,
    /// Relative lift of B over A, in percent.
    pub lift: f64,
    pub winner: Arm,
}

pub fn z_test(a: &ExperimentArm, b: &ExperimentArm) -> ZTestResult {
    let v_a = a.views.max(1) as f64;
    let v_b = b.views.max(1) as f64;
    let c_a = a.conversions as f64;
    let c_b = b.conversions as f64;

    let p_a = c_a / v_a;
    let p_b = c_b / v_b;
    let pooled = (c_a + c_b) / (v_a + v_b);
    let se = (pooled * (1.0 - pooled) * (1.0 / v_a + 1.0 / v_b)).sqrt();
    let se = if se > 0.0 && se.is_finite() { se } else { 1e-9 };
    let z = (p_b - p_a) / se;

    let higher_is_b = p_b >= p_a;
    let conf = if higher_is_b { cdf_std_norm(z) } else { cdf_std_norm(-z) };
    let lift = if p_a > 0.0 {
        (p_b - p_a) / p_a * 100.0
    } else if p_b > 0.0 {
        100.0
    } else {
        0.0
    };

    ZTestResult {
        conf,
        p_a,
        p_b,
        lift,
        winner: if higher_is_b { Arm::B } else { Arm::A },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprtResult {
    pub decided: bool,
    pub winner: Option<Arm>,
    pub llr: f64,
    pub a_th: f64,
    pub b_th: f64,
    pub p0: f64,
    pub p1: f64,
}

/// A's rate is the baseline `p0`; B is tested against `p1 = p0 * (1 + rel_mde)`.
pub fn sprt(a: &ExperimentArm, b: &ExperimentArm, alpha: f64, power: f64, rel_mde: f64) -> SprtResult {
    let v_a = a.views.max(1) as f64;
    let p0 = (a.conversions as f64 / v_a).clamp(1e-6, 0.999);
    let p1 = (p0 * (1.0 + rel_mde)).clamp(1e-6, 0.999);

    let v_b = b.views.max(1) as f64;
    let c_b = (b.conversions as f64).min(v_b);
    let llr = c_b * (p1 / p0).ln() + (v_b - c_b) * ((1.0 - p1) / (1.0 - p0)).ln();

    let beta = (1.0 - power).max(1e-6);
    let a_th = (beta / (1.0 - alpha)).ln();
    let b_th = ((1.0 - beta) / alpha).ln();

    let winner = if llr <= a_th {
        Some(Arm::A)
    } else if llr >= b_th {
        Some(Arm::B)
    } else {
        None
    };

    SprtResult {
        decided: winner.is_some(),
        winner,
        llr,
        a_th,
        b_th,
        p0,
        p1,
    }
}

/// Both arms need `min_views`; at least one needs `min_conversions`.
pub fn gates_met(a: &ExperimentArm, b: &ExperimentArm, config: &ExperimentConfig) -> bool {
    a.views >= config.min_views
        && b.views >= config.min_views
        && (a.conversions >= config.min_conversions || b.conversions >= config.min_conversions)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub gates_met: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_test: Option<ZTestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprt: Option<SprtResult>,
    pub winner: Option<Arm>,
}

/// Runs the procedure the config selects, behind the sample gates.
pub fn evaluate(a: &ExperimentArm, b: &ExperimentArm, config: &ExperimentConfig) -> Evaluation {
    let gates = gates_met(a, b, config);
    if config.sequential {
        let result = sprt(a, b, config.alpha, config.power, config.mde);
        Evaluation {
            gates_met: gates,
            winner: if gates { result.winner } else { None },
            z_test: None,
            sprt: Some(result),
        }
    } else {
        let result = z_test(a, b);
        let confident = result.conf >= config.confidence;
        Evaluation {
            gates_met: gates,
            winner: (gates && confident).then_some(result.winner),
            z_test: Some(result),
            sprt: None,
        }
    }
}
