//! Curve models fitted to occupancy histograms and ROI profiles.
use super::lm::CurveModel;
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;

fn gaussian_terms(x: f64, center: f64, sigma: f64) -> (f64, f64) {
    let z = (x - center) / sigma;
    ((-0.5 * z * z).exp(), z)
}

/// `A·exp(−(x−μ)²/2σ²)`, parameters `[A, μ, σ]`.
pub struct Gaussian;

impl CurveModel<3> for Gaussian {
    fn evaluate(&self, x: f64, p: &[f64; 3]) -> f64 {
        p[0] * gaussian_terms(x, p[1], p[2]).0
    }

    fn jacobian_row(&self, x: f64, p: &[f64; 3]) -> [f64; 3] {
        let (e, z) = gaussian_terms(x, p[1], p[2]);
        [e, p[0] * e * z / p[2], p[0] * e * z * z / p[2]]
    }

    fn constrain(&self, p: &mut [f64; 3]) {
        p[2] = p[2].abs().max(f64::EPSILON);
    }
}

/// Gaussian on a constant offset, parameters `[A, μ, σ, y0]`.
pub struct OffsetGaussian;

impl CurveModel<4> for OffsetGaussian {
    fn evaluate(&self, x: f64, p: &[f64; 4]) -> f64 {
        p[0] * gaussian_terms(x, p[1], p[2]).0 + p[3]
    }

    fn jacobian_row(&self, x: f64, p: &[f64; 4]) -> [f64; 4] {
        let (e, z) = gaussian_terms(x, p[1], p[2]);
        [e, p[0] * e * z / p[2], p[0] * e * z * z / p[2], 1.0]
    }

    fn constrain(&self, p: &mut [f64; 4]) {
        p[2] = p[2].abs().max(f64::EPSILON);
    }
}

/// Two Gaussians sharing a total amplitude, parameters
/// `[N, f, μ0, σ0, μ1, σ1]`: `N(1−f)·g(μ0, σ0) + N·f·g(μ1, σ1)`.
///
/// With `split = Some(t)` the first centre is held in `[0, t]` and the second
/// at or above `t`.
pub struct DoubleGaussian {
    pub split: Option<f64>,
}

impl CurveModel<6> for DoubleGaussian {
    fn evaluate(&self, x: f64, p: &[f64; 6]) -> f64 {
        let (e0, _) = gaussian_terms(x, p[2], p[3]);
        let (e1, _) = gaussian_terms(x, p[4], p[5]);
        p[0] * ((1.0 - p[1]) * e0 + p[1] * e1)
    }

    fn jacobian_row(&self, x: f64, p: &[f64; 6]) -> [f64; 6] {
        let (n, f) = (p[0], p[1]);
        let (e0, z0) = gaussian_terms(x, p[2], p[3]);
        let (e1, z1) = gaussian_terms(x, p[4], p[5]);
        let a0 = n * (1.0 - f);
        let a1 = n * f;
        [
            (1.0 - f) * e0 + f * e1,
            n * (e1 - e0),
            a0 * e0 * z0 / p[3],
            a0 * e0 * z0 * z0 / p[3],
            a1 * e1 * z1 / p[5],
            a1 * e1 * z1 * z1 / p[5],
        ]
    }

    fn constrain(&self, p: &mut [f64; 6]) {
        p[0] = p[0].max(0.0);
        p[1] = p[1].clamp(0.0, 1.0);
        p[3] = p[3].abs().max(f64::EPSILON);
        p[5] = p[5].abs().max(f64::EPSILON);
        if let Some(t) = self.split {
            p[2] = p[2].clamp(0.0, t.max(0.0));
            p[4] = p[4].max(t);
        }
    }
}

/// `A·μˣe^{−μ}/Γ(x+1)`, evaluated in log space; falls back to the normal
/// approximation where the log form is not finite.
fn poisson(x: f64, mean: f64) -> f64 {
    if mean > 0.0 && x >= 0.0 {
        let v = (x * mean.ln() - mean - ln_gamma(x + 1.0)).exp();
        if v.is_finite() {
            return v;
        }
    }
    let var = mean.abs().max(f64::EPSILON);
    (-(x - mean).powi(2) / (2.0 * var)).exp() / (2.0 * PI * var).sqrt()
}

/// Sum of two scaled Poisson distributions, parameters `[A0, μ0, A1, μ1]`.
pub struct DoublePoisson;

impl CurveModel<4> for DoublePoisson {
    fn evaluate(&self, x: f64, p: &[f64; 4]) -> f64 {
        p[0] * poisson(x, p[1]) + p[2] * poisson(x, p[3])
    }

    fn jacobian_row(&self, x: f64, p: &[f64; 4]) -> [f64; 4] {
        let q0 = poisson(x, p[1]);
        let q1 = poisson(x, p[3]);
        [
            q0,
            p[0] * q0 * (x / p[1] - 1.0),
            q1,
            p[2] * q1 * (x / p[3] - 1.0),
        ]
    }

    fn constrain(&self, p: &mut [f64; 4]) {
        p[1] = p[1].max(f64::EPSILON);
        p[3] = p[3].max(f64::EPSILON);
    }
}
