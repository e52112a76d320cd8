//! Jeffreys-prior binomial confidence intervals.
//!
//! The interval is the central 1σ-equivalent (≈68.27 %) credible region of
//! `Beta(k + ½, n − k + ½)`. The lower bound is pinned to 0 when `k = 0` and
//! the upper bound to 1 when `k = n`, so the point estimate `k / n` always
//! lies inside the reported bounds.
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

/// Probability mass inside ±1σ of a normal distribution.
pub const ONE_SIGMA: f64 = 0.682_689_492_137_085_9;

/// A proportion with asymmetric Jeffreys error bars.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinomialInterval {
    pub successes: usize,
    pub total: usize,
    /// Point estimate `successes / total` (0.5 when `total == 0`).
    pub probability: f64,
    /// Mean of the upper and lower errors.
    pub error: f64,
    pub upper_error: f64,
    pub lower_error: f64,
}

impl BinomialInterval {
    /// Sentinel returned for an empty population: maximally uncertain.
    pub fn zero_population() -> Self {
        Self {
            successes: 0,
            total: 0,
            probability: 0.5,
            error: 0.5,
            upper_error: 0.5,
            lower_error: 0.5,
        }
    }

    pub fn lower_bound(&self) -> f64 {
        self.probability - self.lower_error
    }

    pub fn upper_bound(&self) -> f64 {
        self.probability + self.upper_error
    }

    /// `(p, err, upper_err, lower_err)` in the order used by the record columns.
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (
            self.probability,
            self.error,
            self.upper_error,
            self.lower_error,
        )
    }
}

/// Jeffreys interval for `successes` out of `total` trials.
pub fn interval(successes: usize, total: usize) -> BinomialInterval {
    if total == 0 {
        return BinomialInterval::zero_population();
    }
    let k = successes.min(total);
    let p = k as f64 / total as f64;
    let (lo, hi) = jeffreys_bounds(k, total, ONE_SIGMA);
    let upper_error = (hi - p).max(0.0);
    let lower_error = (p - lo).max(0.0);
    BinomialInterval {
        successes: k,
        total,
        probability: p,
        error: 0.5 * (upper_error + lower_error),
        upper_error,
        lower_error,
    }
}

fn jeffreys_bounds(k: usize, n: usize, confidence: f64) -> (f64, f64) {
    let alpha = 1.0 - confidence;
    let a = k as f64 + 0.5;
    let b = (n - k) as f64 + 0.5;
    let Ok(beta) = Beta::new(a, b) else {
        return (0.0, 1.0);
    };
    let lo = if k == 0 {
        0.0
    } else {
        beta.inverse_cdf(0.5 * alpha)
    };
    let hi = if k == n {
        1.0
    } else {
        beta.inverse_cdf(1.0 - 0.5 * alpha)
    };
    (sanitize(lo, 0.0), sanitize(hi, 1.0))
}

fn sanitize(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        fallback
    }
}
