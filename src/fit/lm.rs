//! Levenberg–Marquardt least squares for one-dimensional curve models.
//!
//! Models expose a value, an analytic Jacobian row and an optional constraint
//! hook applied after each step. The damped normal equations
//! `(JᵀJ + λ·diag(JᵀJ)) δ = Jᵀr` are solved with an LU decomposition.
use nalgebra::{DMatrix, DVector};

/// A model `y = f(x; p)` with `N` parameters.
pub trait CurveModel<const N: usize> {
    fn evaluate(&self, x: f64, params: &[f64; N]) -> f64;

    /// Partial derivatives `∂f/∂p_i` at `x`.
    fn jacobian_row(&self, x: f64, params: &[f64; N]) -> [f64; N];

    /// Project parameters back into their admissible region after an update.
    fn constrain(&self, _params: &mut [f64; N]) {}
}

/// Optimiser settings.
#[derive(Clone, Debug)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// Relative parameter step below which the fit is converged.
    pub step_tolerance: f64,
    /// Relative χ² decrease below which the fit is converged.
    pub chi2_tolerance: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    /// Damping at which the optimiser gives up improving.
    pub lambda_max: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            step_tolerance: 1e-8,
            chi2_tolerance: 1e-12,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            lambda_max: 1e10,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LmResult<const N: usize> {
    pub params: [f64; N],
    /// Sum of squared residuals at `params`.
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Fit `model` to the samples `(xs[i], ys[i])` starting from `initial`.
///
/// A run that stalls with the damping at `lambda_max` is reported as
/// converged when its χ² is finite: no step can reduce it any further.
/// Exhausting `max_iterations` is not.
pub fn optimize<const N: usize, M: CurveModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    initial: [f64; N],
    config: &LmConfig,
) -> LmResult<N> {
    let mut params = initial;
    model.constrain(&mut params);
    let mut chi2 = sum_squares(model, xs, ys, &params);
    let mut lambda = config.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iterations && chi2.is_finite() {
        iterations += 1;
        let (hessian, gradient) = normal_equations(model, xs, ys, &params);

        let mut damped = hessian.clone();
        for i in 0..N {
            damped[(i, i)] = hessian[(i, i)] * (1.0 + lambda) + f64::MIN_POSITIVE;
        }
        let Some(delta) = damped.lu().solve(&gradient) else {
            lambda *= config.lambda_up;
            if lambda > config.lambda_max {
                converged = true;
                break;
            }
            continue;
        };

        let mut trial = params;
        for (p, d) in trial.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut trial);
        let trial_chi2 = sum_squares(model, xs, ys, &trial);

        if trial_chi2.is_finite() && trial_chi2 < chi2 {
            let small_step = trial
                .iter()
                .zip(params.iter())
                .all(|(t, p)| (t - p).abs() <= config.step_tolerance * (p.abs() + config.step_tolerance));
            let small_gain = (chi2 - trial_chi2) <= config.chi2_tolerance * chi2;
            params = trial;
            chi2 = trial_chi2;
            lambda = (lambda * config.lambda_down).max(f64::EPSILON);
            if small_step || small_gain {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > config.lambda_max {
                converged = true;
                break;
            }
        }
    }

    LmResult {
        params,
        chi2,
        converged: converged && chi2.is_finite(),
        iterations,
    }
}

fn sum_squares<const N: usize, M: CurveModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let r = y - model.evaluate(x, params);
            r * r
        })
        .sum()
}

/// `(JᵀJ, Jᵀr)` at `params`.
fn normal_equations<const N: usize, M: CurveModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
) -> (DMatrix<f64>, DVector<f64>) {
    let mut hessian = DMatrix::<f64>::zeros(N, N);
    let mut gradient = DVector::<f64>::zeros(N);
    for (&x, &y) in xs.iter().zip(ys) {
        let row = model.jacobian_row(x, params);
        let r = y - model.evaluate(x, params);
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[(i, j)] += row[i] * row[j];
            }
        }
    }
    for i in 0..N {
        for j in 0..i {
            hessian[(i, j)] = hessian[(j, i)];
        }
    }
    (hessian, gradient)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Line;

    impl CurveModel<2> for Line {
        fn evaluate(&self, x: f64, p: &[f64; 2]) -> f64 {
            p[0] * x + p[1]
        }

        fn jacobian_row(&self, x: f64, _p: &[f64; 2]) -> [f64; 2] {
            [x, 1.0]
        }
    }

    struct Decay;

    impl CurveModel<2> for Decay {
        fn evaluate(&self, x: f64, p: &[f64; 2]) -> f64 {
            p[0] * (-p[1] * x).exp()
        }

        fn jacobian_row(&self, x: f64, p: &[f64; 2]) -> [f64; 2] {
            let e = (-p[1] * x).exp();
            [e, -p[0] * x * e]
        }

        fn constrain(&self, p: &mut [f64; 2]) {
            p[1] = p[1].max(0.0);
        }
    }

    #[test]
    fn recovers_linear_parameters() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x - 2.0).collect();
        let res = optimize(&Line, &xs, &ys, [0.0, 0.0], &LmConfig::default());
        assert!(res.converged);
        assert!((res.params[0] - 3.0).abs() < 1e-6);
        assert!((res.params[1] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn recovers_exponential_decay() {
        let xs: Vec<f64> = (0..30).map(|i| i as f64 * 0.2).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 5.0 * (-0.7 * x).exp()).collect();
        let res = optimize(&Decay, &xs, &ys, [1.0, 0.1], &LmConfig::default());
        assert!(res.converged);
        assert!((res.params[0] - 5.0).abs() < 1e-4);
        assert!((res.params[1] - 0.7).abs() < 1e-4);
        assert!(res.chi2 < 1e-8);
    }

    #[test]
    fn iteration_cap_is_not_convergence() {
        let xs: Vec<f64> = (0..30).map(|i| i as f64 * 0.2).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 5.0 * (-0.7 * x).exp()).collect();
        let config = LmConfig {
            max_iterations: 1,
            ..LmConfig::default()
        };
        let res = optimize(&Decay, &xs, &ys, [1.0, 0.1], &config);
        assert_eq!(res.iterations, 1);
        assert!(!res.converged);
    }
}
