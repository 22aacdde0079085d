use num_traits::Float;
use tracing::debug;

use super::{rejected, report};
use crate::convergence::{dot, norm, project, projected_gradient_norm, ConvergenceParams};
use crate::line_search::{projected_armijo, ArmijoParams};
use crate::objective::Objective;
use crate::result::{OptimResult, TerminationReason};

/// Configuration for the bound-constrained L-BFGS solver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LbfgsbConfig<F> {
    /// Number of recent (s, y) pairs to store (default: 10).
    pub memory: usize,
    /// Convergence parameters. `grad_tol` applies to the max norm of the
    /// projected gradient.
    pub convergence: ConvergenceParams<F>,
    /// Line search parameters.
    pub line_search: ArmijoParams<F>,
    /// Reserved: gradients always come from the compiled graph, so the
    /// adapter rejects any value here.
    pub approx_grad: Option<bool>,
    /// Per-element `(lower, upper)` bounds for the adapter. Infinite values
    /// leave a side unbounded.
    pub bounds: Option<Vec<(F, F)>>,
}

impl Default for LbfgsbConfig<f64> {
    fn default() -> Self {
        LbfgsbConfig {
            memory: 10,
            convergence: ConvergenceParams::default(),
            line_search: ArmijoParams::default(),
            approx_grad: None,
            bounds: None,
        }
    }
}

impl Default for LbfgsbConfig<f32> {
    fn default() -> Self {
        LbfgsbConfig {
            memory: 10,
            convergence: ConvergenceParams::default(),
            line_search: ArmijoParams::default(),
            approx_grad: None,
            bounds: None,
        }
    }
}

/// Projected L-BFGS over the box `bounds`.
///
/// Each iteration fixes the variables sitting on a bound with the gradient
/// pointing outward, takes the two-loop quasi-Newton direction in the
/// remaining ones, and backtracks along the projected path. `x0` is projected
/// into the box first.
pub fn lbfgsb<F: Float, O: Objective<F>>(
    obj: &mut O,
    x0: &[F],
    bounds: &[(F, F)],
    config: &LbfgsbConfig<F>,
) -> OptimResult<F> {
    let n = x0.len();
    if config.memory == 0
        || config.convergence.max_iter == 0
        || bounds.len() != n
        || bounds.iter().any(|&(lo, hi)| !(lo <= hi))
    {
        return rejected("lbfgsb", x0);
    }

    let mut x = x0.to_vec();
    project(&mut x, bounds);
    let (mut f_val, mut grad) = obj.eval_grad(&x);
    let mut func_evals = 1usize;
    let mut pg_norm = projected_gradient_norm(&x, &grad, bounds);

    let finish = |x, value, gradient, gradient_norm, iterations, func_evals, termination| {
        report(
            "lbfgsb",
            OptimResult {
                x,
                value,
                gradient,
                gradient_norm,
                iterations,
                func_evals,
                termination,
            },
        )
    };

    if !f_val.is_finite() || !pg_norm.is_finite() {
        return finish(x, f_val, grad, pg_norm, 0, func_evals, TerminationReason::NumericalError);
    }
    if pg_norm < config.convergence.grad_tol {
        return finish(x, f_val, grad, pg_norm, 0, func_evals, TerminationReason::GradientNorm);
    }

    let m = config.memory;
    let mut s_hist: Vec<Vec<F>> = Vec::with_capacity(m);
    let mut y_hist: Vec<Vec<F>> = Vec::with_capacity(m);
    let mut rho_hist: Vec<F> = Vec::with_capacity(m);

    for iter in 0..config.convergence.max_iter {
        let active = active_set(&x, &grad, bounds);
        let g_free: Vec<F> = grad
            .iter()
            .zip(&active)
            .map(|(&g, &a)| if a { F::zero() } else { g })
            .collect();

        let mut ls = None;
        for attempt in 0..2 {
            let mut d = two_loop_recursion(&g_free, &s_hist, &y_hist, &rho_hist);
            for (di, &a) in d.iter_mut().zip(&active) {
                if a {
                    *di = F::zero();
                }
            }
            if !(dot(&grad, &d) < F::zero()) {
                d = g_free.iter().map(|&g| -g).collect();
            }
            ls = projected_armijo(obj, &x, &d, f_val, &grad, bounds, &config.line_search);
            if ls.is_some() || s_hist.is_empty() || attempt == 1 {
                break;
            }
            // Retry once from steepest descent with the curvature history dropped.
            s_hist.clear();
            y_hist.clear();
            rho_hist.clear();
        }
        let ls = match ls {
            Some(ls) => ls,
            None => {
                return finish(
                    x,
                    f_val,
                    grad,
                    pg_norm,
                    iter,
                    func_evals,
                    TerminationReason::LineSearchFailed,
                )
            }
        };
        func_evals += ls.evals;

        let mut s = vec![F::zero(); n];
        let mut y = vec![F::zero(); n];
        for i in 0..n {
            s[i] = ls.x[i] - x[i];
            y[i] = ls.gradient[i] - grad[i];
        }
        let step_norm = norm(&s);

        let f_prev = f_val;
        x = ls.x;
        f_val = ls.value;
        grad = ls.gradient;
        pg_norm = projected_gradient_norm(&x, &grad, bounds);

        let sy = dot(&s, &y);
        if sy > F::epsilon() * dot(&y, &y) {
            if s_hist.len() == m {
                s_hist.remove(0);
                y_hist.remove(0);
                rho_hist.remove(0);
            }
            rho_hist.push(F::one() / sy);
            s_hist.push(s);
            y_hist.push(y);
        }

        debug!(
            solver = "lbfgsb",
            iter,
            value = f_val.to_f64().unwrap_or(f64::NAN),
            projected_gradient = pg_norm.to_f64().unwrap_or(f64::NAN),
            active = active.iter().filter(|&&a| a).count(),
            "iteration"
        );

        if pg_norm < config.convergence.grad_tol {
            let reason = TerminationReason::GradientNorm;
            return finish(x, f_val, grad, pg_norm, iter + 1, func_evals, reason);
        }
        if step_norm < config.convergence.step_tol {
            let reason = TerminationReason::StepSize;
            return finish(x, f_val, grad, pg_norm, iter + 1, func_evals, reason);
        }
        let func_tol = config.convergence.func_tol;
        if func_tol > F::zero() && (f_prev - f_val).abs() < func_tol {
            let reason = TerminationReason::FunctionChange;
            return finish(x, f_val, grad, pg_norm, iter + 1, func_evals, reason);
        }
    }

    finish(
        x,
        f_val,
        grad,
        pg_norm,
        config.convergence.max_iter,
        func_evals,
        TerminationReason::MaxIterations,
    )
}

/// Variables on a bound whose gradient pushes them further out.
fn active_set<F: Float>(x: &[F], grad: &[F], bounds: &[(F, F)]) -> Vec<bool> {
    x.iter()
        .zip(grad)
        .zip(bounds)
        .map(|((&xi, &gi), &(lo, hi))| (xi <= lo && gi > F::zero()) || (xi >= hi && gi < F::zero()))
        .collect()
}

/// L-BFGS two-loop recursion: compute d = -H_k * g_k.
fn two_loop_recursion<F: Float>(
    grad: &[F],
    s_hist: &[Vec<F>],
    y_hist: &[Vec<F>],
    rho_hist: &[F],
) -> Vec<F> {
    let k = s_hist.len();
    let n = grad.len();

    let mut q: Vec<F> = grad.to_vec();

    // First loop: newest to oldest
    let mut alpha = vec![F::zero(); k];
    for i in (0..k).rev() {
        alpha[i] = rho_hist[i] * dot(&s_hist[i], &q);
        for j in 0..n {
            q[j] = q[j] - alpha[i] * y_hist[i][j];
        }
    }

    // H_0 = gamma * I with gamma = s^T y / y^T y from the most recent pair
    let mut r = q;
    if k > 0 {
        let sy = dot(&s_hist[k - 1], &y_hist[k - 1]);
        let yy = dot(&y_hist[k - 1], &y_hist[k - 1]);
        if yy > F::zero() {
            let gamma = sy / yy;
            for v in r.iter_mut() {
                *v = *v * gamma;
            }
        }
    }

    // Second loop: oldest to newest
    for i in 0..k {
        let beta = rho_hist[i] * dot(&y_hist[i], &r);
        for j in 0..n {
            r[j] = r[j] + (alpha[i] - beta) * s_hist[i][j];
        }
    }

    for v in r.iter_mut() {
        *v = -*v;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rosenbrock;

    impl Objective<f64> for Rosenbrock {
        fn dim(&self) -> usize {
            2
        }

        fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
            let a = 1.0 - x[0];
            let b = x[1] - x[0] * x[0];
            let f = a * a + 100.0 * b * b;
            let g0 = -2.0 * a - 400.0 * x[0] * b;
            let g1 = 200.0 * b;
            (f, vec![g0, g1])
        }
    }

    const FREE: [(f64, f64); 2] = [(f64::NEG_INFINITY, f64::INFINITY); 2];

    #[test]
    fn unbounded_rosenbrock() {
        let mut obj = Rosenbrock;
        let config = LbfgsbConfig {
            convergence: ConvergenceParams {
                max_iter: 1000,
                grad_tol: 1e-8,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = lbfgsb(&mut obj, &[0.0, 0.0], &FREE, &config);

        assert_eq!(result.termination, TerminationReason::GradientNorm);
        assert!((result.x[0] - 1.0).abs() < 1e-6, "x[0] = {}", result.x[0]);
        assert!((result.x[1] - 1.0).abs() < 1e-6, "x[1] = {}", result.x[1]);
    }

    #[test]
    fn bound_excludes_optimum() {
        // Minimum over x0 <= 0.5 lies on the bound, at (0.5, 0.25).
        let mut obj = Rosenbrock;
        let config = LbfgsbConfig {
            convergence: ConvergenceParams {
                max_iter: 1000,
                grad_tol: 1e-6,
                ..Default::default()
            },
            ..Default::default()
        };
        let bounds = [(-2.0, 0.5), (-2.0, 2.0)];
        let result = lbfgsb(&mut obj, &[-1.0, 1.0], &bounds, &config);

        assert!(result.converged(), "stopped with {}", result.termination);
        assert_eq!(result.x[0], 0.5);
        assert!((result.x[1] - 0.25).abs() < 1e-4, "x[1] = {}", result.x[1]);
    }

    #[test]
    fn start_is_projected() {
        let mut obj = Rosenbrock;
        let bounds = [(1.0, 1.0), (1.0, 1.0)];
        let result = lbfgsb(&mut obj, &[5.0, -5.0], &bounds, &LbfgsbConfig::default());

        assert_eq!(result.termination, TerminationReason::GradientNorm);
        assert_eq!(result.x, vec![1.0, 1.0]);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut obj = Rosenbrock;
        let bounds = [(1.0, 0.0), (0.0, 1.0)];
        let result = lbfgsb(&mut obj, &[0.5, 0.5], &bounds, &LbfgsbConfig::default());
        assert_eq!(result.termination, TerminationReason::NumericalError);
        assert_eq!(result.func_evals, 0);
    }
}
