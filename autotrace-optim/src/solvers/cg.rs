use num_traits::Float;
use tracing::debug;

use super::{rejected, report};
use crate::convergence::{dot, norm, ConvergenceParams};
use crate::line_search::{backtracking_armijo, ArmijoParams};
use crate::objective::Objective;
use crate::result::{OptimResult, TerminationReason};

/// Configuration for the nonlinear conjugate-gradient solver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CgConfig<F> {
    /// Convergence parameters.
    pub convergence: ConvergenceParams<F>,
    /// Line search parameters.
    pub line_search: ArmijoParams<F>,
    /// Reset to steepest descent every `restart` iterations; 0 uses the
    /// problem dimension (default: 0).
    pub restart: usize,
}

impl Default for CgConfig<f64> {
    fn default() -> Self {
        CgConfig {
            convergence: ConvergenceParams::default(),
            line_search: ArmijoParams::default(),
            restart: 0,
        }
    }
}

impl Default for CgConfig<f32> {
    fn default() -> Self {
        CgConfig {
            convergence: ConvergenceParams::default(),
            line_search: ArmijoParams::default(),
            restart: 0,
        }
    }
}

/// Nonlinear conjugate gradient.
///
/// Minimizes `obj` from `x0` with Polak-Ribiere+ directions and backtracking
/// Armijo steps. The direction falls back to steepest descent whenever it
/// stops being a descent direction, and periodically per `config.restart`.
pub fn conjugate_gradient<F: Float, O: Objective<F>>(
    obj: &mut O,
    x0: &[F],
    config: &CgConfig<F>,
) -> OptimResult<F> {
    let n = x0.len();
    if config.convergence.max_iter == 0 {
        return rejected("cg", x0);
    }

    let mut x = x0.to_vec();
    let (mut f_val, mut grad) = obj.eval_grad(&x);
    let mut func_evals = 1usize;
    let mut grad_norm = norm(&grad);

    let finish = |x, value, gradient, gradient_norm, iterations, func_evals, termination| {
        report(
            "cg",
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

    if !f_val.is_finite() || !grad_norm.is_finite() {
        return finish(x, f_val, grad, grad_norm, 0, func_evals, TerminationReason::NumericalError);
    }
    if grad_norm < config.convergence.grad_tol {
        return finish(x, f_val, grad, grad_norm, 0, func_evals, TerminationReason::GradientNorm);
    }

    let restart = if config.restart == 0 { n.max(1) } else { config.restart };
    let mut d: Vec<F> = grad.iter().map(|&g| -g).collect();

    for iter in 0..config.convergence.max_iter {
        if !(dot(&grad, &d) < F::zero()) {
            for (di, &gi) in d.iter_mut().zip(&grad) {
                *di = -gi;
            }
        }

        let ls = match backtracking_armijo(obj, &x, &d, f_val, &grad, &config.line_search) {
            Some(ls) => ls,
            None => {
                return finish(
                    x,
                    f_val,
                    grad,
                    grad_norm,
                    iter,
                    func_evals,
                    TerminationReason::LineSearchFailed,
                )
            }
        };
        func_evals += ls.evals;
        let step_norm = ls.alpha.abs() * norm(&d);

        // Polak-Ribiere+: beta = max(0, g_new^T (g_new - g) / g^T g)
        let gg = dot(&grad, &grad);
        let mut beta = F::zero();
        if gg > F::zero() && (iter + 1) % restart != 0 {
            let mut num = F::zero();
            for i in 0..n {
                num = num + ls.gradient[i] * (ls.gradient[i] - grad[i]);
            }
            beta = (num / gg).max(F::zero());
        }
        for i in 0..n {
            d[i] = beta * d[i] - ls.gradient[i];
        }

        let f_prev = f_val;
        x = ls.x;
        f_val = ls.value;
        grad = ls.gradient;
        grad_norm = norm(&grad);

        debug!(
            solver = "cg",
            iter,
            value = f_val.to_f64().unwrap_or(f64::NAN),
            gradient_norm = grad_norm.to_f64().unwrap_or(f64::NAN),
            alpha = ls.alpha.to_f64().unwrap_or(f64::NAN),
            "iteration"
        );

        if grad_norm < config.convergence.grad_tol {
            let reason = TerminationReason::GradientNorm;
            return finish(x, f_val, grad, grad_norm, iter + 1, func_evals, reason);
        }
        if step_norm < config.convergence.step_tol {
            let reason = TerminationReason::StepSize;
            return finish(x, f_val, grad, grad_norm, iter + 1, func_evals, reason);
        }
        let func_tol = config.convergence.func_tol;
        if func_tol > F::zero() && (f_prev - f_val).abs() < func_tol {
            let reason = TerminationReason::FunctionChange;
            return finish(x, f_val, grad, grad_norm, iter + 1, func_evals, reason);
        }
    }

    finish(
        x,
        f_val,
        grad,
        grad_norm,
        config.convergence.max_iter,
        func_evals,
        TerminationReason::MaxIterations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// f = e0^2 + 5 e1^2 + e0 e1 with e = x - (1, -2).
    struct Coupled;

    impl Objective<f64> for Coupled {
        fn dim(&self) -> usize {
            2
        }

        fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
            let (e0, e1) = (x[0] - 1.0, x[1] + 2.0);
            let f = e0 * e0 + 5.0 * e1 * e1 + e0 * e1;
            (f, vec![2.0 * e0 + e1, 10.0 * e1 + e0])
        }
    }

    #[test]
    fn cg_coupled_quadratic() {
        let mut obj = Coupled;
        let config = CgConfig {
            convergence: ConvergenceParams {
                max_iter: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = conjugate_gradient(&mut obj, &[4.0, -3.0], &config);

        assert_eq!(result.termination, TerminationReason::GradientNorm);
        assert!((result.x[0] - 1.0).abs() < 1e-7, "x[0] = {}", result.x[0]);
        assert!((result.x[1] + 2.0).abs() < 1e-7, "x[1] = {}", result.x[1]);
    }

    #[test]
    fn cg_already_converged() {
        let mut obj = Coupled;
        let result = conjugate_gradient(&mut obj, &[1.0, -2.0], &CgConfig::default());

        assert_eq!(result.termination, TerminationReason::GradientNorm);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn cg_max_iter_zero() {
        let mut obj = Coupled;
        let config = CgConfig {
            convergence: ConvergenceParams {
                max_iter: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = conjugate_gradient(&mut obj, &[1.0, 1.0], &config);
        assert_eq!(result.termination, TerminationReason::NumericalError);
    }
}
