use num_traits::Float;

use crate::convergence::{dot, project};
use crate::objective::Objective;

/// Backtracking parameters shared by the plain and projected Armijo searches.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmijoParams<F> {
    /// Sufficient decrease parameter (default: 1e-4).
    pub c: F,
    /// Backtracking factor (default: 0.5).
    pub rho: F,
    /// Initial step size (default: 1.0).
    pub alpha_init: F,
    /// Minimum step size before declaring failure (default: 1e-16).
    pub alpha_min: F,
}

impl Default for ArmijoParams<f64> {
    fn default() -> Self {
        ArmijoParams {
            c: 1e-4,
            rho: 0.5,
            alpha_init: 1.0,
            alpha_min: 1e-16,
        }
    }
}

impl Default for ArmijoParams<f32> {
    fn default() -> Self {
        ArmijoParams {
            c: 1e-4,
            rho: 0.5,
            alpha_init: 1.0,
            alpha_min: 1e-8,
        }
    }
}

/// Accepted trial point. The point, value and gradient are handed straight
/// to the next iteration, so an accepted step costs no extra evaluation.
#[derive(Debug)]
pub struct LineSearchResult<F> {
    pub alpha: F,
    pub x: Vec<F>,
    pub value: F,
    pub gradient: Vec<F>,
    pub evals: usize,
}

/// Armijo backtracking along `x + alpha*d`, used by conjugate gradient.
///
/// Accepts the first `alpha` with `f(x + alpha*d) <= f(x) + c * alpha * g^T d`.
/// Returns `None` if `d` is not a descent direction or `alpha` falls below
/// `alpha_min`; the caller then restarts along `-g`.
pub fn backtracking_armijo<F: Float, O: Objective<F>>(
    obj: &mut O,
    x: &[F],
    d: &[F],
    f_x: F,
    grad_x: &[F],
    params: &ArmijoParams<F>,
) -> Option<LineSearchResult<F>> {
    let n = x.len();
    let dg = dot(grad_x, d);

    if !(dg < F::zero()) {
        return None;
    }

    let mut alpha = params.alpha_init;
    let mut x_new = vec![F::zero(); n];
    let mut evals = 0;

    loop {
        if alpha < params.alpha_min {
            return None;
        }

        for i in 0..n {
            x_new[i] = x[i] + alpha * d[i];
        }

        let (f_new, g_new) = obj.eval_grad(&x_new);
        evals += 1;

        if f_new <= f_x + params.c * alpha * dg {
            return Some(LineSearchResult {
                alpha,
                x: x_new,
                value: f_new,
                gradient: g_new,
                evals,
            });
        }

        alpha = alpha * params.rho;
    }
}

/// Armijo backtracking along the projected path `P(x + alpha*d)`.
///
/// Sufficient decrease is measured against the actual step taken:
/// `f(x_a) <= f(x) + c * g^T (x_a - x)` with `x_a = P(x + alpha*d)`.
pub fn projected_armijo<F: Float, O: Objective<F>>(
    obj: &mut O,
    x: &[F],
    d: &[F],
    f_x: F,
    grad_x: &[F],
    bounds: &[(F, F)],
    params: &ArmijoParams<F>,
) -> Option<LineSearchResult<F>> {
    let n = x.len();
    let mut alpha = params.alpha_init;
    let mut x_new = vec![F::zero(); n];
    let mut step = vec![F::zero(); n];
    let mut evals = 0;

    loop {
        if alpha < params.alpha_min {
            return None;
        }

        for i in 0..n {
            x_new[i] = x[i] + alpha * d[i];
        }
        project(&mut x_new, bounds);
        for i in 0..n {
            step[i] = x_new[i] - x[i];
        }

        let dg = dot(grad_x, &step);
        if step.iter().all(|&s| s == F::zero()) {
            return None;
        }
        if dg < F::zero() {
            let (f_new, g_new) = obj.eval_grad(&x_new);
            evals += 1;

            if f_new <= f_x + params.c * dg {
                return Some(LineSearchResult {
                    alpha,
                    x: x_new,
                    value: f_new,
                    gradient: g_new,
                    evals,
                });
            }
        }

        alpha = alpha * params.rho;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// f(x) = (x0 - 3)^2 + 10 (x1 + 1)^2
    struct Bowl;

    impl Objective<f64> for Bowl {
        fn dim(&self) -> usize {
            2
        }

        fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
            let (e0, e1) = (x[0] - 3.0, x[1] + 1.0);
            (e0 * e0 + 10.0 * e1 * e1, vec![2.0 * e0, 20.0 * e1])
        }
    }

    fn steepest(obj: &mut Bowl, x: &[f64]) -> (f64, Vec<f64>, Vec<f64>) {
        let (f_x, grad) = obj.eval_grad(x);
        let d = grad.iter().map(|&g| -g).collect();
        (f_x, grad, d)
    }

    #[test]
    fn armijo_backtracks_on_steep_axis() {
        let mut obj = Bowl;
        let x = [0.0, 0.0];
        let (f_x, grad, d) = steepest(&mut obj, &x);

        let r = backtracking_armijo(&mut obj, &x, &d, f_x, &grad, &ArmijoParams::default())
            .unwrap();
        assert!(r.alpha < 1.0, "alpha={}", r.alpha);
        assert!(r.evals > 1);
        assert!(r.value < f_x);
        assert_eq!(r.gradient, obj.eval_grad(&r.x).1);
    }

    #[test]
    fn armijo_rejects_ascent_direction() {
        let mut obj = Bowl;
        let x = [0.0, 0.0];
        let (f_x, grad, _) = steepest(&mut obj, &x);

        let r = backtracking_armijo(&mut obj, &x, &grad, f_x, &grad, &ArmijoParams::default());
        assert!(r.is_none());
    }

    #[test]
    fn projected_trial_stays_on_the_bound() {
        let mut obj = Bowl;
        let x = [0.0, 0.0];
        let (f_x, grad, d) = steepest(&mut obj, &x);
        // The optimum (3, -1) lies outside x0 <= 1.
        let bounds = [(f64::NEG_INFINITY, 1.0), (-5.0, 5.0)];

        let r = projected_armijo(&mut obj, &x, &d, f_x, &grad, &bounds, &ArmijoParams::default())
            .unwrap();
        assert!(r.x[0] <= 1.0);
        assert!(r.x[1] >= -5.0 && r.x[1] <= 0.0);
        assert!(r.value < f_x);
    }

    #[test]
    fn projected_search_gives_up_when_pinned() {
        let mut obj = Bowl;
        // Both variables sit on a bound that blocks the descent direction.
        let x = [1.0, 0.0];
        let (f_x, grad, d) = steepest(&mut obj, &x);
        let bounds = [(0.0, 1.0), (0.0, 2.0)];

        let r = projected_armijo(&mut obj, &x, &d, f_x, &grad, &bounds, &ArmijoParams::default());
        assert!(r.is_none());
    }
}
