use autotrace_optim::{
    conjugate_gradient, lbfgsb, CgConfig, ConvergenceParams, LbfgsbConfig, Objective, OptimResult,
    TerminationReason,
};

// ============================================================
// Test objectives
// ============================================================

/// f(x) = 0.5 * sum(x_i^2). Minimum at origin, value 0.
struct Quadratic {
    dim: usize,
}

impl Objective<f64> for Quadratic {
    fn dim(&self) -> usize {
        self.dim
    }

    fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
        let f: f64 = 0.5 * x.iter().map(|&xi| xi * xi).sum::<f64>();
        (f, x.to_vec())
    }
}

/// f(x) = 0.5 * (a*x0^2 + b*x1^2). Ill-conditioned when a/b >> 1.
struct IllConditionedQuadratic {
    a: f64,
    b: f64,
}

impl Objective<f64> for IllConditionedQuadratic {
    fn dim(&self) -> usize {
        2
    }

    fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
        let f = 0.5 * (self.a * x[0] * x[0] + self.b * x[1] * x[1]);
        (f, vec![self.a * x[0], self.b * x[1]])
    }
}

/// Rosenbrock: f(x) = (1 - x0)^2 + 100*(x1 - x0^2)^2. Minimum at (1,1), value 0.
struct Rosenbrock2D;

impl Objective<f64> for Rosenbrock2D {
    fn dim(&self) -> usize {
        2
    }

    fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
        let a = 1.0 - x[0];
        let b = x[1] - x[0] * x[0];
        let f = a * a + 100.0 * b * b;
        (f, vec![-2.0 * a - 400.0 * x[0] * b, 200.0 * b])
    }
}

/// Counts evaluations and returns NaN past a point, like a failing target.
struct Poisoned {
    evals: usize,
    fail_after: usize,
}

impl Objective<f64> for Poisoned {
    fn dim(&self) -> usize {
        2
    }

    fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
        self.evals += 1;
        if self.evals > self.fail_after {
            return (f64::NAN, vec![f64::NAN; 2]);
        }
        (0.5 * (x[0] * x[0] + x[1] * x[1]), x.to_vec())
    }
}

fn free(n: usize) -> Vec<(f64, f64)> {
    vec![(f64::NEG_INFINITY, f64::INFINITY); n]
}

fn assert_near_origin(result: &OptimResult<f64>, tol: f64) {
    for (i, &xi) in result.x.iter().enumerate() {
        assert!(xi.abs() < tol, "x[{}] = {}, expected ~0", i, xi);
    }
    assert!(result.value < tol, "f = {}, expected ~0", result.value);
}

// ============================================================
// Conjugate gradient
// ============================================================

#[test]
fn cg_quadratic_8d() {
    let mut obj = Quadratic { dim: 8 };
    let result = conjugate_gradient(
        &mut obj,
        &[1.0, -2.0, 3.0, -4.0, 5.0, -6.0, 7.0, -8.0],
        &CgConfig::default(),
    );

    assert_eq!(result.termination, TerminationReason::GradientNorm);
    assert_near_origin(&result, 1e-6);
}

#[test]
fn cg_moderately_conditioned() {
    let mut obj = IllConditionedQuadratic { a: 10.0, b: 1.0 };
    let config = CgConfig {
        convergence: ConvergenceParams {
            max_iter: 2000,
            ..Default::default()
        },
        ..Default::default()
    };
    let result = conjugate_gradient(&mut obj, &[5.0, -3.0], &config);

    assert_eq!(result.termination, TerminationReason::GradientNorm);
    assert_near_origin(&result, 1e-6);
}

#[test]
fn cg_at_optimum() {
    let mut obj = Quadratic { dim: 3 };
    let result = conjugate_gradient(&mut obj, &[0.0, 0.0, 0.0], &CgConfig::default());

    assert_eq!(result.termination, TerminationReason::GradientNorm);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.func_evals, 1);
}

#[test]
fn cg_max_iter_terminates() {
    let mut obj = Rosenbrock2D;
    let config = CgConfig {
        convergence: ConvergenceParams {
            max_iter: 3,
            grad_tol: 0.0,
            step_tol: 0.0,
            func_tol: 0.0,
        },
        ..Default::default()
    };
    let result = conjugate_gradient(&mut obj, &[0.0, 0.0], &config);

    assert_eq!(result.termination, TerminationReason::MaxIterations);
    assert_eq!(result.iterations, 3);
}

#[test]
fn cg_nan_start_is_numerical_error() {
    let mut obj = Poisoned {
        evals: 0,
        fail_after: 0,
    };
    let result = conjugate_gradient(&mut obj, &[1.0, 1.0], &CgConfig::default());
    assert_eq!(result.termination, TerminationReason::NumericalError);
}

#[test]
fn cg_nan_mid_run_fails_line_search() {
    let mut obj = Poisoned {
        evals: 0,
        fail_after: 1,
    };
    let result = conjugate_gradient(&mut obj, &[1.0, 1.0], &CgConfig::default());
    assert_eq!(result.termination, TerminationReason::LineSearchFailed);
    assert_eq!(result.x, vec![1.0, 1.0]);
}

// ============================================================
// Projected L-BFGS
// ============================================================

#[test]
fn lbfgsb_quadratic_8d() {
    let mut obj = Quadratic { dim: 8 };
    let result = lbfgsb(
        &mut obj,
        &[1.0, -2.0, 3.0, -4.0, 5.0, -6.0, 7.0, -8.0],
        &free(8),
        &LbfgsbConfig::default(),
    );

    assert_eq!(result.termination, TerminationReason::GradientNorm);
    assert_near_origin(&result, 1e-6);
}

#[test]
fn lbfgsb_ill_conditioned() {
    let mut obj = IllConditionedQuadratic { a: 1000.0, b: 1.0 };
    let result = lbfgsb(&mut obj, &[5.0, -3.0], &free(2), &LbfgsbConfig::default());

    assert_eq!(result.termination, TerminationReason::GradientNorm);
    assert_near_origin(&result, 1e-4);
}

#[test]
fn lbfgsb_memory_1() {
    let mut obj = Quadratic { dim: 2 };
    let config = LbfgsbConfig {
        memory: 1,
        ..Default::default()
    };
    let result = lbfgsb(&mut obj, &[5.0, -3.0], &free(2), &config);

    assert_eq!(result.termination, TerminationReason::GradientNorm);
    assert_near_origin(&result, 1e-6);
}

#[test]
fn lbfgsb_box_quadratic() {
    // Unconstrained minimum at the origin lies outside [1, 2] x [-3, -1].
    let mut obj = Quadratic { dim: 2 };
    let bounds = [(1.0, 2.0), (-3.0, -1.0)];
    let result = lbfgsb(&mut obj, &[2.0, -3.0], &bounds, &LbfgsbConfig::default());

    assert_eq!(result.termination, TerminationReason::GradientNorm);
    assert_eq!(result.x, vec![1.0, -1.0]);
    assert_eq!(result.value, 1.0);
    assert_eq!(result.gradient_norm, 0.0);
}

#[test]
fn lbfgsb_iterates_stay_feasible() {
    let mut obj = Rosenbrock2D;
    let bounds = [(-0.5, 0.8), (-0.5, 0.8)];
    let config = LbfgsbConfig {
        convergence: ConvergenceParams {
            max_iter: 500,
            grad_tol: 1e-6,
            ..Default::default()
        },
        ..Default::default()
    };
    let result = lbfgsb(&mut obj, &[0.0, 0.0], &bounds, &config);

    for (&xi, &(lo, hi)) in result.x.iter().zip(&bounds) {
        assert!(xi >= lo && xi <= hi, "x = {:?}", result.x);
    }
    assert!(result.value < 1.0, "f = {}", result.value);
}

#[test]
fn lbfgsb_memory_zero() {
    let mut obj = Quadratic { dim: 2 };
    let config = LbfgsbConfig {
        memory: 0,
        ..Default::default()
    };
    let result = lbfgsb(&mut obj, &[1.0, 1.0], &free(2), &config);
    assert_eq!(result.termination, TerminationReason::NumericalError);
}

#[test]
fn lbfgsb_bounds_dimension_mismatch() {
    let mut obj = Quadratic { dim: 2 };
    let result = lbfgsb(&mut obj, &[1.0, 1.0], &free(3), &LbfgsbConfig::default());
    assert_eq!(result.termination, TerminationReason::NumericalError);
}

// ============================================================
// Convergence criteria
// ============================================================

#[test]
fn func_tol_terminates_lbfgsb() {
    let mut obj = Rosenbrock2D;
    let config = LbfgsbConfig {
        convergence: ConvergenceParams {
            max_iter: 1000,
            grad_tol: 0.0,
            step_tol: 0.0,
            func_tol: 1e-2,
        },
        ..Default::default()
    };
    let result = lbfgsb(&mut obj, &[0.0, 0.0], &free(2), &config);

    assert_eq!(result.termination, TerminationReason::FunctionChange);
    assert!(result.value < 1.0, "f = {}", result.value);
}

#[test]
fn solvers_agree_on_quadratic() {
    let x0 = &[3.0, -4.0, 1.0];

    let mut obj1 = Quadratic { dim: 3 };
    let r1 = conjugate_gradient(&mut obj1, x0, &CgConfig::default());

    let mut obj2 = Quadratic { dim: 3 };
    let r2 = lbfgsb(&mut obj2, x0, &free(3), &LbfgsbConfig::default());

    for (name, r) in [("CG", &r1), ("L-BFGS-B", &r2)] {
        assert_eq!(
            r.termination,
            TerminationReason::GradientNorm,
            "{} did not converge: {:?}",
            name,
            r.termination
        );
        assert_near_origin(r, 1e-6);
    }
}
