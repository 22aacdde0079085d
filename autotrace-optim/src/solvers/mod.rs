pub mod cg;
pub mod lbfgsb;

use num_traits::Float;
use tracing::info;

use crate::result::{OptimResult, TerminationReason};

/// Log the outcome of a run and hand the result back.
pub(crate) fn report<F: Float>(solver: &'static str, result: OptimResult<F>) -> OptimResult<F> {
    info!(
        solver,
        iterations = result.iterations,
        func_evals = result.func_evals,
        value = result.value.to_f64().unwrap_or(f64::NAN),
        gradient_norm = result.gradient_norm.to_f64().unwrap_or(f64::NAN),
        termination = %result.termination,
        "optimizer finished"
    );
    result
}

/// Result for a run rejected before the first iteration.
pub(crate) fn rejected<F: Float>(solver: &'static str, x0: &[F]) -> OptimResult<F> {
    report(
        solver,
        OptimResult {
            x: x0.to_vec(),
            value: F::nan(),
            gradient: vec![F::zero(); x0.len()],
            gradient_norm: F::zero(),
            iterations: 0,
            func_evals: 0,
            termination: TerminationReason::NumericalError,
        },
    )
}
