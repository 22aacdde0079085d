use std::fmt;

/// Outcome of a solver run over a flat parameter vector.
///
/// The adapters split `x` back into the caller's argument shapes; the other
/// fields describe the run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptimResult<F> {
    /// Final parameter vector, laid out like the initial arguments.
    pub x: Vec<F>,
    pub value: F,
    pub gradient: Vec<F>,
    /// Euclidean gradient norm for unconstrained runs. Bounded runs report
    /// the max norm of `x - P(x - g)`, which vanishes at a constrained
    /// stationary point even when `g` does not.
    pub gradient_norm: F,
    pub iterations: usize,
    /// Evaluations of the compiled value-and-gradient program, line-search
    /// trials included.
    pub func_evals: usize,
    pub termination: TerminationReason,
}

impl<F> OptimResult<F> {
    /// Whether the run stopped on a convergence test rather than a failure.
    pub fn converged(&self) -> bool {
        matches!(
            self.termination,
            TerminationReason::GradientNorm
                | TerminationReason::StepSize
                | TerminationReason::FunctionChange
        )
    }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TerminationReason {
    /// Gradient norm fell below tolerance.
    GradientNorm,
    /// Step size fell below tolerance.
    StepSize,
    /// Change in objective value fell below tolerance.
    FunctionChange,
    /// Reached the maximum number of iterations.
    MaxIterations,
    /// No trial point along the (projected) search path decreased enough.
    LineSearchFailed,
    /// Non-finite objective, a failed evaluation, or a rejected configuration
    /// such as inverted bounds.
    NumericalError,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::GradientNorm => write!(f, "gradient norm below tolerance"),
            TerminationReason::StepSize => write!(f, "step size below tolerance"),
            TerminationReason::FunctionChange => write!(f, "function change below tolerance"),
            TerminationReason::MaxIterations => write!(f, "maximum iterations reached"),
            TerminationReason::LineSearchFailed => write!(f, "line search failed"),
            TerminationReason::NumericalError => write!(f, "numerical error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(termination: TerminationReason) -> OptimResult<f64> {
        OptimResult {
            x: vec![3.0, -1.0],
            value: 0.0,
            gradient: vec![0.0, 0.0],
            gradient_norm: 0.0,
            iterations: 4,
            func_evals: 9,
            termination,
        }
    }

    #[test]
    fn converged_only_on_tolerance_stops() {
        assert!(finished(TerminationReason::GradientNorm).converged());
        assert!(finished(TerminationReason::FunctionChange).converged());
        assert!(!finished(TerminationReason::MaxIterations).converged());
        assert!(!finished(TerminationReason::NumericalError).converged());
    }

    #[test]
    fn reason_reads_as_a_phrase() {
        assert_eq!(
            TerminationReason::LineSearchFailed.to_string(),
            "line search failed"
        );
    }
}
