//! Minimize traced targets over their flattened arguments.

use autotrace::{CallArgs, Outputs, Symbolic, Tensor, VectorArgs, VectorMode};
use tracing::debug;

use crate::error::{OptimError, Result};
use crate::objective::VectorObjective;
use crate::result::OptimResult;
use crate::solvers::cg::{conjugate_gradient, CgConfig};
use crate::solvers::lbfgsb::{lbfgsb, LbfgsbConfig};

/// Diagnostics returned by [`fmin_l_bfgs_b`] on request.
#[derive(Debug, Clone)]
pub struct LbfgsbInfo {
    /// Objective value at the optimum.
    pub f_opt: f64,
    /// Full solver result, including the flat optimum and its gradient.
    pub result: OptimResult<f64>,
}

/// Optimized arguments, plus diagnostics when `return_info` was set.
#[derive(Debug, Clone)]
pub struct LbfgsbOutput {
    pub args: Outputs,
    pub info: Option<LbfgsbInfo>,
}

/// Compile `symbolic` for value and gradient over the flat vector of `args`.
fn compile(symbolic: Symbolic, args: &CallArgs) -> Result<(VectorArgs, Vec<f64>)> {
    let va = VectorArgs::new(symbolic, args, VectorMode::VALUE_AND_GRAD)?;
    let x0 = VectorArgs::vector_from_args(va.initial_args()).to_vec();
    debug!(dim = x0.len(), arguments = va.initial_args().len(), "flattened objective");
    Ok((va, x0))
}

/// Map the flat optimum back onto the argument structure.
fn restore(va: &VectorArgs, x: &[f64]) -> Result<Outputs> {
    let args: Vec<Tensor> = VectorArgs::args_from_vector(x, va.initial_args())?;
    Ok(Outputs::from_vec(args))
}

/// Minimize the scalar target with nonlinear conjugate gradient, starting
/// from `args`. Returns the optimized arguments, a bare array when there is
/// only one.
pub fn fmin_cg(symbolic: Symbolic, args: &CallArgs, config: &CgConfig<f64>) -> Result<Outputs> {
    let (va, x0) = compile(symbolic, args)?;
    let mut obj = VectorObjective::new(&va);
    let result = conjugate_gradient(&mut obj, &x0, config);
    if let Some(e) = obj.take_error() {
        return Err(e.into());
    }
    restore(&va, &result.x)
}

/// Minimize the scalar target with projected L-BFGS, starting from `args`.
///
/// `scalar_bounds` applies one `(lower, upper)` pair to every element;
/// per-element bounds go in [`LbfgsbConfig::bounds`] instead. Supplying
/// both is an error, as is setting [`LbfgsbConfig::approx_grad`].
pub fn fmin_l_bfgs_b(
    symbolic: Symbolic,
    args: &CallArgs,
    scalar_bounds: Option<(f64, f64)>,
    return_info: bool,
    config: &LbfgsbConfig<f64>,
) -> Result<LbfgsbOutput> {
    if config.approx_grad.is_some() {
        return Err(OptimError::DuplicateOption("approx_grad"));
    }
    if scalar_bounds.is_some() && config.bounds.is_some() {
        return Err(OptimError::DuplicateOption("bounds"));
    }

    let (va, x0) = compile(symbolic, args)?;
    let n = x0.len();
    let bounds = match (scalar_bounds, &config.bounds) {
        (Some(pair), _) => vec![pair; n],
        (None, Some(b)) if b.len() != n => {
            return Err(OptimError::BoundsLength {
                expected: n,
                received: b.len(),
            })
        }
        (None, Some(b)) => b.clone(),
        (None, None) => vec![(f64::NEG_INFINITY, f64::INFINITY); n],
    };

    let mut obj = VectorObjective::new(&va);
    let result = lbfgsb(&mut obj, &x0, &bounds, config);
    if let Some(e) = obj.take_error() {
        return Err(e.into());
    }

    let args = restore(&va, &result.x)?;
    let info = return_info.then(|| LbfgsbInfo {
        f_opt: result.value,
        result,
    });
    Ok(LbfgsbOutput { args, info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrace::Signature;

    fn offset_square() -> Symbolic {
        Symbolic::new(Signature::new(["x"]), |f| {
            let x = f.arg("x")?;
            Ok(((x - 2.0) * (x - 2.0)).sum())
        })
    }

    #[test]
    fn approx_grad_is_rejected() {
        let config = LbfgsbConfig {
            approx_grad: Some(true),
            ..Default::default()
        };
        let err = fmin_l_bfgs_b(offset_square(), &CallArgs::new().arg(0.0), None, false, &config)
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate argument: approx_grad");
    }

    #[test]
    fn bounds_given_twice() {
        let config = LbfgsbConfig {
            bounds: Some(vec![(0.0, 1.0)]),
            ..Default::default()
        };
        let err = fmin_l_bfgs_b(
            offset_square(),
            &CallArgs::new().arg(0.0),
            Some((0.0, 1.0)),
            false,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, OptimError::DuplicateOption("bounds")));
    }

    #[test]
    fn bounds_length_checked() {
        let config = LbfgsbConfig {
            bounds: Some(vec![(0.0, 1.0)]),
            ..Default::default()
        };
        let call = CallArgs::new().arg(Tensor::vector(&[0.0, 0.0]));
        let err = fmin_l_bfgs_b(offset_square(), &call, None, false, &config).unwrap_err();
        assert!(matches!(
            err,
            OptimError::BoundsLength {
                expected: 2,
                received: 1
            }
        ));
    }
}
