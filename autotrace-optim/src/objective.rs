use autotrace::{Error, VectorArgs};

/// Trait for optimization objectives.
///
/// Implementors provide function evaluation and gradient computation.
/// Methods take `&mut self` to allow caching, eval counting, and internal buffers.
pub trait Objective<F: num_traits::Float> {
    /// Number of input variables.
    fn dim(&self) -> usize;

    /// Evaluate the objective and its gradient at `x`.
    ///
    /// Returns `(f(x), ∇f(x))`.
    fn eval_grad(&mut self, x: &[F]) -> (F, Vec<F>);
}

/// Adapter exposing a compiled [`VectorArgs`] as an [`Objective`].
///
/// Evaluation errors cannot cross the solver boundary, so the first one is
/// kept and the point is reported as NaN, which every solver rejects.
pub struct VectorObjective<'a> {
    args: &'a VectorArgs,
    func_evals: usize,
    error: Option<Error>,
}

impl<'a> VectorObjective<'a> {
    /// `args` must have been compiled with both value and gradient outputs.
    pub fn new(args: &'a VectorArgs) -> Self {
        VectorObjective {
            args,
            func_evals: 0,
            error: None,
        }
    }

    /// Number of function evaluations performed so far.
    pub fn func_evals(&self) -> usize {
        self.func_evals
    }

    pub fn vector_args(&self) -> &VectorArgs {
        self.args
    }

    /// The first evaluation error, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}

impl Objective<f64> for VectorObjective<'_> {
    fn dim(&self) -> usize {
        self.args.layout().len()
    }

    fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
        self.func_evals += 1;
        match self.args.value_and_grad(x) {
            Ok((value, grad)) => (value, grad.to_vec()),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
                (f64::NAN, vec![f64::NAN; x.len()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrace::{CallArgs, Signature, Symbolic, Tensor, VectorMode};

    fn quadratic() -> VectorArgs {
        let s = Symbolic::new(Signature::new(["x"]), |f| {
            let x = f.arg("x")?;
            Ok((x * x).sum())
        });
        let call = CallArgs::new().arg(Tensor::vector(&[1.0, 2.0]));
        VectorArgs::new(s, &call, VectorMode::VALUE_AND_GRAD).unwrap()
    }

    #[test]
    fn evaluates_and_counts() {
        let va = quadratic();
        let mut obj = VectorObjective::new(&va);
        assert_eq!(obj.dim(), 2);
        let (f, g) = obj.eval_grad(&[3.0, 4.0]);
        assert_eq!(f, 25.0);
        assert_eq!(g, vec![6.0, 8.0]);
        assert_eq!(obj.func_evals(), 1);
        assert!(obj.take_error().is_none());
    }

    #[test]
    fn wrong_length_is_recorded() {
        let va = quadratic();
        let mut obj = VectorObjective::new(&va);
        let (f, _) = obj.eval_grad(&[1.0]);
        assert!(f.is_nan());
        assert!(matches!(
            obj.take_error(),
            Some(Error::VectorLength {
                expected: 2,
                received: 1
            })
        ));
    }
}
