use crate::compiler::{Function, Gradient, HessianVector, Outputs};
use crate::error::Result;
use crate::symbolic::{ArgRef, CallArgs, Returns, Signature, Symbolic};
use crate::trace::Frame;
use crate::vector::{VectorArgs, VectorMode};

/// Wrap `f` in a cached [`Function`] compiler.
///
/// ```
/// use autotrace::{CallArgs, Signature, Tensor};
///
/// let mut f = autotrace::function(Signature::new(["x"]), |fr| {
///     let x = fr.arg("x")?;
///     Ok((x * x).sum())
/// });
/// let call = CallArgs::new().arg(Tensor::vector(&[3.0, 4.0]));
/// let out = f.call(&call).unwrap();
/// assert_eq!(out.one().unwrap().as_scalar(), Some(25.0));
/// ```
pub fn function<F, R>(signature: Signature, f: F) -> Function
where
    F: Fn(&Frame<'_>) -> Result<R> + 'static,
    R: Into<Returns>,
{
    Function::new(Symbolic::new(signature, f))
}

/// Wrap `f` in a cached [`Gradient`] compiler. An empty `wrt` differentiates
/// with respect to every argument.
///
/// ```
/// use autotrace::{CallArgs, Signature};
///
/// let mut g = autotrace::gradient(Signature::new(["x", "y"]), |fr| {
///     let x = fr.arg("x")?;
///     let y = fr.arg("y")?;
///     Ok(x * x * y)
/// }, vec!["x".into()]);
/// let out = g.call(&CallArgs::positional([3.0, 2.0])).unwrap();
/// assert_eq!(out.one().unwrap().as_scalar(), Some(12.0));
/// ```
pub fn gradient<F, R>(signature: Signature, f: F, wrt: Vec<ArgRef>) -> Gradient
where
    F: Fn(&Frame<'_>) -> Result<R> + 'static,
    R: Into<Returns>,
{
    Gradient::new(Symbolic::new(signature, f), wrt)
}

/// Wrap `f` in a cached [`HessianVector`] compiler.
pub fn hessian_vector<F, R>(signature: Signature, f: F, wrt: Vec<ArgRef>) -> HessianVector
where
    F: Fn(&Frame<'_>) -> Result<R> + 'static,
    R: Into<Returns>,
{
    HessianVector::new(Symbolic::new(signature, f), wrt)
}

/// Compile `f` against a flat parameter vector laid out like `init`.
pub fn vector_args<F, R>(
    signature: Signature,
    f: F,
    init: &CallArgs,
    mode: VectorMode,
) -> Result<VectorArgs>
where
    F: Fn(&Frame<'_>) -> Result<R> + 'static,
    R: Into<Returns>,
{
    VectorArgs::new(Symbolic::new(signature, f), init, mode)
}

/// Trace, compile and evaluate `f` once.
pub fn evaluate<F, R>(signature: Signature, f: F, call: &CallArgs) -> Result<Outputs>
where
    F: Fn(&Frame<'_>) -> Result<R> + 'static,
    R: Into<Returns>,
{
    Function::new(Symbolic::new(signature, f)).call(call)
}
