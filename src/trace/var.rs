//! Traced array handles.

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::opcode::OpCode;
use crate::tensor::{SharedTensor, Tensor};

use super::context::{with_active, TraceState};
use super::lower::{lower, Reduction, TensorOp};
use super::shadow::{ObjectId, Origin, SymTensor};

/// Handle to a traced array.
///
/// A `Var` is a copyable index into the active trace's shadow map. Every
/// operation on it records graph nodes into that trace and returns a new
/// handle; augmented assignment rebinds the variable to the new handle.
///
/// Operations performed with no active trace, or that fail, return a handle
/// that resolves to nothing; the failure is reported when the trace completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Var {
    pub(crate) id: ObjectId,
}

/// Operand of a traced operation.
///
/// Rust literals are "weak": they take the dtype of the traced operand they
/// are combined with, unless a float literal meets an integer array, which
/// promotes to `float64`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operand {
    Var(Var),
    Float(f64),
    Int(i64),
}

impl From<Var> for Operand {
    fn from(v: Var) -> Self {
        Operand::Var(v)
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Float(v)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Int(v)
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Int(v as i64)
    }
}

fn resolve(st: &mut TraceState, operands: &[Operand]) -> Result<Vec<SymTensor>> {
    let strong = operands.iter().find_map(|o| match o {
        Operand::Var(v) => Some(v.id),
        _ => None,
    });
    let strong = match strong {
        Some(id) => Some(st.tensor(id)?.dtype),
        None => None,
    };
    operands
        .iter()
        .map(|o| match *o {
            Operand::Var(v) => st.tensor(v.id).cloned(),
            Operand::Float(x) => {
                let dtype = match strong {
                    Some(d) if d.is_float() => d,
                    _ => DType::F64,
                };
                Ok(SymTensor::scalar(st.graph.constant(dtype.coerce(x)), dtype))
            }
            Operand::Int(i) => {
                let dtype = match strong {
                    Some(DType::Bool) | None => DType::I64,
                    Some(d) => d,
                };
                Ok(SymTensor::scalar(st.graph.constant(dtype.coerce(i as f64)), dtype))
            }
        })
        .collect()
}

impl Var {
    pub(crate) const DETACHED: Var = Var {
        id: ObjectId::DETACHED,
    };

    /// Record `op` on `operands` in the active trace.
    pub fn apply(op: TensorOp, operands: &[Operand]) -> Var {
        with_active(|st| {
            let out = resolve(st, operands).and_then(|ts| lower(&mut st.graph, &op, &ts));
            match out {
                Ok(t) => st.insert(t, Origin::Computed(op.name())),
                Err(e) => {
                    st.poison(e);
                    st.placeholder()
                }
            }
        })
        .map_or(Var::DETACHED, |id| Var { id })
    }

    fn unary(self, op: OpCode) -> Var {
        Var::apply(TensorOp::Unary(op), &[self.into()])
    }

    fn binary(self, op: OpCode, rhs: impl Into<Operand>) -> Var {
        Var::apply(TensorOp::Binary(op), &[self.into(), rhs.into()])
    }

    fn reduce(self, kind: Reduction, axis: Option<usize>) -> Var {
        Var::apply(TensorOp::Reduce { kind, axis }, &[self.into()])
    }

    // ══════════════════════════════════════════════
    //  Construction and inspection
    // ══════════════════════════════════════════════

    /// A constant embedded in the graph.
    pub fn constant(value: impl Into<Tensor>) -> Var {
        let value = value.into();
        with_active(|st| st.constant(&value)).map_or(Var::DETACHED, |id| Var { id })
    }

    /// Shadow of shared storage. Borrowed storages are read at call time,
    /// others are captured as constants.
    pub fn lift(storage: &SharedTensor) -> Var {
        with_active(|st| st.lift(storage)).map_or(Var::DETACHED, |id| Var { id })
    }

    pub fn id(self) -> ObjectId {
        self.id
    }

    fn with_tensor<R>(self, f: impl FnOnce(&SymTensor) -> R) -> Result<R> {
        with_active(|st| st.tensor(self.id).map(f)).ok_or(Error::NoActiveTrace)?
    }

    /// Concrete value at trace time.
    pub fn value(self) -> Result<Tensor> {
        with_active(|st| st.value_of(self.id)).ok_or(Error::NoActiveTrace)?
    }

    /// Concrete value of a one-element variable.
    pub fn scalar(self) -> Result<f64> {
        let t = self.value()?;
        t.as_scalar().ok_or_else(|| {
            Error::Lowering(format!(
                "only one-element arrays convert to scalars, shape is {:?}",
                t.shape()
            ))
        })
    }

    pub fn shape(self) -> Result<Vec<usize>> {
        self.with_tensor(|t| t.shape.clone())
    }

    pub fn ndim(self) -> Result<usize> {
        self.with_tensor(|t| t.ndim())
    }

    pub fn size(self) -> Result<usize> {
        self.with_tensor(|t| t.size())
    }

    pub fn dtype(self) -> Result<DType> {
        self.with_tensor(|t| t.dtype)
    }

    // ══════════════════════════════════════════════
    //  Elementwise
    // ══════════════════════════════════════════════

    pub fn exp(self) -> Var {
        self.unary(OpCode::Exp)
    }

    /// Natural logarithm.
    pub fn ln(self) -> Var {
        self.unary(OpCode::Ln)
    }

    pub fn ln_1p(self) -> Var {
        self.unary(OpCode::Ln1p)
    }

    pub fn log10(self) -> Var {
        self.unary(OpCode::Log10)
    }

    pub fn sqrt(self) -> Var {
        self.unary(OpCode::Sqrt)
    }

    pub fn sin(self) -> Var {
        self.unary(OpCode::Sin)
    }

    pub fn cos(self) -> Var {
        self.unary(OpCode::Cos)
    }

    pub fn tan(self) -> Var {
        self.unary(OpCode::Tan)
    }

    pub fn tanh(self) -> Var {
        self.unary(OpCode::Tanh)
    }

    pub fn abs(self) -> Var {
        self.unary(OpCode::Abs)
    }

    pub fn signum(self) -> Var {
        self.unary(OpCode::Signum)
    }

    pub fn floor(self) -> Var {
        self.unary(OpCode::Floor)
    }

    pub fn ceil(self) -> Var {
        self.unary(OpCode::Ceil)
    }

    pub fn recip(self) -> Var {
        self.unary(OpCode::Recip)
    }

    pub fn powi(self, exp: i32) -> Var {
        Var::apply(TensorOp::Powi(exp), &[self.into()])
    }

    pub fn powf(self, exp: impl Into<Operand>) -> Var {
        self.binary(OpCode::Powf, exp)
    }

    pub fn square(self) -> Var {
        self.powi(2)
    }

    pub fn maximum(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Max, other)
    }

    pub fn minimum(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Min, other)
    }

    /// Clamp every element to `[lo, hi]`.
    pub fn clip(self, lo: impl Into<Operand>, hi: impl Into<Operand>) -> Var {
        self.maximum(lo).minimum(hi)
    }

    pub fn lt(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Lt, other)
    }

    pub fn le(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Le, other)
    }

    pub fn gt(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Gt, other)
    }

    pub fn ge(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Ge, other)
    }

    /// Elementwise equality.
    pub fn eq_elem(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Eq, other)
    }

    /// Elementwise inequality.
    pub fn ne_elem(self, other: impl Into<Operand>) -> Var {
        self.binary(OpCode::Ne, other)
    }

    // ══════════════════════════════════════════════
    //  Reductions
    // ══════════════════════════════════════════════

    pub fn sum(self) -> Var {
        self.reduce(Reduction::Sum, None)
    }

    pub fn sum_axis(self, axis: usize) -> Var {
        self.reduce(Reduction::Sum, Some(axis))
    }

    pub fn mean(self) -> Var {
        self.reduce(Reduction::Mean, None)
    }

    pub fn mean_axis(self, axis: usize) -> Var {
        self.reduce(Reduction::Mean, Some(axis))
    }

    pub fn prod(self) -> Var {
        self.reduce(Reduction::Prod, None)
    }

    pub fn max(self) -> Var {
        self.reduce(Reduction::Max, None)
    }

    pub fn min(self) -> Var {
        self.reduce(Reduction::Min, None)
    }

    pub fn max_axis(self, axis: usize) -> Var {
        self.reduce(Reduction::Max, Some(axis))
    }

    pub fn min_axis(self, axis: usize) -> Var {
        self.reduce(Reduction::Min, Some(axis))
    }

    pub fn all(self) -> Var {
        self.reduce(Reduction::All, None)
    }

    pub fn any(self) -> Var {
        self.reduce(Reduction::Any, None)
    }

    /// Population variance of all elements.
    pub fn var(self) -> Var {
        (self - self.mean()).square().mean()
    }

    /// Population standard deviation of all elements.
    pub fn std(self) -> Var {
        self.var().sqrt()
    }

    // ══════════════════════════════════════════════
    //  Shape
    // ══════════════════════════════════════════════

    /// Matrix/vector product; scalars multiply elementwise.
    pub fn dot(self, other: Var) -> Var {
        Var::apply(TensorOp::Dot, &[self.into(), other.into()])
    }

    pub fn reshape(self, shape: &[usize]) -> Var {
        Var::apply(TensorOp::Reshape(shape.to_vec()), &[self.into()])
    }

    pub fn flatten(self) -> Var {
        match self.size() {
            Ok(n) => self.reshape(&[n]),
            Err(_) => self.reshape(&[]),
        }
    }

    /// Reverse the axes.
    pub fn transpose(self) -> Var {
        let perm = match self.ndim() {
            Ok(n) => (0..n).rev().collect(),
            Err(_) => Vec::new(),
        };
        Var::apply(TensorOp::Permute(perm), &[self.into()])
    }

    pub fn swap_axes(self, a: usize, b: usize) -> Var {
        let mut perm: Vec<usize> = match self.ndim() {
            Ok(n) => (0..n).collect(),
            Err(_) => Vec::new(),
        };
        if a < perm.len() && b < perm.len() {
            perm.swap(a, b);
        } else {
            // Leave the permutation invalid so lowering reports it.
            perm.push(a.max(b));
        }
        Var::apply(TensorOp::Permute(perm), &[self.into()])
    }

    /// Element `i` along the first axis.
    pub fn get(self, i: usize) -> Var {
        Var::apply(TensorOp::Index(i), &[self.into()])
    }

    /// Rows `start..end` along the first axis, clamped to its length.
    pub fn slice(self, start: usize, end: usize) -> Var {
        Var::apply(TensorOp::Slice(start, end), &[self.into()])
    }

    /// Assign element `i` along the first axis, rebinding `self`.
    pub fn set(&mut self, i: usize, value: impl Into<Operand>) {
        *self = Var::apply(TensorOp::SetIndex(i), &[(*self).into(), value.into()]);
    }

    /// Assign rows `start..end` along the first axis, rebinding `self`.
    pub fn set_slice(&mut self, start: usize, end: usize, value: impl Into<Operand>) {
        *self = Var::apply(TensorOp::SetSlice(start, end), &[(*self).into(), value.into()]);
    }

    pub fn astype(self, dtype: DType) -> Var {
        Var::apply(TensorOp::Cast(dtype), &[self.into()])
    }

    pub fn zeros_like(self) -> Var {
        Var::apply(TensorOp::FillLike(0.0), &[self.into()])
    }

    pub fn ones_like(self) -> Var {
        Var::apply(TensorOp::FillLike(1.0), &[self.into()])
    }
}
