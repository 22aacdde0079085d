//! Lowering of traced tensor operations to scalar graph nodes.
//!
//! Every operation a [`Var`](super::Var) can perform is one variant of
//! [`TensorOp`], and each variant has exactly one lowering rule here. Rules
//! receive resolved operand shadows and emit element nodes into the graph.

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::opcode::OpCode;
use crate::tensor::{broadcast_shapes, broadcast_source, shape_len, strides};

use super::shadow::SymTensor;

/// Reduction kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Prod,
    Max,
    Min,
    Mean,
    All,
    Any,
}

/// Closed set of traced tensor operations.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorOp {
    /// Elementwise binary op with broadcasting.
    Binary(OpCode),
    /// Elementwise unary op.
    Unary(OpCode),
    Powi(i32),
    Cast(DType),
    Reduce {
        kind: Reduction,
        axis: Option<usize>,
    },
    Dot,
    Reshape(Vec<usize>),
    /// Axis permutation.
    Permute(Vec<usize>),
    /// Element `i` along the first axis.
    Index(usize),
    /// Range along the first axis, clamped to its length.
    Slice(usize, usize),
    /// Copy of operand 0 with element `i` along the first axis replaced by operand 1.
    SetIndex(usize),
    SetSlice(usize, usize),
    /// Same shape and dtype as the operand, every element set to a constant.
    FillLike(f64),
}

impl TensorOp {
    pub fn name(&self) -> &'static str {
        match self {
            TensorOp::Binary(OpCode::Add) => "add",
            TensorOp::Binary(OpCode::Sub) => "sub",
            TensorOp::Binary(OpCode::Mul) => "mul",
            TensorOp::Binary(OpCode::Div) => "div",
            TensorOp::Binary(OpCode::Powf) => "pow",
            TensorOp::Binary(OpCode::Max) => "maximum",
            TensorOp::Binary(OpCode::Min) => "minimum",
            TensorOp::Binary(_) => "compare",
            TensorOp::Unary(_) => "elemwise",
            TensorOp::Powi(_) => "powi",
            TensorOp::Cast(_) => "cast",
            TensorOp::Reduce { kind, .. } => match kind {
                Reduction::Sum => "sum",
                Reduction::Prod => "prod",
                Reduction::Max => "max",
                Reduction::Min => "min",
                Reduction::Mean => "mean",
                Reduction::All => "all",
                Reduction::Any => "any",
            },
            TensorOp::Dot => "dot",
            TensorOp::Reshape(_) => "reshape",
            TensorOp::Permute(_) => "transpose",
            TensorOp::Index(_) => "index",
            TensorOp::Slice(..) => "slice",
            TensorOp::SetIndex(_) | TensorOp::SetSlice(..) => "set_subtensor",
            TensorOp::FillLike(_) => "fill",
        }
    }

    fn arity(&self) -> usize {
        match self {
            TensorOp::Binary(_)
            | TensorOp::Dot
            | TensorOp::SetIndex(_)
            | TensorOp::SetSlice(..) => 2,
            _ => 1,
        }
    }
}

/// Lower `op` applied to `operands`.
pub(crate) fn lower(g: &mut Graph, op: &TensorOp, operands: &[SymTensor]) -> Result<SymTensor> {
    if operands.len() != op.arity() {
        return Err(Error::Lowering(format!(
            "{} takes {} operands, received {}",
            op.name(),
            op.arity(),
            operands.len()
        )));
    }
    let x = &operands[0];
    match op {
        TensorOp::Binary(code) => binary(g, *code, x, &operands[1]),
        TensorOp::Unary(code) => Ok(unary(g, *code, x)),
        TensorOp::Powi(exp) => {
            if x.dtype.is_integer() && *exp < 0 {
                return Err(Error::Lowering(
                    "Integers to negative integer powers are not allowed.".to_string(),
                ));
            }
            let dtype = if x.dtype == DType::Bool { DType::I64 } else { x.dtype };
            let nodes = x.nodes.iter().map(|&n| g.powi(n, *exp)).collect();
            Ok(SymTensor::new(x.shape.clone(), dtype, nodes).with_broadcastable(&x.broadcastable))
        }
        TensorOp::Cast(dtype) => {
            if *dtype == x.dtype {
                return Ok(x.clone());
            }
            let nodes = x.nodes.iter().map(|&n| g.cast(n, *dtype)).collect();
            Ok(SymTensor::new(x.shape.clone(), *dtype, nodes).with_broadcastable(&x.broadcastable))
        }
        TensorOp::Reduce { kind, axis } => reduce(g, *kind, *axis, x),
        TensorOp::Dot => dot(g, x, &operands[1]),
        TensorOp::Reshape(shape) => {
            if shape_len(shape) != x.size() {
                return Err(Error::Lowering(format!(
                    "cannot reshape array of size {} into shape {:?}",
                    x.size(),
                    shape
                )));
            }
            Ok(SymTensor::new(shape.clone(), x.dtype, x.nodes.clone()))
        }
        TensorOp::Permute(perm) => permute(x, perm),
        TensorOp::Index(i) => {
            let (len, inner) = leading_axis(x)?;
            if *i >= len {
                return Err(Error::IndexOutOfBounds {
                    axis: 0,
                    index: *i,
                    len,
                });
            }
            let nodes = x.nodes[i * inner..(i + 1) * inner].to_vec();
            Ok(SymTensor::new(x.shape[1..].to_vec(), x.dtype, nodes)
                .with_broadcastable(&x.broadcastable[1..]))
        }
        TensorOp::Slice(start, end) => {
            let (len, inner) = leading_axis(x)?;
            let (start, end) = clamp_range(*start, *end, len);
            let mut shape = x.shape.clone();
            shape[0] = end - start;
            let nodes = x.nodes[start * inner..end * inner].to_vec();
            Ok(SymTensor::new(shape, x.dtype, nodes))
        }
        TensorOp::SetIndex(i) => {
            let (len, inner) = leading_axis(x)?;
            if *i >= len {
                return Err(Error::IndexOutOfBounds {
                    axis: 0,
                    index: *i,
                    len,
                });
            }
            set_range(g, x, &operands[1], *i, *i + 1, inner, &x.shape[1..])
        }
        TensorOp::SetSlice(start, end) => {
            let (len, inner) = leading_axis(x)?;
            let (start, end) = clamp_range(*start, *end, len);
            let mut sub = x.shape.clone();
            sub[0] = end - start;
            set_range(g, x, &operands[1], start, end, inner, &sub)
        }
        TensorOp::FillLike(v) => {
            let node = g.constant(x.dtype.coerce(*v));
            let nodes = vec![node; x.size()];
            Ok(SymTensor::new(x.shape.clone(), x.dtype, nodes).with_broadcastable(&x.broadcastable))
        }
    }
}

fn binary(g: &mut Graph, op: OpCode, a: &SymTensor, b: &SymTensor) -> Result<SymTensor> {
    let mismatch = || Error::Broadcast {
        lhs: a.shape.clone(),
        rhs: b.shape.clone(),
    };
    let shape = broadcast_shapes(&a.shape, &b.shape).ok_or_else(mismatch)?;
    // A length-one axis only stretches if its pattern allows it.
    for t in [a, b] {
        let offset = shape.len() - t.shape.len();
        for (k, (&d, &bc)) in t.shape.iter().zip(&t.broadcastable).enumerate() {
            if d == 1 && shape[offset + k] != 1 && !bc {
                return Err(mismatch());
            }
        }
    }

    let dtype = if op.is_comparison() {
        DType::Bool
    } else if op == OpCode::Div {
        a.dtype.true_divide(b.dtype)
    } else {
        a.dtype.promote(b.dtype)
    };
    let needs_cast = (dtype == DType::Bool && !op.is_comparison())
        || (op == OpCode::Powf && dtype.is_integer());

    let n = shape_len(&shape);
    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let na = a.nodes[broadcast_source(i, &shape, &a.shape)];
        let nb = b.nodes[broadcast_source(i, &shape, &b.shape)];
        let mut node = g.binary(op, na, nb);
        if needs_cast {
            node = g.cast(node, dtype);
        }
        nodes.push(node);
    }
    Ok(SymTensor::new(shape, dtype, nodes))
}

fn unary(g: &mut Graph, op: OpCode, x: &SymTensor) -> SymTensor {
    let dtype = match op {
        OpCode::Neg | OpCode::Abs | OpCode::Signum | OpCode::Floor | OpCode::Ceil => x.dtype,
        _ => x.dtype.to_float(),
    };
    let nodes = x.nodes.iter().map(|&n| g.unary(op, n)).collect();
    SymTensor::new(x.shape.clone(), dtype, nodes).with_broadcastable(&x.broadcastable)
}

fn reduce(g: &mut Graph, kind: Reduction, axis: Option<usize>, x: &SymTensor) -> Result<SymTensor> {
    let (outer, len, inner, shape) = match axis {
        None => (1, x.size(), 1, Vec::new()),
        Some(ax) if ax < x.ndim() => {
            let mut shape = x.shape.clone();
            shape.remove(ax);
            (
                shape_len(&x.shape[..ax]),
                x.shape[ax],
                shape_len(&x.shape[ax + 1..]),
                shape,
            )
        }
        Some(ax) => {
            return Err(Error::Lowering(format!(
                "axis {ax} is out of bounds for array of dimension {}",
                x.ndim()
            )))
        }
    };

    let dtype = match kind {
        Reduction::Sum | Reduction::Prod if x.dtype == DType::Bool => DType::I64,
        Reduction::Sum | Reduction::Prod | Reduction::Max | Reduction::Min => x.dtype,
        Reduction::Mean => x.dtype.to_float(),
        Reduction::All | Reduction::Any => DType::Bool,
    };

    let mut nodes = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let group: Vec<NodeId> = (0..len).map(|k| x.nodes[(o * len + k) * inner + i]).collect();
            nodes.push(fold(g, kind, &group)?);
        }
    }
    Ok(SymTensor::new(shape, dtype, nodes))
}

fn fold(g: &mut Graph, kind: Reduction, group: &[NodeId]) -> Result<NodeId> {
    let Some((&first, rest)) = group.split_first() else {
        return match kind {
            Reduction::Sum | Reduction::Any => Ok(g.constant(0.0)),
            Reduction::Prod | Reduction::All => Ok(g.constant(1.0)),
            Reduction::Mean => Ok(g.constant(f64::NAN)),
            Reduction::Max | Reduction::Min => Err(Error::Lowering(
                "zero-size array to reduction operation which has no identity".to_string(),
            )),
        };
    };
    let (op, truthy) = match kind {
        Reduction::Sum | Reduction::Mean => (OpCode::Add, false),
        Reduction::Prod => (OpCode::Mul, false),
        Reduction::Max => (OpCode::Max, false),
        Reduction::Min => (OpCode::Min, false),
        Reduction::All => (OpCode::Min, true),
        Reduction::Any => (OpCode::Max, true),
    };
    let zero = truthy.then(|| g.constant(0.0));
    let prep = |g: &mut Graph, n: NodeId| match zero {
        Some(z) => g.binary(OpCode::Ne, n, z),
        None => n,
    };
    let mut acc = prep(g, first);
    for &n in rest {
        let n = prep(g, n);
        acc = g.binary(op, acc, n);
    }
    if kind == Reduction::Mean {
        acc = g.scale(acc, 1.0 / group.len() as f64);
    }
    Ok(acc)
}

fn dot(g: &mut Graph, a: &SymTensor, b: &SymTensor) -> Result<SymTensor> {
    if a.ndim() == 0 || b.ndim() == 0 {
        return binary(g, OpCode::Mul, a, b);
    }
    if a.ndim() > 2 || b.ndim() > 2 {
        return Err(Error::Lowering(
            "dot is only defined for arrays of at most two dimensions".to_string(),
        ));
    }
    let (m, k) = if a.ndim() == 2 {
        (a.shape[0], a.shape[1])
    } else {
        (1, a.shape[0])
    };
    let (kb, n) = if b.ndim() == 2 {
        (b.shape[0], b.shape[1])
    } else {
        (b.shape[0], 1)
    };
    if k != kb {
        return Err(Error::Lowering(format!(
            "shapes {:?} and {:?} not aligned: {k} (dim {}) != {kb} (dim 0)",
            a.shape,
            b.shape,
            a.ndim() - 1
        )));
    }

    let mut shape = Vec::new();
    if a.ndim() == 2 {
        shape.push(m);
    }
    if b.ndim() == 2 {
        shape.push(n);
    }
    let dtype = a.dtype.promote(b.dtype);
    let mut nodes = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            let mut acc = g.constant(0.0);
            for p in 0..k {
                let prod = g.mul(a.nodes[i * k + p], b.nodes[p * n + j]);
                acc = g.add(acc, prod);
            }
            nodes.push(acc);
        }
    }
    Ok(SymTensor::new(shape, dtype, nodes))
}

fn permute(x: &SymTensor, perm: &[usize]) -> Result<SymTensor> {
    let mut seen = vec![false; x.ndim()];
    let valid = perm.len() == x.ndim()
        && perm
            .iter()
            .all(|&p| p < seen.len() && !std::mem::replace(&mut seen[p], true));
    if !valid {
        return Err(Error::Lowering(format!(
            "axes {perm:?} do not match an array of dimension {}",
            x.ndim()
        )));
    }
    let shape: Vec<usize> = perm.iter().map(|&p| x.shape[p]).collect();
    let pattern: Vec<bool> = perm.iter().map(|&p| x.broadcastable[p]).collect();
    let in_strides = strides(&x.shape);
    let out_strides = strides(&shape);
    let nodes = (0..x.size())
        .map(|flat| {
            let mut rem = flat;
            let mut src = 0;
            for (axis, &stride) in out_strides.iter().enumerate() {
                src += (rem / stride) * in_strides[perm[axis]];
                rem %= stride;
            }
            x.nodes[src]
        })
        .collect();
    Ok(SymTensor::new(shape, x.dtype, nodes).with_broadcastable(&pattern))
}

/// Length and row size of the first axis.
fn leading_axis(x: &SymTensor) -> Result<(usize, usize)> {
    match x.shape.first() {
        Some(&len) => Ok((len, shape_len(&x.shape[1..]))),
        None => Err(Error::Lowering(
            "too many indices for a 0-dimensional array".to_string(),
        )),
    }
}

fn clamp_range(start: usize, end: usize, len: usize) -> (usize, usize) {
    let end = end.min(len);
    (start.min(end), end)
}

fn set_range(
    g: &mut Graph,
    target: &SymTensor,
    value: &SymTensor,
    start: usize,
    end: usize,
    inner: usize,
    sub_shape: &[usize],
) -> Result<SymTensor> {
    match broadcast_shapes(sub_shape, &value.shape) {
        Some(s) if s == sub_shape => {}
        _ => {
            return Err(Error::Broadcast {
                lhs: sub_shape.to_vec(),
                rhs: value.shape.clone(),
            })
        }
    }
    let mut nodes = target.nodes.clone();
    for (k, slot) in nodes[start * inner..end * inner].iter_mut().enumerate() {
        let src = value.nodes[broadcast_source(k, sub_shape, &value.shape)];
        *slot = if value.dtype == target.dtype {
            src
        } else {
            g.cast(src, target.dtype)
        };
    }
    Ok(SymTensor::new(target.shape.clone(), target.dtype, nodes)
        .with_broadcastable(&target.broadcastable))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(g: &mut Graph, shape: &[usize], values: &[f64]) -> SymTensor {
        let nodes = values
            .iter()
            .enumerate()
            .map(|(i, &v)| g.leaf(i as u32, v))
            .collect();
        SymTensor::new(shape.to_vec(), DType::F64, nodes)
    }

    fn values(g: &Graph, t: &SymTensor) -> Vec<f64> {
        t.nodes.iter().map(|&n| g.value(n)).collect()
    }

    #[test]
    fn broadcasting_add() {
        let mut g = Graph::new();
        let a = leaves(&mut g, &[2, 1], &[1.0, 2.0]);
        let b = leaves(&mut g, &[3], &[10.0, 20.0, 30.0]);
        let c = lower(&mut g, &TensorOp::Binary(OpCode::Add), &[a, b]).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(values(&g, &c), vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
    }

    #[test]
    fn non_broadcastable_unit_axis_is_rejected() {
        let mut g = Graph::new();
        let a = leaves(&mut g, &[1], &[1.0]).with_broadcastable(&[false]);
        let b = leaves(&mut g, &[2], &[1.0, 2.0]);
        let err = lower(&mut g, &TensorOp::Binary(OpCode::Mul), &[a, b]).unwrap_err();
        assert!(matches!(err, Error::Broadcast { .. }));
    }

    #[test]
    fn axis_reductions() {
        let mut g = Graph::new();
        let x = leaves(&mut g, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let op = TensorOp::Reduce {
            kind: Reduction::Sum,
            axis: Some(0),
        };
        let s = lower(&mut g, &op, &[x.clone()]).unwrap();
        assert_eq!(values(&g, &s), vec![5.0, 7.0, 9.0]);
        let op = TensorOp::Reduce {
            kind: Reduction::Max,
            axis: Some(1),
        };
        let m = lower(&mut g, &op, &[x.clone()]).unwrap();
        assert_eq!(values(&g, &m), vec![3.0, 6.0]);
        let op = TensorOp::Reduce {
            kind: Reduction::Mean,
            axis: None,
        };
        let mean = lower(&mut g, &op, &[x]).unwrap();
        assert_eq!(values(&g, &mean), vec![3.5]);
    }

    #[test]
    fn matrix_vector_dot() {
        let mut g = Graph::new();
        let a = leaves(&mut g, &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let v = leaves(&mut g, &[2], &[1.0, 1.0]);
        let out = lower(&mut g, &TensorOp::Dot, &[a, v]).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(values(&g, &out), vec![3.0, 7.0]);
    }

    #[test]
    fn transpose_and_index() {
        let mut g = Graph::new();
        let x = leaves(&mut g, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = lower(&mut g, &TensorOp::Permute(vec![1, 0]), &[x]).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(values(&g, &t), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let row = lower(&mut g, &TensorOp::Index(2), &[t.clone()]).unwrap();
        assert_eq!(values(&g, &row), vec![3.0, 6.0]);
        let err = lower(&mut g, &TensorOp::Index(3), &[t]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { index: 3, len: 3, .. }));
    }

    #[test]
    fn set_slice_broadcasts_value() {
        let mut g = Graph::new();
        let x = leaves(&mut g, &[4], &[1.0, 2.0, 3.0, 4.0]);
        let z = SymTensor::scalar(g.constant(0.0), DType::F64);
        let y = lower(&mut g, &TensorOp::SetSlice(1, 10), &[x, z]).unwrap();
        assert_eq!(values(&g, &y), vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn negative_integer_power_fails() {
        let mut g = Graph::new();
        let n = g.leaf(0, 2.0);
        let x = SymTensor::scalar(n, DType::I64);
        assert!(matches!(
            lower(&mut g, &TensorOp::Powi(-2), &[x]),
            Err(Error::Lowering(_))
        ));
    }

    #[test]
    fn empty_max_has_no_identity() {
        let mut g = Graph::new();
        let x = SymTensor::new(vec![0], DType::F64, Vec::new());
        let op = TensorOp::Reduce {
            kind: Reduction::Max,
            axis: None,
        };
        assert!(lower(&mut g, &op, &[x]).is_err());
    }
}
