//! Scalar opcodes for the symbolic graph.
//!
//! Every graph node is one opcode applied to at most two earlier nodes. The
//! [`eval_forward`] function evaluates a single opcode; derivative rules live
//! in [`crate::graph`] because they build new nodes rather than numbers.

use num_traits::Float;

use crate::dtype::DType;

/// Sentinel used in `args[1]` for unary ops (the second argument slot is unused).
pub const UNUSED: u32 = u32::MAX;

/// Elementary operation codes.
///
/// Binary ops use both argument slots. Unary ops use slot 0 only; slot 1 is
/// [`UNUSED`] except for [`OpCode::Powi`] (the `i32` exponent reinterpreted as
/// `u32`) and [`OpCode::Cast`] (the target [`DType`] code). Structural ops keep
/// their payload in slot 0.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    // ── Structural ──
    /// Formal input of a compiled program. Slot 0 holds the flat input position.
    Input,
    /// Element of a traced argument. Slot 0 holds the leaf position. Leaves
    /// must be substituted before a graph can be compiled.
    Leaf,
    /// Scalar constant.
    Const,
    /// Element of borrowed storage: `[storage, offset]`, read at call time.
    Shared,

    // ── Binary arithmetic ──
    Add,
    Sub,
    Mul,
    Div,
    Powf,
    Max,
    Min,

    // ── Comparisons (result is 0 or 1) ──
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,

    // ── Unary ──
    Neg,
    Recip,
    Sqrt,
    /// Integer power. Exponent stored in `args[1]` as `exp as u32`.
    Powi,
    Exp,
    Ln,
    Ln1p,
    Log10,
    Sin,
    Cos,
    Tan,
    Tanh,
    Abs,
    /// Zero derivative but needed for re-evaluation.
    Signum,
    /// Zero derivative but needed for re-evaluation.
    Floor,
    /// Zero derivative but needed for re-evaluation.
    Ceil,
    /// Dtype coercion. Target dtype code stored in `args[1]`.
    Cast,
}

impl OpCode {
    /// Ops that read nothing but their own payload.
    #[inline]
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            OpCode::Input | OpCode::Leaf | OpCode::Const | OpCode::Shared
        )
    }

    /// Ops whose second slot is a node index.
    #[inline]
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Powf
                | OpCode::Max
                | OpCode::Min
                | OpCode::Lt
                | OpCode::Le
                | OpCode::Gt
                | OpCode::Ge
                | OpCode::Eq
                | OpCode::Ne
        )
    }

    #[inline]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            OpCode::Add | OpCode::Mul | OpCode::Max | OpCode::Min | OpCode::Eq | OpCode::Ne
        )
    }

    #[inline]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge | OpCode::Eq | OpCode::Ne
        )
    }

    /// Piecewise-constant ops: derivative is zero wherever it exists.
    #[inline]
    pub fn is_locally_constant(self) -> bool {
        self.is_comparison() || matches!(self, OpCode::Signum | OpCode::Floor | OpCode::Ceil)
    }
}

/// Evaluate a single non-structural opcode.
///
/// For binary ops, `a` and `b` are the two operand values. For unary ops, `a`
/// is the operand and `b` is ignored, except [`OpCode::Powi`] (`b` is the
/// exponent) and [`OpCode::Cast`] (`b` is the dtype code). Use
/// [`slot_operand`] to produce `b` for those two.
#[inline]
pub fn eval_forward<T: Float>(op: OpCode, a: T, b: T) -> T {
    let one = T::one();
    let zero = T::zero();
    let flag = |c: bool| if c { one } else { zero };
    match op {
        OpCode::Input | OpCode::Leaf | OpCode::Const | OpCode::Shared => {
            unreachable!("structural nodes are read, not evaluated")
        }

        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Powf => a.powf(b),
        OpCode::Max => {
            if a >= b {
                a
            } else {
                b
            }
        }
        OpCode::Min => {
            if a <= b {
                a
            } else {
                b
            }
        }

        OpCode::Lt => flag(a < b),
        OpCode::Le => flag(a <= b),
        OpCode::Gt => flag(a > b),
        OpCode::Ge => flag(a >= b),
        OpCode::Eq => flag(a == b),
        OpCode::Ne => flag(a != b),

        OpCode::Neg => -a,
        OpCode::Recip => a.recip(),
        OpCode::Sqrt => a.sqrt(),
        OpCode::Powi => a.powi(b.to_i32().unwrap_or(1)),
        OpCode::Exp => a.exp(),
        OpCode::Ln => a.ln(),
        OpCode::Ln1p => a.ln_1p(),
        OpCode::Log10 => a.log10(),
        OpCode::Sin => a.sin(),
        OpCode::Cos => a.cos(),
        OpCode::Tan => a.tan(),
        OpCode::Tanh => a.tanh(),
        OpCode::Abs => a.abs(),
        OpCode::Signum => {
            // numpy sign: 0 maps to 0
            if a == zero {
                zero
            } else {
                a.signum()
            }
        }
        OpCode::Floor => a.floor(),
        OpCode::Ceil => a.ceil(),
        OpCode::Cast => match b.to_u32().and_then(DType::from_code) {
            Some(dtype) => T::from(dtype.coerce(a.to_f64().unwrap_or(f64::NAN))).unwrap_or(a),
            None => a,
        },
    }
}

/// Decode the payload in slot 1 into the `b` operand expected by [`eval_forward`].
#[inline]
pub fn slot_operand<T: Float>(op: OpCode, slot: u32) -> T {
    match op {
        OpCode::Powi => T::from(powi_exp_decode(slot)).unwrap_or_else(T::one),
        OpCode::Cast => T::from(slot).unwrap_or_else(T::zero),
        _ => T::zero(),
    }
}

/// Encode a `powi` exponent as a value that can be stored in `args[1]`.
#[inline]
pub fn powi_exp_encode(exp: i32) -> u32 {
    exp as u32
}

/// Decode a `powi` exponent from `args[1]`.
#[inline]
pub fn powi_exp_decode(slot: u32) -> i32 {
    slot as i32
}
