//! Scalar-node symbolic graph.
//!
//! A [`Graph`] is an append-only list of opcodes in topological order: every
//! node's arguments precede it. Each node also carries the value it had when it
//! was created, which lets construction fold constants and simplify identities
//! the same way during tracing and during derivative construction.
//!
//! The graph runtime provides four services on top of construction:
//! substitution/cloning ([`Graph::clone_into`]), reverse-mode differentiation
//! ([`Graph::grad`]), the directional derivative ([`Graph::rop`]) and
//! compilation into an evaluable [`Program`] ([`Graph::compile`]).

use std::fmt;

use crate::dtype::DType;
use crate::opcode::{self, OpCode, UNUSED};
use crate::tensor::SharedTensor;

mod clone;
mod grad;
mod optimize;
mod program;
mod rop;

pub use self::program::Program;

/// Index of a node inside a [`Graph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Append-only symbolic graph of scalar operations.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub(crate) opcodes: Vec<OpCode>,
    pub(crate) args: Vec<[u32; 2]>,
    pub(crate) values: Vec<f64>,
    pub(crate) storages: Vec<SharedTensor>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(est_nodes: usize) -> Self {
        Graph {
            opcodes: Vec::with_capacity(est_nodes),
            args: Vec::with_capacity(est_nodes),
            values: Vec::with_capacity(est_nodes),
            storages: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    #[inline]
    pub fn opcode(&self, id: NodeId) -> OpCode {
        self.opcodes[id.index()]
    }

    #[inline]
    pub fn args(&self, id: NodeId) -> [u32; 2] {
        self.args[id.index()]
    }

    /// Value of `id` at the point where the graph was built.
    #[inline]
    pub fn value(&self, id: NodeId) -> f64 {
        self.values[id.index()]
    }

    /// Borrowed storages referenced by [`OpCode::Shared`] nodes.
    pub fn storages(&self) -> &[SharedTensor] {
        &self.storages
    }

    /// Number of non-structural nodes.
    pub fn num_ops(&self) -> usize {
        self.opcodes.iter().filter(|op| !op.is_structural()).count()
    }

    #[inline]
    fn push_raw(&mut self, op: OpCode, args: [u32; 2], value: f64) -> NodeId {
        let idx = self.opcodes.len() as u32;
        self.opcodes.push(op);
        self.args.push(args);
        self.values.push(value);
        NodeId(idx)
    }

    /// Formal input at flat position `slot`.
    pub fn input(&mut self, slot: u32, value: f64) -> NodeId {
        self.push_raw(OpCode::Input, [slot, UNUSED], value)
    }

    /// Trace leaf at position `slot`.
    pub fn leaf(&mut self, slot: u32, value: f64) -> NodeId {
        self.push_raw(OpCode::Leaf, [slot, UNUSED], value)
    }

    pub fn constant(&mut self, value: f64) -> NodeId {
        self.push_raw(OpCode::Const, [UNUSED, UNUSED], value)
    }

    /// Register `storage` (deduplicated by identity) and return its index.
    pub fn register_storage(&mut self, storage: &SharedTensor) -> u32 {
        if let Some(pos) = self.storages.iter().position(|s| s.ptr_eq(storage)) {
            return pos as u32;
        }
        self.storages.push(storage.clone());
        (self.storages.len() - 1) as u32
    }

    /// Element `offset` of registered storage `storage`, read at call time.
    pub fn shared(&mut self, storage: u32, offset: u32, value: f64) -> NodeId {
        self.push_raw(OpCode::Shared, [storage, offset], value)
    }

    pub fn unary(&mut self, op: OpCode, a: NodeId) -> NodeId {
        debug_assert!(!op.is_binary() && !op.is_structural());
        self.push_op(op, a, UNUSED)
    }

    pub fn binary(&mut self, op: OpCode, a: NodeId, b: NodeId) -> NodeId {
        debug_assert!(op.is_binary());
        self.push_op(op, a, b.0)
    }

    /// `a^exp` for an integer exponent.
    ///
    /// `x^1 → x`, `x^(-1) → Recip(x)` and `x^0 → 1`.
    pub fn powi(&mut self, a: NodeId, exp: i32) -> NodeId {
        match exp {
            1 => a,
            -1 => self.unary(OpCode::Recip, a),
            0 => self.constant(1.0),
            _ => self.push_op(OpCode::Powi, a, opcode::powi_exp_encode(exp)),
        }
    }

    /// Coerce `a` into `dtype`. Casting to `float64` is the identity.
    pub fn cast(&mut self, a: NodeId, dtype: DType) -> NodeId {
        if dtype == DType::F64 {
            return a;
        }
        self.push_op(OpCode::Cast, a, dtype.code())
    }

    #[inline]
    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(OpCode::Add, a, b)
    }

    #[inline]
    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(OpCode::Sub, a, b)
    }

    #[inline]
    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(OpCode::Mul, a, b)
    }

    #[inline]
    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(OpCode::Div, a, b)
    }

    #[inline]
    pub fn neg(&mut self, a: NodeId) -> NodeId {
        self.unary(OpCode::Neg, a)
    }

    /// `a * k` for a literal `k`.
    pub fn scale(&mut self, a: NodeId, k: f64) -> NodeId {
        let k = self.constant(k);
        self.mul(a, k)
    }

    /// Record an operation and return its node.
    ///
    /// **Constant folding**: if every operand is a `Const`, a single `Const`
    /// holding the computed value is emitted instead. `Shared` nodes are never
    /// folded since their storage may change between calls.
    ///
    /// **Algebraic simplification**: identity patterns (`x + 0 → x`,
    /// `x * 1 → x`, ...) return the existing node; absorbing patterns
    /// (`x * 0`, `x - x`, `x / x`) fold only when the value at construction
    /// agrees. The check sees construction-time values alone, so a compiled
    /// program keeps the folded constant even for inputs that would produce
    /// NaN (`x * 0` at `x = inf`, `x / x` at `x = 0`).
    pub(crate) fn push_op(&mut self, op: OpCode, a: NodeId, slot1: u32) -> NodeId {
        let binary = op.is_binary();
        let va = self.values[a.index()];
        let vb = if binary {
            self.values[slot1 as usize]
        } else {
            opcode::slot_operand(op, slot1)
        };
        let value = opcode::eval_forward(op, va, vb);

        let a_const = self.opcodes[a.index()] == OpCode::Const;
        let b_const = !binary || self.opcodes[slot1 as usize] == OpCode::Const;
        if a_const && b_const {
            return self.constant(value);
        }

        if binary && (a_const || b_const) {
            if let Some(id) = self.try_algebraic_simplify(op, a, NodeId(slot1), a_const, value) {
                return id;
            }
        }

        if binary && a.0 == slot1 {
            match op {
                OpCode::Sub if value == 0.0 => return self.constant(value),
                OpCode::Div if value == 1.0 => return self.constant(value),
                _ => {}
            }
        }

        self.push_raw(op, [a.0, slot1], value)
    }

    fn try_algebraic_simplify(
        &mut self,
        op: OpCode,
        a: NodeId,
        b: NodeId,
        a_const: bool,
        value: f64,
    ) -> Option<NodeId> {
        // Exactly one side is constant here.
        let (var, k) = if a_const {
            (b, self.value(a))
        } else {
            (a, self.value(b))
        };
        match op {
            OpCode::Add if k == 0.0 => Some(var),
            OpCode::Sub if !a_const && k == 0.0 => Some(var),
            OpCode::Mul if k == 1.0 => Some(var),
            OpCode::Mul if k == 0.0 && value == 0.0 => Some(self.constant(value)),
            OpCode::Div if !a_const && k == 1.0 => Some(var),
            _ => None,
        }
    }

    /// Mark every node reachable from `roots`, without descending past nodes for
    /// which `stop` returns true.
    pub(crate) fn reachable(&self, roots: &[NodeId], stop: impl Fn(NodeId) -> bool) -> Vec<bool> {
        let mut mark = vec![false; self.len()];
        let mut stack: Vec<u32> = roots.iter().map(|r| r.0).collect();
        while let Some(idx) = stack.pop() {
            let i = idx as usize;
            if mark[i] {
                continue;
            }
            mark[i] = true;
            let op = self.opcodes[i];
            if op.is_structural() || stop(NodeId(idx)) {
                continue;
            }
            let [a, b] = self.args[i];
            stack.push(a);
            if op.is_binary() {
                stack.push(b);
            }
        }
        mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_fold() {
        let mut g = Graph::new();
        let a = g.constant(2.0);
        let b = g.constant(3.0);
        let c = g.mul(a, b);
        assert_eq!(g.opcode(c), OpCode::Const);
        assert_eq!(g.value(c), 6.0);
    }

    #[test]
    fn identities_return_existing_node() {
        let mut g = Graph::new();
        let x = g.leaf(0, 4.0);
        let zero = g.constant(0.0);
        let one = g.constant(1.0);
        assert_eq!(g.add(x, zero), x);
        assert_eq!(g.mul(one, x), x);
        assert_eq!(g.div(x, one), x);
        // 0 - x is not an identity.
        let neg = g.sub(zero, x);
        assert_eq!(g.opcode(neg), OpCode::Sub);
    }

    #[test]
    fn shared_nodes_never_fold() {
        let mut g = Graph::new();
        let s = SharedTensor::new(2.0);
        let k = g.register_storage(&s);
        let x = g.shared(k, 0, 2.0);
        let two = g.constant(2.0);
        let y = g.mul(x, two);
        assert_eq!(g.opcode(y), OpCode::Mul);
        assert_eq!(g.register_storage(&s), k);
    }

    #[test]
    fn absorbing_fold_is_fixed_at_construction() {
        let mut g = Graph::new();
        let x = g.input(0, 1.0);
        let zero = g.constant(0.0);
        let prod = g.mul(x, zero);
        let ratio = g.div(x, x);
        assert_eq!(g.opcode(prod), OpCode::Const);
        assert_eq!(g.opcode(ratio), OpCode::Const);

        let prog = g.compile(&[prod, ratio], 1).unwrap();
        assert_eq!(prog.eval(&[f64::INFINITY]).unwrap(), vec![0.0, 1.0]);
        assert_eq!(prog.eval(&[0.0]).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn absorbing_zero_is_guarded() {
        let mut g = Graph::new();
        let x = g.leaf(0, f64::INFINITY);
        let zero = g.constant(0.0);
        let y = g.mul(x, zero);
        assert_eq!(g.opcode(y), OpCode::Mul);
        assert!(g.value(y).is_nan());
    }
}
