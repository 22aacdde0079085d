//! Symbolic reverse mode.
//!
//! Derivatives are built as new nodes in the same graph, so the result can be
//! differentiated again (see [`Graph::rop`](super::Graph::rop)).

use std::f64::consts::LN_10;

use crate::dtype::DType;
use crate::opcode::{self, OpCode};

use super::{Graph, NodeId};

/// Which operand of a node a local derivative is taken with respect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Lhs,
    Rhs,
}

impl Graph {
    /// Build `d(cost)/d(wrt[k])` for every `k`.
    ///
    /// `wrt` nodes need not be leaves or inputs: any node may be a
    /// differentiation variable, in which case its own dependencies are cut.
    /// A `wrt` node that `cost` does not depend on gets a constant zero.
    pub fn grad(&mut self, cost: NodeId, wrt: &[NodeId]) -> Vec<NodeId> {
        let limit = cost.index() + 1;
        let mut is_wrt = vec![false; limit];
        for w in wrt {
            if w.index() < limit {
                is_wrt[w.index()] = true;
            }
        }

        // active[i]: node i depends on some wrt node through a differentiable path.
        let mut active = vec![false; limit];
        for i in 0..limit {
            if is_wrt[i] {
                active[i] = true;
                continue;
            }
            let op = self.opcodes[i];
            if op.is_structural() || op.is_locally_constant() {
                continue;
            }
            let [a, b] = self.args[i];
            active[i] = active[a as usize] || (op.is_binary() && active[b as usize]);
        }

        let mut adjoint: Vec<Option<NodeId>> = vec![None; limit];
        if active[cost.index()] {
            adjoint[cost.index()] = Some(self.constant(1.0));
        }

        for i in (0..limit).rev() {
            let Some(adj) = adjoint[i] else { continue };
            if is_wrt[i] {
                continue;
            }
            let op = self.opcodes[i];
            if op.is_structural() {
                continue;
            }
            let [a, b] = self.args[i];
            let node = NodeId(i as u32);
            if active[a as usize] {
                if let Some(c) = self.chain(node, Side::Lhs, adj) {
                    accumulate(self, &mut adjoint, a as usize, c);
                }
            }
            if op.is_binary() && active[b as usize] {
                if let Some(c) = self.chain(node, Side::Rhs, adj) {
                    accumulate(self, &mut adjoint, b as usize, c);
                }
            }
        }

        wrt.iter()
            .map(|w| {
                adjoint
                    .get(w.index())
                    .copied()
                    .flatten()
                    .unwrap_or_else(|| self.constant(0.0))
            })
            .collect()
    }

    /// `seed * ∂node/∂operand`, or `None` when the local derivative is
    /// identically zero.
    ///
    /// The same expression serves reverse mode (seed = adjoint of `node`) and
    /// forward mode (seed = tangent of the operand).
    pub(crate) fn chain(&mut self, node: NodeId, side: Side, seed: NodeId) -> Option<NodeId> {
        let op = self.opcode(node);
        let [a, b] = self.args(node);
        let x = NodeId(a);
        let y = NodeId(b);
        let r = node;
        let lhs = side == Side::Lhs;

        let out = match op {
            OpCode::Add => seed,
            OpCode::Sub => {
                if lhs {
                    seed
                } else {
                    self.neg(seed)
                }
            }
            OpCode::Mul => {
                if lhs {
                    self.mul(seed, y)
                } else {
                    self.mul(seed, x)
                }
            }
            OpCode::Div => {
                // d/dx = 1/y, d/dy = -x/y² = -r/y
                let s = self.div(seed, y);
                if lhs {
                    s
                } else {
                    let sr = self.mul(s, r);
                    self.neg(sr)
                }
            }
            OpCode::Powf => {
                if lhs {
                    // y * x^(y-1)
                    let one = self.constant(1.0);
                    let ym1 = self.sub(y, one);
                    let p = self.binary(OpCode::Powf, x, ym1);
                    let d = self.mul(y, p);
                    self.mul(seed, d)
                } else {
                    // x^y * ln x
                    let lx = self.unary(OpCode::Ln, x);
                    let d = self.mul(r, lx);
                    self.mul(seed, d)
                }
            }
            OpCode::Max | OpCode::Min => {
                // The first operand wins ties, matching eval_forward.
                let sel = match (op, lhs) {
                    (OpCode::Max, true) => self.binary(OpCode::Ge, x, y),
                    (OpCode::Max, false) => self.binary(OpCode::Lt, x, y),
                    (_, true) => self.binary(OpCode::Le, x, y),
                    (_, false) => self.binary(OpCode::Gt, x, y),
                };
                self.mul(seed, sel)
            }
            OpCode::Neg => self.neg(seed),
            OpCode::Recip => {
                let rr = self.mul(r, r);
                let s = self.mul(seed, rr);
                self.neg(s)
            }
            OpCode::Sqrt => {
                let two_r = self.scale(r, 2.0);
                self.div(seed, two_r)
            }
            OpCode::Powi => {
                let n = opcode::powi_exp_decode(b);
                if n == 0 {
                    return None;
                }
                let p = self.powi(x, n - 1);
                let d = self.scale(p, n as f64);
                self.mul(seed, d)
            }
            OpCode::Exp => self.mul(seed, r),
            OpCode::Ln => self.div(seed, x),
            OpCode::Ln1p => {
                let one = self.constant(1.0);
                let d = self.add(one, x);
                self.div(seed, d)
            }
            OpCode::Log10 => {
                let d = self.scale(x, LN_10);
                self.div(seed, d)
            }
            OpCode::Sin => {
                let c = self.unary(OpCode::Cos, x);
                self.mul(seed, c)
            }
            OpCode::Cos => {
                let s = self.unary(OpCode::Sin, x);
                let d = self.mul(seed, s);
                self.neg(d)
            }
            OpCode::Tan => {
                // 1 + tan²
                let rr = self.mul(r, r);
                let one = self.constant(1.0);
                let d = self.add(one, rr);
                self.mul(seed, d)
            }
            OpCode::Tanh => {
                // 1 - tanh²
                let rr = self.mul(r, r);
                let one = self.constant(1.0);
                let d = self.sub(one, rr);
                self.mul(seed, d)
            }
            OpCode::Abs => {
                let s = self.unary(OpCode::Signum, x);
                self.mul(seed, s)
            }
            OpCode::Cast => match DType::from_code(b) {
                Some(d) if d.is_float() => seed,
                _ => return None,
            },
            OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::Signum
            | OpCode::Floor
            | OpCode::Ceil => return None,
            OpCode::Input | OpCode::Leaf | OpCode::Const | OpCode::Shared => return None,
        };
        Some(out)
    }
}

fn accumulate(g: &mut Graph, adjoint: &mut [Option<NodeId>], idx: usize, contrib: NodeId) {
    adjoint[idx] = Some(match adjoint[idx] {
        Some(prev) => g.add(prev, contrib),
        None => contrib,
    });
}
