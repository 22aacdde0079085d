use super::grad::Side;
use super::{Graph, NodeId};

impl Graph {
    /// Directional derivative (R-operator) of `outputs` along `directions`.
    ///
    /// Perturbs each `wrt[k]` by `directions[k]` and propagates tangents forward
    /// through every node up to the last output. Applied to gradient nodes this
    /// is a Hessian-vector product that never materialises the Hessian.
    ///
    /// Outputs that do not depend on any `wrt` node get a constant zero.
    pub fn rop(
        &mut self,
        outputs: &[NodeId],
        wrt: &[NodeId],
        directions: &[NodeId],
    ) -> Vec<NodeId> {
        debug_assert_eq!(wrt.len(), directions.len());
        let limit = outputs.iter().map(|o| o.index() + 1).max().unwrap_or(0);
        let mut tangent: Vec<Option<NodeId>> = vec![None; limit];
        let mut seeded = vec![false; limit];

        for (w, &d) in wrt.iter().zip(directions) {
            let i = w.index();
            if i >= limit {
                continue;
            }
            tangent[i] = Some(match tangent[i] {
                Some(prev) => self.add(prev, d),
                None => d,
            });
            seeded[i] = true;
        }

        for i in 0..limit {
            if seeded[i] {
                continue;
            }
            let op = self.opcodes[i];
            if op.is_structural() || op.is_locally_constant() {
                continue;
            }
            let [a, b] = self.args[i];
            let node = NodeId(i as u32);
            let ta = tangent[a as usize];
            let tb = if op.is_binary() {
                tangent[b as usize]
            } else {
                None
            };
            let ca = ta.and_then(|t| self.chain(node, Side::Lhs, t));
            let cb = tb.and_then(|t| self.chain(node, Side::Rhs, t));
            tangent[i] = match (ca, cb) {
                (Some(x), Some(y)) => Some(self.add(x, y)),
                (x, None) => x,
                (None, y) => y,
            };
        }

        outputs
            .iter()
            .map(|o| tangent[o.index()].unwrap_or_else(|| self.constant(0.0)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    #[test]
    fn hessian_vector_of_cubic() {
        // f = x³ y, ∇f = (3x²y, x³), H = [[6xy, 3x²], [3x², 0]]
        let mut g = Graph::new();
        let x = g.leaf(0, 2.0);
        let y = g.leaf(1, 5.0);
        let x3 = g.powi(x, 3);
        let f = g.mul(x3, y);
        let grads = g.grad(f, &[x, y]);
        let v0 = g.input(0, 1.0);
        let v1 = g.input(1, -1.0);
        let hv = g.rop(&grads, &[x, y], &[v0, v1]);
        // H·v = (6xy - 3x², 3x²) = (60 - 12, 12)
        assert_eq!(g.value(hv[0]), 48.0);
        assert_eq!(g.value(hv[1]), 12.0);
    }

    #[test]
    fn constant_output_has_zero_tangent() {
        let mut g = Graph::new();
        let x = g.leaf(0, 1.0);
        let k = g.constant(3.0);
        let e = g.unary(OpCode::Exp, x);
        let v = g.input(0, 1.0);
        let t = g.rop(&[k, e], &[x], &[v]);
        assert_eq!(g.value(t[0]), 0.0);
        assert_eq!(g.value(t[1]), 1f64.exp());
    }
}
