use std::collections::HashMap;

use crate::opcode::OpCode;

use super::{Graph, NodeId};

impl Graph {
    /// Copy the subgraph reachable from `roots` into `target`.
    ///
    /// Nodes already present in `memo` are treated as replacements: they are not
    /// copied and nothing beneath them is visited. On return `memo` maps every
    /// reachable node of `self` to its counterpart in `target`.
    pub fn clone_into(
        &self,
        roots: &[NodeId],
        target: &mut Graph,
        memo: &mut HashMap<NodeId, NodeId>,
    ) {
        let reach = self.reachable(roots, |id| memo.contains_key(&id));
        let mut storage_map: HashMap<u32, u32> = HashMap::new();

        for (i, &live) in reach.iter().enumerate() {
            let id = NodeId(i as u32);
            if !live || memo.contains_key(&id) {
                continue;
            }
            let op = self.opcodes[i];
            let [a, b] = self.args[i];
            let value = self.values[i];
            let new = match op {
                OpCode::Input => target.input(a, value),
                OpCode::Leaf => target.leaf(a, value),
                OpCode::Const => target.constant(value),
                OpCode::Shared => {
                    let storage = *storage_map
                        .entry(a)
                        .or_insert_with(|| target.register_storage(&self.storages[a as usize]));
                    target.shared(storage, b, value)
                }
                _ if op.is_binary() => {
                    target.push_op(op, memo[&NodeId(a)], memo[&NodeId(b)].0)
                }
                _ => target.push_op(op, memo[&NodeId(a)], b),
            };
            memo.insert(id, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_replaces_leaves() {
        let mut g = Graph::new();
        let x = g.leaf(0, 2.0);
        let y = g.leaf(1, 5.0);
        let xy = g.mul(x, y);
        let out = g.unary(OpCode::Exp, xy);

        let mut h = Graph::new();
        let ix = h.input(0, 2.0);
        let iy = h.input(1, 5.0);
        let mut memo = HashMap::from([(x, ix), (y, iy)]);
        g.clone_into(&[out], &mut h, &mut memo);

        let new_out = memo[&out];
        assert_eq!(h.opcode(new_out), OpCode::Exp);
        assert!(h.opcodes.iter().all(|&op| op != OpCode::Leaf));
    }

    #[test]
    fn unreachable_nodes_are_skipped() {
        let mut g = Graph::new();
        let x = g.leaf(0, 1.0);
        let _dead = g.unary(OpCode::Sin, x);
        let live = g.unary(OpCode::Cos, x);

        let mut h = Graph::new();
        let ix = h.input(0, 1.0);
        let mut memo = HashMap::from([(x, ix)]);
        g.clone_into(&[live], &mut h, &mut memo);
        assert_eq!(h.len(), 2);
    }
}
