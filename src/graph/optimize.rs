use std::collections::HashMap;

use crate::opcode::{OpCode, UNUSED};

use super::Program;

impl Program {
    /// Eliminate entries unreachable from the outputs.
    ///
    /// Walks backward from the outputs, marks reachable entries, then compacts
    /// in place with an index remap. Inputs are never removed, so input slots
    /// keep their meaning.
    fn dead_code_elimination(&mut self) {
        let n = self.opcodes.len();
        let mut reachable = vec![false; n];
        for (i, &op) in self.opcodes.iter().enumerate() {
            if op == OpCode::Input {
                reachable[i] = true;
            }
        }

        let mut stack: Vec<u32> = self.outputs.clone();
        while let Some(idx) = stack.pop() {
            let i = idx as usize;
            if reachable[i] {
                continue;
            }
            reachable[i] = true;
            let op = self.opcodes[i];
            if op.is_structural() {
                continue;
            }
            let [a, b] = self.args[i];
            stack.push(a);
            if op.is_binary() {
                stack.push(b);
            }
        }

        let mut remap = vec![UNUSED; n];
        let mut write = 0usize;
        for read in 0..n {
            if !reachable[read] {
                continue;
            }
            let op = self.opcodes[read];
            let [a, b] = self.args[read];
            let args = if op.is_structural() {
                [a, b]
            } else if op.is_binary() {
                [remap[a as usize], remap[b as usize]]
            } else {
                [remap[a as usize], b]
            };
            self.opcodes[write] = op;
            self.values[write] = self.values[read];
            self.args[write] = args;
            remap[read] = write as u32;
            write += 1;
        }
        self.opcodes.truncate(write);
        self.args.truncate(write);
        self.values.truncate(write);
        for o in &mut self.outputs {
            *o = remap[*o as usize];
        }
    }

    /// Common subexpression elimination.
    ///
    /// Deduplicates identical `(OpCode, arg0, arg1)` triples, normalising
    /// argument order for commutative ops, and merges equal constants.
    /// Finishes with a DCE pass to remove the now-dead duplicates.
    fn cse(&mut self) {
        let n = self.opcodes.len();
        let mut seen: HashMap<(OpCode, u32, u32), u32> = HashMap::new();
        let mut consts: HashMap<u64, u32> = HashMap::new();
        let mut remap: Vec<u32> = (0..n as u32).collect();

        for i in 0..n {
            let op = self.opcodes[i];
            let [a, b] = self.args[i];
            let key = match op {
                OpCode::Input => continue,
                OpCode::Const => {
                    let canonical = *consts.entry(self.values[i].to_bits()).or_insert(i as u32);
                    remap[i] = canonical;
                    continue;
                }
                OpCode::Shared => (op, a, b),
                _ if op.is_binary() => {
                    let (ra, rb) = (remap[a as usize], remap[b as usize]);
                    self.args[i] = [ra, rb];
                    if op.is_commutative() && rb < ra {
                        (op, rb, ra)
                    } else {
                        (op, ra, rb)
                    }
                }
                _ => {
                    let ra = remap[a as usize];
                    self.args[i] = [ra, b];
                    (op, ra, b)
                }
            };
            match seen.get(&key) {
                Some(&canonical) => remap[i] = canonical,
                None => {
                    seen.insert(key, i as u32);
                }
            }
        }

        for o in &mut self.outputs {
            *o = remap[*o as usize];
        }
        self.dead_code_elimination();
    }

    /// Run all program optimizations: CSE followed by DCE.
    pub(crate) fn optimize(&mut self) {
        self.cse();
        #[cfg(debug_assertions)]
        self.validate();
    }

    #[cfg(debug_assertions)]
    fn validate(&self) {
        for (i, (&op, &[a, b])) in self.opcodes.iter().zip(&self.args).enumerate() {
            if op.is_structural() {
                continue;
            }
            debug_assert!((a as usize) < i, "node {i} reads forward operand {a}");
            if op.is_binary() {
                debug_assert!((b as usize) < i, "node {i} reads forward operand {b}");
            }
        }
    }
}
