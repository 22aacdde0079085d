use crate::error::{Error, Result};
use crate::opcode::{self, OpCode, UNUSED};
use crate::tensor::SharedTensor;

use super::{Graph, NodeId};

/// A compacted, optimized graph that maps flat input values to flat outputs.
///
/// Produced by [`Graph::compile`]. Inputs are read by position; borrowed
/// storages are read on every call.
#[derive(Clone, Debug)]
pub struct Program {
    pub(crate) opcodes: Vec<OpCode>,
    pub(crate) args: Vec<[u32; 2]>,
    pub(crate) values: Vec<f64>,
    pub(crate) storages: Vec<SharedTensor>,
    pub(crate) num_inputs: usize,
    pub(crate) outputs: Vec<u32>,
}

impl Graph {
    /// Compile the subgraph computing `outputs` into a [`Program`] taking
    /// `num_inputs` flat inputs.
    ///
    /// Fails if a live node is still an unsubstituted trace leaf, or reads an
    /// input slot beyond `num_inputs`.
    pub fn compile(&self, outputs: &[NodeId], num_inputs: usize) -> Result<Program> {
        let reach = self.reachable(outputs, |_| false);
        let n = self.len();

        let mut remap = vec![UNUSED; n];
        let mut storage_remap = vec![UNUSED; self.storages.len()];
        let mut prog = Program {
            opcodes: Vec::new(),
            args: Vec::new(),
            values: Vec::new(),
            storages: Vec::new(),
            num_inputs,
            outputs: Vec::with_capacity(outputs.len()),
        };

        for i in (0..n).filter(|&i| reach[i]) {
            let op = self.opcodes[i];
            let [a, b] = self.args[i];
            let args = match op {
                OpCode::Leaf => return Err(Error::FreeLeaf(i as u32)),
                OpCode::Input => {
                    if a as usize >= num_inputs {
                        return Err(Error::Lowering(format!(
                            "input slot {a} is outside a program with {num_inputs} inputs"
                        )));
                    }
                    [a, UNUSED]
                }
                OpCode::Const => [UNUSED, UNUSED],
                OpCode::Shared => {
                    let slot = &mut storage_remap[a as usize];
                    if *slot == UNUSED {
                        *slot = prog.storages.len() as u32;
                        prog.storages.push(self.storages[a as usize].clone());
                    }
                    [*slot, b]
                }
                _ if op.is_binary() => [remap[a as usize], remap[b as usize]],
                _ => [remap[a as usize], b],
            };
            remap[i] = prog.opcodes.len() as u32;
            prog.opcodes.push(op);
            prog.args.push(args);
            prog.values.push(self.values[i]);
        }
        prog.outputs = outputs.iter().map(|o| remap[o.index()]).collect();
        prog.optimize();
        Ok(prog)
    }
}

impl Program {
    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Total number of nodes, including inputs and constants.
    #[inline]
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Number of non-structural nodes.
    pub fn num_ops(&self) -> usize {
        self.opcodes.iter().filter(|op| !op.is_structural()).count()
    }

    pub fn opcodes(&self) -> &[OpCode] {
        &self.opcodes
    }

    /// Whether the program reads borrowed storage at call time.
    pub fn reads_borrowed(&self) -> bool {
        !self.storages.is_empty()
    }

    /// Evaluate at `inputs`, returning one value per output.
    pub fn eval(&self, inputs: &[f64]) -> Result<Vec<f64>> {
        if inputs.len() != self.num_inputs {
            return Err(Error::InputCount {
                expected: self.num_inputs,
                received: inputs.len(),
            });
        }
        let storages: Vec<_> = self.storages.iter().map(|s| s.get()).collect();
        let mut vals = vec![0.0f64; self.opcodes.len()];
        for i in 0..self.opcodes.len() {
            let op = self.opcodes[i];
            let [a, b] = self.args[i];
            vals[i] = match op {
                OpCode::Input => inputs[a as usize],
                OpCode::Const => self.values[i],
                OpCode::Shared => {
                    let t = &storages[a as usize];
                    t.flat_get(b as usize).ok_or(Error::BorrowedShapeChanged {
                        offset: b as usize,
                        len: t.len(),
                    })?
                }
                OpCode::Leaf => return Err(Error::FreeLeaf(i as u32)),
                _ if op.is_binary() => {
                    opcode::eval_forward(op, vals[a as usize], vals[b as usize])
                }
                _ => opcode::eval_forward(op, vals[a as usize], opcode::slot_operand(op, b)),
            };
        }
        Ok(self.outputs.iter().map(|&o| vals[o as usize]).collect())
    }
}
