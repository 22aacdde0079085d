use std::rc::Rc;

use crate::cache::CacheKey;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::symbolic::{ArgRef, CallArgs, Symbolic, SymbolicGraph};

use super::{
    grad_dtype, gradients, split_like, wrt_nodes, Cached, CompiledFunction, InputSpec, Outputs,
};

/// Compiles Hessian-vector products of each scalar result.
///
/// The compiled function takes the call arguments followed by one direction
/// per `wrt` variable, shaped like that variable, and returns `H v` without
/// forming the Hessian.
#[derive(Debug)]
pub struct HessianVector {
    inner: Cached,
    wrt: Vec<ArgRef>,
}

impl HessianVector {
    /// `wrt` empty differentiates with respect to every argument.
    pub fn new(symbolic: Symbolic, wrt: Vec<ArgRef>) -> Self {
        HessianVector {
            inner: Cached::new(symbolic),
            wrt,
        }
    }

    pub fn cache_id(&self, call: &CallArgs) -> Result<CacheKey> {
        Ok(self.inner.bind(call)?.1)
    }

    pub fn compile_function(&mut self, call: &CallArgs) -> Result<Rc<CompiledFunction>> {
        let (bound, key) = self.inner.bind(call)?;
        let wrt = &self.wrt;
        self.inner.compile(bound, key, |s, sg| build(s, sg, wrt))
    }

    /// Evaluate at the call arguments along `call.vectors`.
    pub fn call(&mut self, call: &CallArgs) -> Result<Outputs> {
        let vectors = call.vectors.as_ref().ok_or(Error::MissingVectors)?;
        let (bound, key) = self.inner.bind(call)?;
        let expected = if self.wrt.is_empty() {
            bound.entries().len()
        } else {
            self.wrt.len()
        };
        if vectors.len() != expected {
            return Err(Error::VectorCountMismatch {
                expected,
                received: vectors.len(),
            });
        }
        let mut args = bound.values();
        args.extend(vectors.iter().cloned());
        let wrt = &self.wrt;
        let f = self.inner.fetch(bound, key, |s, sg| build(s, sg, wrt))?;
        Ok(Outputs::from_vec(f.call(&args)?))
    }

    /// The cached callable for `call`, compiled on a miss.
    pub fn get_function(&mut self, call: &CallArgs) -> Result<Rc<CompiledFunction>> {
        let (bound, key) = self.inner.bind(call)?;
        let wrt = &self.wrt;
        self.inner.fetch(bound, key, |s, sg| build(s, sg, wrt))
    }

    pub fn compile_count(&self) -> usize {
        self.inner.cache.compile_count()
    }

    pub fn symbolic(&self) -> &Symbolic {
        &self.inner.symbolic
    }
}

fn build(symbolic: &Symbolic, mut sg: SymbolicGraph, wrt: &[ArgRef]) -> Result<CompiledFunction> {
    let wrt = wrt_nodes(symbolic, &sg, wrt)?;
    let grads = gradients(&mut sg.graph, &sg.outputs, &wrt)?;

    let mut inputs: Vec<InputSpec> = sg.inputs.iter().map(InputSpec::from).collect();
    let mut slot = sg.num_slots as u32;
    let mut directions: Vec<NodeId> = Vec::new();
    for (k, w) in wrt.iter().enumerate() {
        for _ in 0..w.size() {
            directions.push(sg.graph.input(slot, 0.0));
            slot += 1;
        }
        inputs.push(InputSpec {
            name: format!("_vectors[{k}]"),
            shape: w.shape.clone(),
            dtype: grad_dtype(w.dtype),
            broadcastable: vec![false; w.ndim()],
            default: None,
        });
    }

    let wrt_flat: Vec<NodeId> = wrt.iter().flat_map(|w| w.nodes.iter().copied()).collect();
    let mut outputs = Vec::new();
    for per_output in &grads {
        let flat: Vec<NodeId> = per_output.iter().flat_map(|g| g.nodes.iter().copied()).collect();
        let hv = sg.graph.rop(&flat, &wrt_flat, &directions);
        outputs.extend(split_like(&hv, &wrt, grad_dtype));
    }
    CompiledFunction::build(&sg.graph, inputs, &outputs)
}
