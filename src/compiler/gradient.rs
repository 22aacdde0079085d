use std::rc::Rc;

use crate::cache::CacheKey;
use crate::error::Result;
use crate::symbolic::{ArgRef, CallArgs, Symbolic, SymbolicGraph};

use super::{gradients, wrt_nodes, Cached, CompiledFunction, InputSpec, Outputs};

/// Compiles the gradient of each scalar result with respect to selected
/// arguments.
#[derive(Debug)]
pub struct Gradient {
    inner: Cached,
    wrt: Vec<ArgRef>,
}

impl Gradient {
    /// `wrt` empty differentiates with respect to every argument.
    pub fn new(symbolic: Symbolic, wrt: Vec<ArgRef>) -> Self {
        Gradient {
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

    pub fn call(&mut self, call: &CallArgs) -> Result<Outputs> {
        let (bound, key) = self.inner.bind(call)?;
        let args = bound.values();
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

    pub fn wrt(&self) -> &[ArgRef] {
        &self.wrt
    }
}

fn build(symbolic: &Symbolic, mut sg: SymbolicGraph, wrt: &[ArgRef]) -> Result<CompiledFunction> {
    let wrt = wrt_nodes(symbolic, &sg, wrt)?;
    let grads = gradients(&mut sg.graph, &sg.outputs, &wrt)?;
    let outputs: Vec<_> = grads.into_iter().flatten().collect();
    let inputs = sg.inputs.iter().map(InputSpec::from).collect();
    CompiledFunction::build(&sg.graph, inputs, &outputs)
}
