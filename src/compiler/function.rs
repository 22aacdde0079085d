use std::rc::Rc;

use crate::cache::CacheKey;
use crate::error::Result;
use crate::symbolic::{CallArgs, Symbolic};

use super::{Cached, CompiledFunction, InputSpec, Outputs};

/// Compiles the traced results of a target closure.
#[derive(Debug)]
pub struct Function {
    inner: Cached,
}

impl Function {
    pub fn new(symbolic: Symbolic) -> Self {
        Function {
            inner: Cached::new(symbolic),
        }
    }

    pub fn cache_id(&self, call: &CallArgs) -> Result<CacheKey> {
        Ok(self.inner.bind(call)?.1)
    }

    pub fn compile_function(&mut self, call: &CallArgs) -> Result<Rc<CompiledFunction>> {
        let (bound, key) = self.inner.bind(call)?;
        self.inner.compile(bound, key, build)
    }

    /// Evaluate, compiling on the first call with a new cache key.
    pub fn call(&mut self, call: &CallArgs) -> Result<Outputs> {
        let (bound, key) = self.inner.bind(call)?;
        let args = bound.values();
        let f = self.inner.fetch(bound, key, build)?;
        Ok(Outputs::from_vec(f.call(&args)?))
    }

    /// The cached callable for `call`, compiled on a miss.
    pub fn get_function(&mut self, call: &CallArgs) -> Result<Rc<CompiledFunction>> {
        let (bound, key) = self.inner.bind(call)?;
        self.inner.fetch(bound, key, build)
    }

    pub fn compile_count(&self) -> usize {
        self.inner.cache.compile_count()
    }

    pub fn symbolic(&self) -> &Symbolic {
        &self.inner.symbolic
    }
}

fn build(_: &Symbolic, sg: crate::symbolic::SymbolicGraph) -> Result<CompiledFunction> {
    let inputs = sg.inputs.iter().map(InputSpec::from).collect();
    CompiledFunction::build(&sg.graph, inputs, &sg.outputs)
}
