//! Function, gradient and Hessian-vector compilers.
//!
//! Each compiler owns a [`Symbolic`] wrapper and an [`ArtifactCache`]. A call
//! binds its arguments, looks the cache key up, and on a miss traces the
//! target, derives the requested outputs from the trace graph and compiles
//! them into a [`CompiledFunction`].

use std::rc::Rc;

use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use crate::cache::{ArtifactCache, CacheKey};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId, Program};
use crate::symbolic::{BoundArgs, CallArgs, GraphInput, Symbolic, SymbolicGraph};
use crate::tensor::{check_shape, shape_len, Tensor};
use crate::trace::SymTensor;

mod function;
mod gradient;
mod hessian;

pub use self::function::Function;
pub use self::gradient::Gradient;
pub use self::hessian::HessianVector;

/// Formal input of a compiled function.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub broadcastable: Vec<bool>,
    pub default: Option<Tensor>,
}

impl From<&GraphInput> for InputSpec {
    fn from(input: &GraphInput) -> Self {
        InputSpec {
            name: input.name.clone(),
            shape: input.tensor.shape.clone(),
            dtype: input.tensor.dtype,
            broadcastable: input.tensor.broadcastable.clone(),
            default: input.default.clone(),
        }
    }
}

/// Output of a compiled function.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

/// Result of a compiled call: a single array, or several.
#[derive(Clone, Debug, PartialEq)]
pub enum Outputs {
    One(Tensor),
    Many(Vec<Tensor>),
}

impl Outputs {
    /// Unwrap a single output.
    pub fn from_vec(mut v: Vec<Tensor>) -> Self {
        if v.len() == 1 {
            if let Some(t) = v.pop() {
                return Outputs::One(t);
            }
        }
        Outputs::Many(v)
    }

    pub fn into_vec(self) -> Vec<Tensor> {
        match self {
            Outputs::One(t) => vec![t],
            Outputs::Many(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Outputs::One(_) => 1,
            Outputs::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single output, if there is exactly one.
    pub fn one(&self) -> Option<&Tensor> {
        match self {
            Outputs::One(t) => Some(t),
            Outputs::Many(v) if v.len() == 1 => v.first(),
            Outputs::Many(_) => None,
        }
    }
}

/// A compiled callable: typed inputs in, typed outputs out.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompiledFunction {
    pub(crate) program: Program,
    pub(crate) inputs: Vec<InputSpec>,
    pub(crate) outputs: Vec<OutputSpec>,
}

impl CompiledFunction {
    /// Compile `outputs` of `graph` with `inputs` occupying consecutive slots.
    pub(crate) fn build(
        graph: &Graph,
        inputs: Vec<InputSpec>,
        outputs: &[SymTensor],
    ) -> Result<Self> {
        let num_inputs = inputs.iter().map(|i| shape_len(&i.shape)).sum();
        let roots: Vec<NodeId> = outputs.iter().flat_map(|o| o.nodes.iter().copied()).collect();
        let program = graph.compile(&roots, num_inputs)?;
        debug!(
            nodes = program.len(),
            ops = program.num_ops(),
            inputs = num_inputs,
            outputs = outputs.len(),
            "compiled function"
        );
        Ok(CompiledFunction {
            program,
            inputs,
            outputs: outputs
                .iter()
                .map(|o| OutputSpec {
                    shape: o.shape.clone(),
                    dtype: o.dtype,
                })
                .collect(),
        })
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Evaluate on concrete arguments. Missing trailing arguments take their
    /// defaults; every argument must match its input's shape exactly.
    pub fn call(&self, args: &[Tensor]) -> Result<Vec<Tensor>> {
        if args.len() > self.inputs.len() {
            return Err(Error::InputCount {
                expected: self.inputs.len(),
                received: args.len(),
            });
        }
        let mut flat = Vec::with_capacity(self.program.num_inputs());
        for (i, spec) in self.inputs.iter().enumerate() {
            let arg = match (args.get(i), &spec.default) {
                (Some(a), _) => a,
                (None, Some(d)) => d,
                (None, None) => {
                    return Err(Error::InputCount {
                        expected: self.inputs.len(),
                        received: args.len(),
                    })
                }
            };
            check_shape(&spec.name, &spec.shape, arg)?;
            flat.extend(arg.data.iter().map(|&v| spec.dtype.coerce(v)));
        }

        let values = self.program.eval(&flat)?;
        let mut out = Vec::with_capacity(self.outputs.len());
        let mut offset = 0;
        for spec in &self.outputs {
            let n = shape_len(&spec.shape);
            let chunk = values[offset..offset + n].to_vec();
            let data = ArrayD::from_shape_vec(IxDyn(&spec.shape), chunk)?;
            out.push(Tensor::new(data, spec.dtype));
            offset += n;
        }
        Ok(out)
    }
}

/// Wrapper plus cache, shared by the three compilers.
#[derive(Debug)]
struct Cached {
    symbolic: Symbolic,
    cache: ArtifactCache<CompiledFunction>,
}

impl Cached {
    fn new(symbolic: Symbolic) -> Self {
        Cached {
            symbolic,
            cache: ArtifactCache::new(),
        }
    }

    fn bind(&self, call: &CallArgs) -> Result<(BoundArgs, CacheKey)> {
        let bound = self.symbolic.bind(call)?;
        let key = CacheKey::from_bound(&bound);
        Ok((bound, key))
    }

    /// Trace, build and cache unconditionally.
    fn compile<F>(
        &mut self,
        bound: BoundArgs,
        key: CacheKey,
        build: F,
    ) -> Result<Rc<CompiledFunction>>
    where
        F: FnOnce(&Symbolic, SymbolicGraph) -> Result<CompiledFunction>,
    {
        let sg = self.symbolic.get_graph_bound(bound)?;
        let compiled = build(&self.symbolic, sg)?;
        debug!(varargs = key.varargs, leaves = key.leaves.len(), "cached artifact");
        Ok(self.cache.insert(key, compiled))
    }

    fn fetch<F>(
        &mut self,
        bound: BoundArgs,
        key: CacheKey,
        build: F,
    ) -> Result<Rc<CompiledFunction>>
    where
        F: FnOnce(&Symbolic, SymbolicGraph) -> Result<CompiledFunction>,
    {
        match self.cache.get(&key) {
            Some(f) => Ok(f),
            None => self.compile(bound, key, build),
        }
    }
}

/// Resolve `wrt` to graph nodes of `sg`; an empty list selects every input.
fn wrt_nodes(
    symbolic: &Symbolic,
    sg: &SymbolicGraph,
    wrt: &[crate::symbolic::ArgRef],
) -> Result<Vec<SymTensor>> {
    if wrt.is_empty() {
        return Ok(sg.inputs.iter().map(|i| i.tensor.clone()).collect());
    }
    wrt.iter()
        .map(|r| {
            let id = symbolic.get_symbolic_arg(r.clone())?;
            let shadow = symbolic.s_vars().resolve(id)?;
            let mut nodes = Vec::with_capacity(shadow.tensor.size());
            for n in &shadow.tensor.nodes {
                match sg.equiv.get(n) {
                    Some(&m) => nodes.push(m),
                    None => return Err(Error::DisconnectedInput(id.to_string())),
                }
            }
            Ok(SymTensor::new(shadow.tensor.shape.clone(), shadow.tensor.dtype, nodes))
        })
        .collect()
}

/// Reverse-mode gradient of every scalar output with respect to every `wrt`,
/// output-major.
fn gradients(
    graph: &mut Graph,
    outputs: &[SymTensor],
    wrt: &[SymTensor],
) -> Result<Vec<Vec<SymTensor>>> {
    let wrt_flat: Vec<NodeId> = wrt.iter().flat_map(|w| w.nodes.iter().copied()).collect();
    let mut all = Vec::with_capacity(outputs.len());
    for (k, out) in outputs.iter().enumerate() {
        if out.size() != 1 {
            return Err(Error::GradRequiresScalar {
                index: k + 1,
                shape: out.shape.clone(),
            });
        }
        let flat = graph.grad(out.nodes[0], &wrt_flat);
        all.push(split_like(&flat, wrt, grad_dtype));
    }
    Ok(all)
}

fn grad_dtype(d: DType) -> DType {
    if d.is_float() {
        d
    } else {
        DType::F64
    }
}

/// Split flat nodes into tensors shaped like `like`.
fn split_like(flat: &[NodeId], like: &[SymTensor], dtype: fn(DType) -> DType) -> Vec<SymTensor> {
    let mut offset = 0;
    like.iter()
        .map(|w| {
            let n = w.size();
            let nodes = flat[offset..offset + n].to_vec();
            let t = SymTensor::new(w.shape.clone(), dtype(w.dtype), nodes);
            offset += n;
            t
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_unwrap_single() {
        let o = Outputs::from_vec(vec![Tensor::scalar(1.0)]);
        assert!(matches!(o, Outputs::One(_)));
        let o = Outputs::from_vec(vec![Tensor::scalar(1.0), Tensor::scalar(2.0)]);
        assert_eq!(o.len(), 2);
        assert!(o.one().is_none());
    }
}
