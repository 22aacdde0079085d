//! Flat parameter-vector calling convention.
//!
//! [`VectorArgs`] compiles a target once, with every argument element read
//! from a single flat `theta` vector, so black-box optimizers can drive it.
//! [`ParamLayout`] records how `theta` maps back onto the arguments.

use std::rc::Rc;

use ndarray::{Array1, ArrayD, IxDyn};

use crate::compiler::{CompiledFunction, InputSpec, Outputs};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::symbolic::{CallArgs, Symbolic, SymbolicGraph};
use crate::tensor::{check_shape, shape_len, Tensor};
use crate::trace::SymTensor;

/// Placement of one argument inside the flat vector.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutEntry {
    pub name: String,
    pub offset: usize,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub broadcastable: Vec<bool>,
}

impl LayoutEntry {
    pub fn len(&self) -> usize {
        shape_len(&self.shape)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered layout of arguments in a flat parameter vector.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParamLayout {
    entries: Vec<LayoutEntry>,
    len: usize,
}

impl ParamLayout {
    /// Layout of `tensors` in order, named `arg{i}`.
    pub fn from_tensors(tensors: &[Tensor]) -> Self {
        let mut layout = ParamLayout::default();
        for (i, t) in tensors.iter().enumerate() {
            layout.push(format!("arg{i}"), t.shape().to_vec(), t.dtype(), t.broadcastable());
        }
        layout
    }

    fn from_graph(sg: &SymbolicGraph) -> Self {
        let mut layout = ParamLayout::default();
        for input in &sg.inputs {
            let t = &input.tensor;
            layout.push(input.name.clone(), t.shape.clone(), t.dtype, t.broadcastable.clone());
        }
        layout
    }

    fn push(&mut self, name: String, shape: Vec<usize>, dtype: DType, broadcastable: Vec<bool>) {
        let entry = LayoutEntry {
            name,
            offset: self.len,
            shape,
            dtype,
            broadcastable,
        };
        self.len += entry.len();
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Total number of scalars.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Concatenate `args` row-major; every argument must match its entry's shape.
    pub fn flatten(&self, args: &[Tensor]) -> Result<Array1<f64>> {
        if args.len() != self.entries.len() {
            return Err(Error::InputCount {
                expected: self.entries.len(),
                received: args.len(),
            });
        }
        let mut out = Vec::with_capacity(self.len);
        for (entry, arg) in self.entries.iter().zip(args) {
            check_shape(&entry.name, &entry.shape, arg)?;
            out.extend(arg.data().iter().copied());
        }
        Ok(Array1::from(out))
    }

    /// Split `theta` back into arrays with each entry's shape and dtype.
    pub fn unflatten(&self, theta: &[f64]) -> Result<Vec<Tensor>> {
        if theta.len() != self.len {
            return Err(Error::VectorLength {
                expected: self.len,
                received: theta.len(),
            });
        }
        self.entries
            .iter()
            .map(|e| -> Result<Tensor> {
                let values = theta[e.offset..e.offset + e.len()].to_vec();
                let data = ArrayD::from_shape_vec(IxDyn(&e.shape), values)?;
                Ok(Tensor::new(data, e.dtype))
            })
            .collect()
    }
}

/// Which outputs a [`VectorArgs`] computes, in the fixed order value,
/// gradient, Hessian-vector product.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VectorMode {
    pub value: bool,
    pub gradient: bool,
    pub hessian_vector: bool,
}

impl VectorMode {
    pub const VALUE: VectorMode = VectorMode {
        value: true,
        gradient: false,
        hessian_vector: false,
    };

    pub const VALUE_AND_GRAD: VectorMode = VectorMode {
        value: true,
        gradient: true,
        hessian_vector: false,
    };

    pub const ALL: VectorMode = VectorMode {
        value: true,
        gradient: true,
        hessian_vector: true,
    };

    pub fn with_value(mut self) -> Self {
        self.value = true;
        self
    }

    pub fn with_gradient(mut self) -> Self {
        self.gradient = true;
        self
    }

    pub fn with_hessian_vector(mut self) -> Self {
        self.hessian_vector = true;
        self
    }

    fn any(self) -> bool {
        self.value || self.gradient || self.hessian_vector
    }
}

/// A target compiled against a single flat parameter vector.
///
/// Compilation happens once, from the initial arguments; their shapes and
/// the control-flow path of that trace are fixed from then on.
#[derive(Debug)]
pub struct VectorArgs {
    symbolic: Symbolic,
    mode: VectorMode,
    layout: ParamLayout,
    initial: Vec<Tensor>,
    compiled: Rc<CompiledFunction>,
}

impl VectorArgs {
    pub fn new(mut symbolic: Symbolic, call: &CallArgs, mode: VectorMode) -> Result<Self> {
        if !mode.any() {
            return Err(Error::NoOutputsRequested);
        }
        let bound = symbolic.bind(call)?;
        let initial = bound.values();

        let mut theta: Vec<NodeId> = Vec::new();
        let mut sg = symbolic.get_graph_with(bound, |g, slot, value, dtype| {
            let input = g.input(slot, value);
            theta.push(input);
            g.cast(input, dtype)
        })?;
        let layout = ParamLayout::from_graph(&sg);
        let n = layout.len();

        let out = sg
            .outputs
            .first()
            .cloned()
            .ok_or_else(|| Error::target("target function returned no results"))?;

        let mut outputs: Vec<SymTensor> = Vec::with_capacity(3);
        if mode.value {
            outputs.push(out.clone());
        }
        let mut inputs = vec![flat_input("theta", n)];
        if mode.gradient || mode.hessian_vector {
            if out.size() != 1 {
                return Err(Error::GradRequiresScalar {
                    index: 1,
                    shape: out.shape.clone(),
                });
            }
            let grad = sg.graph.grad(out.nodes[0], &theta);
            if mode.gradient {
                outputs.push(SymTensor::new(vec![n], DType::F64, grad.clone()));
            }
            if mode.hessian_vector {
                let directions: Vec<NodeId> = (0..n)
                    .map(|k| sg.graph.input((n + k) as u32, 0.0))
                    .collect();
                let hv = sg.graph.rop(&grad, &theta, &directions);
                outputs.push(SymTensor::new(vec![n], DType::F64, hv));
                inputs.push(flat_input("_vectors", n));
            }
        }

        let compiled = Rc::new(CompiledFunction::build(&sg.graph, inputs, &outputs)?);
        Ok(VectorArgs {
            symbolic,
            mode,
            layout,
            initial,
            compiled,
        })
    }

    /// Concatenate `args` into one flat vector, row-major.
    pub fn vector_from_args(args: &[Tensor]) -> Array1<f64> {
        args.iter().flat_map(|t| t.data().iter().copied()).collect()
    }

    /// Split `theta` into arrays shaped and typed like `orig`.
    pub fn args_from_vector(theta: &[f64], orig: &[Tensor]) -> Result<Vec<Tensor>> {
        ParamLayout::from_tensors(orig).unflatten(theta)
    }

    /// Split `theta` using the layout fixed at compilation.
    pub fn args_from_layout(&self, theta: &[f64]) -> Result<Vec<Tensor>> {
        self.layout.unflatten(theta)
    }

    /// The initial arguments, flattened.
    pub fn initial_vector(&self) -> Array1<f64> {
        Self::vector_from_args(&self.initial)
    }

    pub fn initial_args(&self) -> &[Tensor] {
        &self.initial
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn mode(&self) -> VectorMode {
        self.mode
    }

    pub fn compiled(&self) -> &Rc<CompiledFunction> {
        &self.compiled
    }

    pub fn symbolic(&self) -> &Symbolic {
        &self.symbolic
    }

    /// Evaluate every requested output at `theta`. `direction` is required
    /// exactly when Hessian-vector products were compiled.
    pub fn call(&self, theta: &[f64], direction: Option<&[f64]>) -> Result<Outputs> {
        let n = self.layout.len();
        if theta.len() != n {
            return Err(Error::VectorLength {
                expected: n,
                received: theta.len(),
            });
        }
        let mut args = vec![Tensor::vector(theta)];
        match (self.mode.hessian_vector, direction) {
            (true, None) => return Err(Error::MissingVectors),
            (false, Some(_)) => return Err(Error::UnexpectedDirection),
            (true, Some(d)) if d.len() != n => {
                return Err(Error::VectorLength {
                    expected: n,
                    received: d.len(),
                })
            }
            (true, Some(d)) => args.push(Tensor::vector(d)),
            (false, None) => {}
        }
        Ok(Outputs::from_vec(self.compiled.call(&args)?))
    }

    /// Output `which` (0 value, 1 gradient, 2 Hessian-vector product).
    fn output(&self, theta: &[f64], direction: Option<&[f64]>, which: usize) -> Result<Tensor> {
        let flags = [self.mode.value, self.mode.gradient, self.mode.hessian_vector];
        if !flags[which] {
            return Err(Error::NoOutputsRequested);
        }
        let index = flags[..which].iter().filter(|&&f| f).count();
        let zeros;
        let direction = match direction {
            None if self.mode.hessian_vector => {
                zeros = vec![0.0; self.layout.len()];
                Some(zeros.as_slice())
            }
            d => d,
        };
        let mut outs = self.call(theta, direction)?.into_vec();
        Ok(outs.swap_remove(index))
    }

    pub fn value(&self, theta: &[f64]) -> Result<Tensor> {
        self.output(theta, None, 0)
    }

    pub fn gradient(&self, theta: &[f64]) -> Result<Array1<f64>> {
        Ok(Array1::from(self.output(theta, None, 1)?.to_vec()))
    }

    /// Scalar value and gradient in one evaluation.
    pub fn value_and_grad(&self, theta: &[f64]) -> Result<(f64, Array1<f64>)> {
        if !(self.mode.value && self.mode.gradient) {
            return Err(Error::NoOutputsRequested);
        }
        let direction = self.mode.hessian_vector.then(|| vec![0.0; self.layout.len()]);
        let outs = self.call(theta, direction.as_deref())?.into_vec();
        let value = outs[0].as_scalar().ok_or_else(|| Error::GradRequiresScalar {
            index: 1,
            shape: outs[0].shape().to_vec(),
        })?;
        Ok((value, Array1::from(outs[1].to_vec())))
    }

    pub fn hessian_vector(&self, theta: &[f64], direction: &[f64]) -> Result<Array1<f64>> {
        Ok(Array1::from(self.output(theta, Some(direction), 2)?.to_vec()))
    }
}

fn flat_input(name: &str, n: usize) -> InputSpec {
    InputSpec {
        name: name.to_string(),
        shape: vec![n],
        dtype: DType::F64,
        broadcastable: vec![false],
        default: None,
    }
}
