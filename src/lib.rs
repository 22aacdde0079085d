//! Trace ordinary numeric closures into cached symbolic graphs.
//!
//! A target closure reads its arguments through a [`Frame`] and computes
//! with [`Var`] handles. [`Symbolic`] runs it once on concrete values and
//! records a scalar-node [`Graph`]; the compilers turn that graph into cached
//! [`CompiledFunction`]s for values, gradients and Hessian-vector products,
//! and [`VectorArgs`] exposes the same derivatives over one flat parameter
//! vector for black-box optimizers.

pub mod api;
pub mod cache;
pub mod compiler;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod opcode;
pub mod symbolic;
pub mod tensor;
pub mod trace;
pub mod vector;

#[cfg(feature = "serde")]
mod serde_support;

pub use api::{evaluate, function, gradient, hessian_vector, vector_args};
pub use cache::{ArtifactCache, CacheKey, LeafSignature};
pub use compiler::{
    CompiledFunction, Function, Gradient, HessianVector, InputSpec, OutputSpec, Outputs,
};
pub use dtype::DType;
pub use error::{Error, Result};
pub use graph::{Graph, NodeId, Program};
pub use opcode::OpCode;
pub use symbolic::{
    Arg, ArgRef, ArgShadow, CallArgs, Returns, Signature, Symbolic, SymbolicConfig, SymbolicGraph,
};
pub use tensor::{SharedTensor, Tensor};
pub use trace::{is_tracing, Frame, ObjectId, Operand, SymTensor, TensorOp, Var};
pub use vector::{LayoutEntry, ParamLayout, VectorArgs, VectorMode};
