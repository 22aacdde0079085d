//! Trace oracle: runs a target closure once on concrete values and records
//! a shadow for every array it touches.

mod context;
mod frame;
mod lower;
mod ops;
mod shadow;
mod var;

pub use self::context::is_tracing;
pub use self::frame::Frame;
pub use self::lower::{Reduction, TensorOp};
pub use self::shadow::{ObjectId, Origin, Shadow, ShadowMap, SymTensor};
pub use self::var::{Operand, Var};

pub(crate) use self::context::{with_active, TraceGuard, TraceState};
