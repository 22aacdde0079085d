//! Black-box optimizers driven by compiled autotrace objectives.
//!
//! [`fmin_cg`] and [`fmin_l_bfgs_b`] flatten a target's arguments into one
//! parameter vector with [`autotrace::VectorArgs`], minimize it, and hand
//! back arguments shaped like the originals. The solvers themselves work on
//! any [`Objective`].

pub mod adapters;
pub mod convergence;
pub mod error;
pub mod line_search;
pub mod objective;
pub mod result;
pub mod solvers;

pub use adapters::{fmin_cg, fmin_l_bfgs_b, LbfgsbInfo, LbfgsbOutput};
pub use convergence::ConvergenceParams;
pub use error::{OptimError, Result};
pub use line_search::ArmijoParams;
pub use objective::{Objective, VectorObjective};
pub use result::{OptimResult, TerminationReason};
pub use solvers::cg::{conjugate_gradient, CgConfig};
pub use solvers::lbfgsb::{lbfgsb, LbfgsbConfig};
