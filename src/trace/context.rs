//! Thread-local active trace.
//!
//! Tracing installs a [`TraceState`] in a thread-local slot for the duration
//! of one target call. Traced operations reach it through [`with_active`].
//! Installing a trace saves the previously active one and restores it on
//! finish or drop, so a target may call into another compiled function.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};

use ndarray::IxDyn;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::tensor::{SharedTensor, Tensor};

use super::shadow::{ObjectId, Origin, Shadow, ShadowMap, SymTensor};

static NEXT_EPOCH: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static ACTIVE: RefCell<Option<TraceState>> = const { RefCell::new(None) };
}

/// Everything recorded during one trace.
pub(crate) struct TraceState {
    pub(crate) graph: Graph,
    pub(crate) shadows: ShadowMap,
    pub(crate) borrow: Vec<SharedTensor>,
    pub(crate) float_x: Option<DType>,
    /// First error raised by an operator that could not return a `Result`.
    pub(crate) error: Option<Error>,
    num_leaves: u32,
}

impl TraceState {
    pub(crate) fn new(borrow: Vec<SharedTensor>, float_x: Option<DType>) -> Self {
        TraceState {
            graph: Graph::new(),
            shadows: ShadowMap::new(NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)),
            borrow,
            float_x,
            error: None,
            num_leaves: 0,
        }
    }

    pub(crate) fn poison(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub(crate) fn insert(&mut self, tensor: SymTensor, origin: Origin) -> ObjectId {
        self.shadows.insert(Shadow {
            tensor,
            origin,
            storage: None,
        })
    }

    pub(crate) fn tensor(&self, id: ObjectId) -> Result<&SymTensor> {
        Ok(&self.shadows.resolve(id)?.tensor)
    }

    fn normalize(&self, value: &Tensor) -> Tensor {
        match self.float_x {
            Some(fx) if value.dtype().is_float() && value.dtype() != fx => value.astype(fx),
            _ => value.clone(),
        }
    }

    /// Fresh leaves for one argument value: one leaf node per element.
    pub(crate) fn argument(&mut self, value: &Tensor, origin: Origin) -> ObjectId {
        let value = self.normalize(value);
        let mut nodes = Vec::with_capacity(value.len());
        for v in value.data.iter() {
            nodes.push(self.graph.leaf(self.num_leaves, *v));
            self.num_leaves += 1;
        }
        let tensor = SymTensor::new(value.shape().to_vec(), value.dtype(), nodes);
        self.insert(tensor, origin)
    }

    pub(crate) fn constant(&mut self, value: &Tensor) -> ObjectId {
        let nodes = self.const_nodes(value);
        let tensor = SymTensor::new(value.shape().to_vec(), value.dtype(), nodes);
        self.insert(tensor, Origin::Constant)
    }

    pub(crate) fn const_nodes(&mut self, value: &Tensor) -> Vec<NodeId> {
        value.data.iter().map(|&v| self.graph.constant(v)).collect()
    }

    /// Shadow a shared storage.
    ///
    /// Borrowed storages become `Shared` nodes that alias the storage; any
    /// other storage is copied into constants. A storage lifted twice in one
    /// trace resolves to the same shadow.
    pub(crate) fn lift(&mut self, shared: &SharedTensor) -> ObjectId {
        if let Some(id) = self.shadows.by_storage(shared) {
            return id;
        }
        let borrowed = self.borrow.iter().any(|b| b.ptr_eq(shared));
        let value = shared.get().clone();
        let (nodes, origin) = if borrowed {
            let k = self.graph.register_storage(shared);
            let nodes = value
                .data
                .iter()
                .enumerate()
                .map(|(i, &v)| self.graph.shared(k, i as u32, v))
                .collect();
            (nodes, Origin::Borrowed)
        } else {
            let value = self.normalize(&value);
            (self.const_nodes(&value), Origin::Lifted)
        };
        let dtype = match (borrowed, self.float_x) {
            (false, Some(fx)) if value.dtype().is_float() => fx,
            _ => value.dtype(),
        };
        self.shadows.insert(Shadow {
            tensor: SymTensor::new(value.shape().to_vec(), dtype, nodes),
            origin,
            storage: Some(shared.clone()),
        })
    }

    /// Stand-in returned by an operation that failed; its error is in `self.error`.
    pub(crate) fn placeholder(&mut self) -> ObjectId {
        let node = self.graph.constant(f64::NAN);
        self.insert(SymTensor::scalar(node, DType::F64), Origin::Computed("error"))
    }

    /// Trace-time value of a shadow.
    pub(crate) fn value_of(&self, id: ObjectId) -> Result<Tensor> {
        let t = self.tensor(id)?;
        let values = t.nodes.iter().map(|&n| self.graph.value(n)).collect();
        let data = ndarray::ArrayD::from_shape_vec(IxDyn(&t.shape), values)?;
        Ok(Tensor::new(data, t.dtype))
    }
}

/// Run `f` against the active trace, or return `None` when no trace is active.
pub(crate) fn with_active<R>(f: impl FnOnce(&mut TraceState) -> R) -> Option<R> {
    ACTIVE.with(|cell| cell.borrow_mut().as_mut().map(f))
}

/// Whether a trace is active on this thread.
pub fn is_tracing() -> bool {
    ACTIVE.with(|cell| cell.borrow().is_some())
}

/// RAII guard that makes a [`TraceState`] the thread's active trace.
pub(crate) struct TraceGuard {
    prev: Option<Option<TraceState>>,
}

impl TraceGuard {
    pub(crate) fn install(state: TraceState) -> Self {
        let prev = ACTIVE.with(|cell| cell.replace(Some(state)));
        TraceGuard { prev: Some(prev) }
    }

    /// Take back the recorded state and reactivate the enclosing trace.
    pub(crate) fn finish(mut self) -> Option<TraceState> {
        let prev = self.prev.take().flatten();
        ACTIVE.with(|cell| cell.replace(prev))
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            ACTIVE.with(|cell| {
                cell.replace(prev);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_enclosing_trace() {
        assert!(!is_tracing());
        let outer = TraceGuard::install(TraceState::new(Vec::new(), None));
        let outer_epoch = with_active(|st| st.shadows.epoch()).unwrap();
        {
            let inner = TraceGuard::install(TraceState::new(Vec::new(), None));
            let inner_epoch = with_active(|st| st.shadows.epoch()).unwrap();
            assert_ne!(inner_epoch, outer_epoch);
            let state = inner.finish().unwrap();
            assert_eq!(state.shadows.epoch(), inner_epoch);
        }
        assert_eq!(with_active(|st| st.shadows.epoch()), Some(outer_epoch));
        drop(outer);
        assert!(!is_tracing());
    }

    #[test]
    fn lifting_twice_returns_same_shadow() {
        let guard = TraceGuard::install(TraceState::new(Vec::new(), None));
        let s = SharedTensor::new(Tensor::vector(&[1.0, 2.0]));
        let (a, b) = with_active(|st| (st.lift(&s), st.lift(&s))).unwrap();
        assert_eq!(a, b);
        drop(guard);
    }

    #[test]
    fn first_error_wins() {
        let mut st = TraceState::new(Vec::new(), None);
        st.poison(Error::MissingVectors);
        st.poison(Error::NoOutputsRequested);
        assert!(matches!(st.error, Some(Error::MissingVectors)));
    }
}
