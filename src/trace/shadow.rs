//! Shadows and the identity shadow map.

use std::collections::HashMap;
use std::fmt;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::tensor::{shape_len, SharedTensor};

/// Stable handle of a traced object.
///
/// Handles are arena indices stamped with the epoch of the trace that issued
/// them, so a handle can never resolve to an unrelated object from another
/// trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub(crate) epoch: u32,
    pub(crate) index: u32,
}

impl ObjectId {
    /// Handle of values produced outside any trace. Never resolves.
    pub(crate) const DETACHED: ObjectId = ObjectId {
        epoch: 0,
        index: u32::MAX,
    };

    pub fn epoch(self) -> u32 {
        self.epoch
    }

    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.epoch, self.index)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Symbolic stand-in for an array: one graph node per element, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct SymTensor {
    pub(crate) shape: Vec<usize>,
    pub(crate) dtype: DType,
    pub(crate) broadcastable: Vec<bool>,
    pub(crate) nodes: Vec<NodeId>,
}

impl SymTensor {
    pub(crate) fn new(shape: Vec<usize>, dtype: DType, nodes: Vec<NodeId>) -> Self {
        debug_assert_eq!(shape_len(&shape), nodes.len());
        let broadcastable = shape.iter().map(|&d| d == 1).collect();
        SymTensor {
            shape,
            dtype,
            broadcastable,
            nodes,
        }
    }

    pub(crate) fn scalar(node: NodeId, dtype: DType) -> Self {
        SymTensor::new(Vec::new(), dtype, vec![node])
    }

    /// Replace the broadcast pattern. Only dimensions of length one may be broadcastable.
    pub(crate) fn with_broadcastable(mut self, pattern: &[bool]) -> Self {
        if pattern.len() == self.shape.len() {
            self.broadcastable = pattern
                .iter()
                .zip(&self.shape)
                .map(|(&b, &d)| b && d == 1)
                .collect();
        }
        self
    }

    pub(crate) fn map_nodes(&self, mut f: impl FnMut(NodeId) -> NodeId) -> Self {
        SymTensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            broadcastable: self.broadcastable.clone(),
            nodes: self.nodes.iter().map(|&n| f(n)).collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn broadcastable(&self) -> &[bool] {
        &self.broadcastable
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }
}

/// Where a shadow came from.
#[derive(Clone, Debug, PartialEq)]
pub enum Origin {
    Argument(String),
    VarargItem { name: String, index: usize },
    Constant,
    /// Aliases borrowed storage.
    Borrowed,
    /// Snapshot of shared storage that was not borrowed.
    Lifted,
    /// Result of a traced operation.
    Computed(&'static str),
}

/// A traced object's symbolic placeholder.
#[derive(Clone, Debug)]
pub struct Shadow {
    pub(crate) tensor: SymTensor,
    pub(crate) origin: Origin,
    /// Storage kept alive for the lifetime of the map.
    pub(crate) storage: Option<SharedTensor>,
}

impl Shadow {
    pub fn tensor(&self) -> &SymTensor {
        &self.tensor
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

/// Identity shadow map: handle → shadow, in insertion order.
///
/// Rebuilt fresh on every trace. Storages seen during the trace are held by
/// their shadows, so their identities stay unique while the map is alive.
#[derive(Clone, Debug, Default)]
pub struct ShadowMap {
    epoch: u32,
    shadows: Vec<Shadow>,
    by_storage: HashMap<usize, ObjectId>,
}

impl ShadowMap {
    pub(crate) fn new(epoch: u32) -> Self {
        ShadowMap {
            epoch,
            shadows: Vec::new(),
            by_storage: HashMap::new(),
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    pub(crate) fn insert(&mut self, shadow: Shadow) -> ObjectId {
        let id = ObjectId {
            epoch: self.epoch,
            index: self.shadows.len() as u32,
        };
        if let Some(storage) = &shadow.storage {
            self.by_storage.entry(storage.key()).or_insert(id);
        }
        self.shadows.push(shadow);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&Shadow> {
        if id.epoch != self.epoch || self.epoch == 0 {
            return None;
        }
        self.shadows.get(id.index as usize)
    }

    pub(crate) fn resolve(&self, id: ObjectId) -> Result<&Shadow> {
        self.get(id).ok_or_else(|| Error::StaleHandle(id.to_string()))
    }

    /// Shadow of a shared storage seen during the trace.
    pub fn by_storage(&self, storage: &SharedTensor) -> Option<ObjectId> {
        self.by_storage.get(&storage.key()).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Shadow)> + '_ {
        let epoch = self.epoch;
        self.shadows.iter().enumerate().map(move |(i, s)| {
            (
                ObjectId {
                    epoch,
                    index: i as u32,
                },
                s,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn scalar_shadow(g: &mut Graph, v: f64) -> Shadow {
        Shadow {
            tensor: SymTensor::scalar(g.constant(v), DType::F64),
            origin: Origin::Constant,
            storage: None,
        }
    }

    #[test]
    fn handles_from_other_epochs_do_not_resolve() {
        let mut g = Graph::new();
        let mut a = ShadowMap::new(7);
        let mut b = ShadowMap::new(8);
        let ia = a.insert(scalar_shadow(&mut g, 1.0));
        let _ib = b.insert(scalar_shadow(&mut g, 2.0));
        assert!(a.get(ia).is_some());
        assert!(b.get(ia).is_none());
        assert!(matches!(b.resolve(ia), Err(Error::StaleHandle(_))));
    }

    #[test]
    fn storage_lookup_keeps_first_shadow() {
        let mut g = Graph::new();
        let s = SharedTensor::new(1.0);
        let mut map = ShadowMap::new(1);
        let mut first = scalar_shadow(&mut g, 1.0);
        first.storage = Some(s.clone());
        let id = map.insert(first);
        let mut second = scalar_shadow(&mut g, 1.0);
        second.storage = Some(s.clone());
        map.insert(second);
        assert_eq!(map.by_storage(&s), Some(id));
    }
}
