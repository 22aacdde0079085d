//! Compiled-artifact cache.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::dtype::DType;
use crate::symbolic::BoundArgs;

/// Fingerprint of one bound leaf argument.
///
/// Integer scalars also carry their value: a target may read them through
/// [`Frame::int`](crate::Frame::int) to drive trace-time control flow.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeafSignature {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub int_value: Option<i64>,
}

/// Key of a compiled artifact.
///
/// A compiled program is only valid for the argument names, shapes and
/// dtypes it was traced with, and for the integer values its control flow
/// read, so the key fingerprints every leaf on top of the variadic count.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheKey {
    pub varargs: usize,
    pub leaves: Vec<LeafSignature>,
}

impl CacheKey {
    pub fn from_bound(bound: &BoundArgs) -> Self {
        CacheKey {
            varargs: bound.num_varargs(),
            leaves: bound
                .entries()
                .iter()
                .map(|e| LeafSignature {
                    name: e.name.clone(),
                    shape: e.value.shape().to_vec(),
                    dtype: e.value.dtype(),
                    int_value: e.int_value,
                })
                .collect(),
        }
    }
}

/// Memoized compiled callables, one cache per compiler.
#[derive(Debug)]
pub struct ArtifactCache<T> {
    entries: HashMap<CacheKey, Rc<T>>,
    compiles: usize,
}

impl<T> Default for ArtifactCache<T> {
    fn default() -> Self {
        ArtifactCache {
            entries: HashMap::new(),
            compiles: 0,
        }
    }
}

impl<T> ArtifactCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Rc<T>> {
        let hit = self.entries.get(key).cloned();
        if hit.is_some() {
            trace!(varargs = key.varargs, leaves = key.leaves.len(), "cache hit");
        }
        hit
    }

    /// Store a freshly compiled artifact and count the compilation.
    pub fn insert(&mut self, key: CacheKey, value: T) -> Rc<T> {
        let value = Rc::new(value);
        self.entries.insert(key, Rc::clone(&value));
        self.compiles += 1;
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of compilations performed through this cache.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }
}
