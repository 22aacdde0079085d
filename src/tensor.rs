//! Concrete array values and shared (borrowable) storage.
//!
//! A [`Tensor`] is an `ndarray::ArrayD<f64>` tagged with a logical [`DType`].
//! Values are always coerced into the dtype's representable set on construction.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use ndarray::{Array, Array1, ArrayD, Dimension, IxDyn};

use crate::dtype::DType;
use crate::error::{Error, Result};

/// A dense row-major array with a logical element type.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub(crate) data: ArrayD<f64>,
    pub(crate) dtype: DType,
}

impl Tensor {
    /// Wrap `data`, coercing every element into `dtype`.
    pub fn new(mut data: ArrayD<f64>, dtype: DType) -> Self {
        if dtype != DType::F64 {
            data.mapv_inplace(|v| dtype.coerce(v));
        }
        Tensor { data, dtype }
    }

    /// A 0-d `float64` tensor.
    pub fn scalar(value: f64) -> Self {
        Tensor {
            data: ArrayD::from_elem(IxDyn(&[]), value),
            dtype: DType::F64,
        }
    }

    /// A 0-d `int64` tensor.
    pub fn int(value: i64) -> Self {
        Tensor {
            data: ArrayD::from_elem(IxDyn(&[]), value as f64),
            dtype: DType::I64,
        }
    }

    /// A 1-d `float64` tensor.
    pub fn vector(values: &[f64]) -> Self {
        Tensor {
            data: Array1::from(values.to_vec()).into_dyn(),
            dtype: DType::F64,
        }
    }

    /// Build a `float64` tensor from row-major `values`.
    pub fn from_shape_vec(shape: &[usize], values: Vec<f64>) -> Result<Self> {
        Ok(Tensor {
            data: ArrayD::from_shape_vec(IxDyn(shape), values)?,
            dtype: DType::F64,
        })
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Tensor {
            data: ArrayD::zeros(IxDyn(shape)),
            dtype,
        }
    }

    /// Reinterpret with a different dtype, coercing values.
    pub fn astype(&self, dtype: DType) -> Self {
        Tensor::new(self.data.clone(), dtype)
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    /// Elements in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// Element at row-major position `offset`.
    pub fn flat_get(&self, offset: usize) -> Option<f64> {
        match self.data.as_slice() {
            Some(s) => s.get(offset).copied(),
            None => self.data.iter().nth(offset).copied(),
        }
    }

    /// The single element of a one-element tensor.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.data.len() == 1 {
            self.data.iter().next().copied()
        } else {
            None
        }
    }

    /// Dimensions of length one, which may broadcast against any length.
    pub fn broadcastable(&self) -> Vec<bool> {
        self.shape().iter().map(|&d| d == 1).collect()
    }
}

impl From<f64> for Tensor {
    fn from(v: f64) -> Self {
        Tensor::scalar(v)
    }
}

impl<D: Dimension> From<Array<f64, D>> for Tensor {
    fn from(a: Array<f64, D>) -> Self {
        Tensor {
            data: a.into_dyn(),
            dtype: DType::F64,
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.data, self.dtype)
    }
}

/// Shared, interior-mutable tensor storage.
///
/// Cloning the handle aliases the same storage. Borrowed storages are read by
/// compiled programs at call time, so in-place updates through
/// [`SharedTensor::set`] are observed on the next call.
#[derive(Clone, Debug)]
pub struct SharedTensor(Rc<RefCell<Tensor>>);

impl SharedTensor {
    pub fn new(value: impl Into<Tensor>) -> Self {
        SharedTensor(Rc::new(RefCell::new(value.into())))
    }

    pub fn get(&self) -> Ref<'_, Tensor> {
        self.0.borrow()
    }

    /// Replace the stored value.
    pub fn set(&self, value: impl Into<Tensor>) {
        *self.0.borrow_mut() = value.into();
    }

    /// Mutate the stored value in place.
    pub fn update(&self, f: impl FnOnce(&mut Tensor)) {
        f(&mut *self.0.borrow_mut());
    }

    pub fn ptr_eq(&self, other: &SharedTensor) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the backing storage.
    #[inline]
    pub(crate) fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

// ══════════════════════════════════════════════
//  Broadcasting helpers
// ══════════════════════════════════════════════

/// Broadcast two shapes numpy-style, or `None` if they are incompatible.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut out = vec![0; n];
    for i in 0..n {
        let da = if i < n - a.len() { 1 } else { a[i - (n - a.len())] };
        let db = if i < n - b.len() { 1 } else { b[i - (n - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Row-major strides for `shape`.
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut s = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        s[i] = s[i + 1] * shape[i + 1];
    }
    s
}

/// Map a flat index in the broadcast output shape to a flat index in `in_shape`.
pub(crate) fn broadcast_source(flat: usize, out_shape: &[usize], in_shape: &[usize]) -> usize {
    let out_strides = strides(out_shape);
    let in_strides = strides(in_shape);
    let offset = out_shape.len() - in_shape.len();
    let mut rem = flat;
    let mut src = 0;
    for (axis, &stride) in out_strides.iter().enumerate() {
        let coord = rem / stride;
        rem %= stride;
        if axis >= offset {
            let k = axis - offset;
            if in_shape[k] != 1 {
                src += coord * in_strides[k];
            }
        }
    }
    src
}

pub(crate) fn shape_len(shape: &[usize]) -> usize {
    shape.iter().product()
}

pub(crate) fn check_shape(name: &str, expected: &[usize], t: &Tensor) -> Result<()> {
    if t.shape() != expected {
        return Err(Error::InputShape {
            name: name.to_string(),
            expected: expected.to_vec(),
            received: t.shape().to_vec(),
            dtype: t.dtype().as_str(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn broadcast_shapes_numpy_rules() {
        assert_eq!(broadcast_shapes(&[3, 1], &[4]), Some(vec![3, 4]));
        assert_eq!(broadcast_shapes(&[], &[2, 2]), Some(vec![2, 2]));
        assert_eq!(broadcast_shapes(&[3], &[4]), None);
    }

    #[test]
    fn broadcast_source_repeats_rows() {
        // [3,1] broadcast to [3,2]: every column reads the same row element.
        let out = [3, 2];
        let src: Vec<usize> = (0..6).map(|i| broadcast_source(i, &out, &[3, 1])).collect();
        assert_eq!(src, vec![0, 0, 1, 1, 2, 2]);
        let src: Vec<usize> = (0..6).map(|i| broadcast_source(i, &out, &[2])).collect();
        assert_eq!(src, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn integer_tensors_are_coerced() {
        let t = Tensor::from(array![1.7, -2.2]).astype(DType::I32);
        assert_eq!(t.to_vec(), vec![1.0, -2.0]);
        assert_eq!(t.dtype(), DType::I32);
    }

    #[test]
    fn shared_tensor_aliases() {
        let a = SharedTensor::new(1.0);
        let b = a.clone();
        b.set(5.0);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.get().as_scalar(), Some(5.0));
    }
}
