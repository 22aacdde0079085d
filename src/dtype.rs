//! Logical element types carried alongside `f64` storage.

use std::fmt;

/// Element type of a [`Tensor`](crate::Tensor) or traced value.
///
/// Storage is always `f64`; the dtype decides how values are coerced and how
/// binary operations promote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    Bool,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    /// Result type of a binary arithmetic operation.
    ///
    /// Follows numpy: integers wider than a bool promote `f32` to `f64`.
    pub fn promote(self, other: DType) -> DType {
        match (self.is_float(), other.is_float()) {
            (true, true) | (false, false) => self.max(other),
            (true, false) => float_with_int(self, other),
            (false, true) => float_with_int(other, self),
        }
    }

    /// Result type of true division: integers always divide into `f64`.
    pub fn true_divide(self, other: DType) -> DType {
        let p = self.promote(other);
        if p.is_float() {
            p
        } else {
            DType::F64
        }
    }

    /// Result type of a transcendental op (`exp`, `sqrt`, ...) applied to this dtype.
    pub fn to_float(self) -> DType {
        match self {
            DType::F32 => DType::F32,
            _ => DType::F64,
        }
    }

    /// Coerce a value into the representable set of this dtype.
    #[inline]
    pub fn coerce(self, v: f64) -> f64 {
        match self {
            DType::F64 => v,
            DType::F32 => v as f32 as f64,
            DType::I64 => v.trunc() as i64 as f64,
            DType::I32 => v.trunc() as i32 as f64,
            DType::Bool => {
                if v != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    /// Compact code stored in an opcode argument slot.
    #[inline]
    pub(crate) fn code(self) -> u32 {
        self as u32
    }

    #[inline]
    pub(crate) fn from_code(code: u32) -> Option<DType> {
        match code {
            0 => Some(DType::Bool),
            1 => Some(DType::I32),
            2 => Some(DType::I64),
            3 => Some(DType::F32),
            4 => Some(DType::F64),
            _ => None,
        }
    }
}

fn float_with_int(float: DType, int: DType) -> DType {
    if int == DType::Bool {
        float
    } else {
        DType::F64
    }
}

impl Default for DType {
    fn default() -> Self {
        DType::F64
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
