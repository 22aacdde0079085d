//! Calling signatures, call arguments and argument binding.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array, Dimension};

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Keyword reserved for Hessian-vector direction vectors.
pub const VECTORS_KEYWORD: &str = "_vectors";

/// One call argument.
///
/// Only scalars and arrays are traceable. The container variants exist so
/// that a caller handing over a structured value gets a clear error instead of
/// a silent element-wise trace.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Float(f64),
    Int(i64),
    Array(Tensor),
    List(Vec<Arg>),
    Tuple(Vec<Arg>),
    Dict(BTreeMap<String, Arg>),
}

impl Arg {
    pub fn is_container(&self) -> bool {
        matches!(self, Arg::List(_) | Arg::Tuple(_) | Arg::Dict(_))
    }

    /// Integer payload of a 0-d integer argument.
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(i) => Some(*i),
            Arg::Array(t) if t.ndim() == 0 && t.dtype().is_integer() => {
                t.as_scalar().map(|v| v as i64)
            }
            _ => None,
        }
    }

    /// Convert a leaf into a fresh tensor; containers are rejected.
    ///
    /// Every call produces a new value, so equal integers never share a
    /// shadow.
    pub(crate) fn to_tensor(&self, name: &str) -> Result<Tensor> {
        match self {
            Arg::Float(v) => Ok(Tensor::scalar(*v)),
            Arg::Int(v) => Ok(Tensor::int(*v)),
            Arg::Array(t) => Ok(t.clone()),
            _ => Err(Error::ContainerArgument {
                name: name.to_string(),
                value: self.to_string(),
            }),
        }
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v as i64)
    }
}

impl From<Tensor> for Arg {
    fn from(t: Tensor) -> Self {
        Arg::Array(t)
    }
}

impl<D: Dimension> From<Array<f64, D>> for Arg {
    fn from(a: Array<f64, D>) -> Self {
        Arg::Array(Tensor::from(a))
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(v: Vec<Arg>) -> Self {
        Arg::List(v)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, items: &[Arg], open: &str, close: &str) -> fmt::Result {
            f.write_str(open)?;
            for (i, a) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{a}")?;
            }
            f.write_str(close)
        }
        match self {
            Arg::Float(v) => write!(f, "{v:?}"),
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Array(t) => write!(f, "array(shape={:?}, dtype={})", t.shape(), t.dtype()),
            Arg::List(items) => seq(f, items, "[", "]"),
            Arg::Tuple(items) if items.len() == 1 => seq(f, items, "(", ",)"),
            Arg::Tuple(items) => seq(f, items, "(", ")"),
            Arg::Dict(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{k}': {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Positional and keyword arguments of one call, plus the reserved
/// direction-vector slot used by Hessian-vector products.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
    pub vectors: Option<Vec<Tensor>>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional arguments only.
    pub fn positional<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        CallArgs {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Direction vectors for a Hessian-vector product.
    pub fn vectors(mut self, vectors: Vec<Tensor>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    /// The same call without direction vectors.
    pub(crate) fn without_vectors(&self) -> CallArgs {
        CallArgs {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            vectors: None,
        }
    }
}

impl From<Vec<Tensor>> for CallArgs {
    fn from(args: Vec<Tensor>) -> Self {
        CallArgs::positional(args)
    }
}

/// Calling signature of a target closure.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Signature {
    pub params: Vec<String>,
    pub varargs: Option<String>,
    pub varkw: Option<String>,
    pub defaults: BTreeMap<String, Arg>,
}

impl Signature {
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Signature {
            params: params.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_varargs(mut self, name: impl Into<String>) -> Self {
        self.varargs = Some(name.into());
        self
    }

    pub fn with_varkw(mut self, name: impl Into<String>) -> Self {
        self.varkw = Some(name.into());
        self
    }

    pub fn with_default(mut self, param: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.defaults.insert(param.into(), value.into());
        self
    }

    /// Bind a call to this signature, producing one entry per leaf argument in
    /// declaration order: positional parameters, then variadic items, then
    /// extra keywords in name order.
    pub fn bind(&self, call: &CallArgs) -> Result<BoundArgs> {
        if call.kwargs.contains_key(VECTORS_KEYWORD) {
            return Err(Error::ReservedKeyword(VECTORS_KEYWORD.to_string()));
        }

        let np = self.params.len();
        let mut slots: Vec<Option<&Arg>> = vec![None; np];
        let mut varargs: Vec<&Arg> = Vec::new();

        for (i, a) in call.args.iter().enumerate() {
            if i < np {
                slots[i] = Some(a);
            } else if self.varargs.is_some() {
                varargs.push(a);
            } else {
                return Err(Error::TooManyPositional {
                    expected: np,
                    received: call.args.len(),
                });
            }
        }

        let mut extra: Vec<(&String, &Arg)> = Vec::new();
        for (k, v) in &call.kwargs {
            match self.params.iter().position(|p| p == k) {
                Some(i) if slots[i].is_some() => return Err(Error::DuplicateArgument(k.clone())),
                Some(i) => slots[i] = Some(v),
                None if self.varkw.is_some() => extra.push((k, v)),
                None => return Err(Error::UnexpectedArgument(k.clone())),
            }
        }

        let mut entries = Vec::with_capacity(np + varargs.len() + extra.len());
        for (name, slot) in self.params.iter().zip(slots) {
            let arg = slot
                .or_else(|| self.defaults.get(name))
                .ok_or_else(|| Error::MissingArgument(name.clone()))?;
            entries.push(BoundArg {
                name: name.clone(),
                kind: ArgKind::Positional,
                int_value: arg.as_int(),
                value: arg.to_tensor(name)?,
            });
        }
        if let Some(vname) = &self.varargs {
            for (i, a) in varargs.into_iter().enumerate() {
                entries.push(BoundArg {
                    name: format!("{vname}_{i}"),
                    kind: ArgKind::Vararg(i),
                    int_value: a.as_int(),
                    value: a.to_tensor(vname)?,
                });
            }
        }
        for (k, v) in extra {
            entries.push(BoundArg {
                name: k.clone(),
                kind: ArgKind::Keyword,
                int_value: v.as_int(),
                value: v.to_tensor(k)?,
            });
        }

        Ok(BoundArgs {
            entries,
            varargs: self.varargs.clone(),
        })
    }
}

/// How a bound entry was supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Positional,
    Vararg(usize),
    Keyword,
}

/// One bound leaf argument.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundArg {
    /// Parameter name, `{varargs}_{i}` for variadic items.
    pub name: String,
    pub kind: ArgKind,
    pub value: Tensor,
    /// Set when the argument was given as an integer scalar.
    pub(crate) int_value: Option<i64>,
}

/// A call bound to a [`Signature`].
#[derive(Clone, Debug, PartialEq)]
pub struct BoundArgs {
    pub(crate) entries: Vec<BoundArg>,
    pub(crate) varargs: Option<String>,
}

impl BoundArgs {
    pub fn entries(&self) -> &[BoundArg] {
        &self.entries
    }

    pub fn num_varargs(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, ArgKind::Vararg(_)))
            .count()
    }

    /// Leaf values in positional form, variadic items expanded.
    pub fn values(&self) -> Vec<Tensor> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && !matches!(e.kind, ArgKind::Vararg(_)))
    }

    pub(crate) fn vararg_name(&self) -> Option<&str> {
        self.varargs.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Signature {
        Signature::new(["x", "y"])
            .with_varargs("rest")
            .with_default("y", 2.0)
    }

    #[test]
    fn binds_positional_defaults_and_varargs() {
        let b = sig()
            .bind(&CallArgs::positional([1.0, 3.0, 4.0, 5.0]))
            .unwrap();
        let names: Vec<_> = b.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["x", "y", "rest_0", "rest_1"]);
        assert_eq!(b.num_varargs(), 2);

        let b = sig().bind(&CallArgs::new().arg(1.0)).unwrap();
        assert_eq!(b.entries()[1].value.as_scalar(), Some(2.0));
    }

    #[test]
    fn rejects_containers() {
        let call = CallArgs::new().arg(Arg::List(vec![1.into(), 2.into(), 3.into()]));
        let err = sig().bind(&call).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Function arguments can not be containers (received [1, 2, 3] for argument 'x')"
        );
    }

    #[test]
    fn keyword_errors() {
        let s = Signature::new(["x"]);
        let call = CallArgs::new().arg(1.0).kwarg("x", 2.0);
        assert!(matches!(s.bind(&call), Err(Error::DuplicateArgument(_))));
        let call = CallArgs::new().kwarg("z", 2.0);
        assert!(matches!(s.bind(&call), Err(Error::UnexpectedArgument(_))));
        assert!(matches!(
            s.bind(&CallArgs::new()),
            Err(Error::MissingArgument(_))
        ));
        let call = CallArgs::new().arg(1.0).kwarg(VECTORS_KEYWORD, 1.0);
        assert!(matches!(s.bind(&call), Err(Error::ReservedKeyword(_))));
    }

    #[test]
    fn too_many_positional() {
        let s = Signature::new(["x"]);
        let err = s.bind(&CallArgs::positional([1.0, 2.0])).unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyPositional {
                expected: 1,
                received: 2
            }
        ));
    }

    #[test]
    fn extra_keywords_follow_varkw() {
        let s = Signature::new(["x"]).with_varkw("opts");
        let call = CallArgs::new().arg(1.0).kwarg("scale", 3i64);
        let b = s.bind(&call).unwrap();
        assert_eq!(b.entries()[1].kind, ArgKind::Keyword);
        assert_eq!(b.entries()[1].int_value, Some(3));
    }
}
