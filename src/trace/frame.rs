//! Argument access for traced target closures.

use std::cell::RefCell;

use crate::error::{Error, Result};
use crate::symbolic::{ArgKind, BoundArgs};

use super::context::with_active;
use super::shadow::Origin;
use super::var::Var;

/// View of the bound call arguments handed to a target closure.
///
/// Each argument is shadowed the first time the closure reads it, and the
/// same handle is returned on every later read within the trace. Arguments
/// never read are not shadowed.
pub struct Frame<'a> {
    bound: &'a BoundArgs,
    slots: RefCell<Vec<Option<Var>>>,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(bound: &'a BoundArgs) -> Self {
        Frame {
            bound,
            slots: RefCell::new(vec![None; bound.entries.len()]),
        }
    }

    fn slot(&self, idx: usize) -> Result<Var> {
        if let Some(v) = self.slots.borrow()[idx] {
            return Ok(v);
        }
        let entry = &self.bound.entries[idx];
        let origin = match entry.kind {
            ArgKind::Vararg(index) => Origin::VarargItem {
                name: self.bound.vararg_name().unwrap_or_default().to_string(),
                index,
            },
            _ => Origin::Argument(entry.name.clone()),
        };
        let id = with_active(|st| st.argument(&entry.value, origin)).ok_or(Error::NoActiveTrace)?;
        let v = Var { id };
        self.slots.borrow_mut()[idx] = Some(v);
        Ok(v)
    }

    /// Named argument: a declared parameter or an extra keyword.
    pub fn arg(&self, name: &str) -> Result<Var> {
        let idx = self
            .bound
            .find(name)
            .ok_or_else(|| Error::MissingArgument(name.to_string()))?;
        self.slot(idx)
    }

    /// Item `i` of the variadic positional arguments.
    pub fn vararg(&self, i: usize) -> Result<Var> {
        let idx = self
            .bound
            .entries
            .iter()
            .position(|e| e.kind == ArgKind::Vararg(i))
            .ok_or(Error::IndexOutOfBounds {
                axis: 0,
                index: i,
                len: self.num_varargs(),
            })?;
        self.slot(idx)
    }

    pub fn varargs(&self) -> Result<Vec<Var>> {
        (0..self.num_varargs()).map(|i| self.vararg(i)).collect()
    }

    pub fn num_varargs(&self) -> usize {
        self.bound.num_varargs()
    }

    pub fn has(&self, name: &str) -> bool {
        self.bound.find(name).is_some()
    }

    /// Names of arguments bound through the variadic keyword parameter.
    pub fn keywords(&self) -> Vec<&str> {
        self.bound
            .entries
            .iter()
            .filter(|e| e.kind == ArgKind::Keyword)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Concrete value of an integer argument, for loop bounds and other
    /// trace-time control flow. The argument is shadowed as well.
    pub fn int(&self, name: &str) -> Result<i64> {
        let idx = self
            .bound
            .find(name)
            .ok_or_else(|| Error::MissingArgument(name.to_string()))?;
        self.slot(idx)?;
        let entry = &self.bound.entries[idx];
        match entry.int_value {
            Some(i) => Ok(i),
            None => Err(Error::target(format!(
                "argument '{name}' is not an integer (dtype {})",
                entry.value.dtype()
            ))),
        }
    }

    pub(crate) fn into_slots(self) -> Vec<Option<Var>> {
        self.slots.into_inner()
    }
}
