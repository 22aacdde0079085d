//! The symbolic wrapper: drives a target closure under tracing and turns the
//! trace into an input/output graph.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::tensor::{SharedTensor, Tensor};
use crate::trace::{Frame, ObjectId, ShadowMap, SymTensor, TraceGuard, TraceState, Var};

mod signature;

pub use self::signature::{
    Arg, ArgKind, BoundArg, BoundArgs, CallArgs, Signature, VECTORS_KEYWORD,
};

/// Options applied to every trace of a [`Symbolic`] wrapper.
#[derive(Clone, Debug)]
pub struct SymbolicConfig {
    /// Storages whose shadows alias the storage instead of copying it.
    pub borrow: Vec<SharedTensor>,
    /// Cast every floating argument and lifted storage to `float_x`.
    pub force_float_x: bool,
    pub float_x: DType,
}

impl Default for SymbolicConfig {
    fn default() -> Self {
        SymbolicConfig {
            borrow: Vec::new(),
            force_float_x: false,
            float_x: DType::F64,
        }
    }
}

/// Values returned from a target closure.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Returns(pub Vec<Var>);

impl From<Var> for Returns {
    fn from(v: Var) -> Self {
        Returns(vec![v])
    }
}

impl From<Vec<Var>> for Returns {
    fn from(v: Vec<Var>) -> Self {
        Returns(v)
    }
}

impl From<(Var, Var)> for Returns {
    fn from((a, b): (Var, Var)) -> Self {
        Returns(vec![a, b])
    }
}

impl From<(Var, Var, Var)> for Returns {
    fn from((a, b, c): (Var, Var, Var)) -> Self {
        Returns(vec![a, b, c])
    }
}

/// Shadow(s) of one formal argument.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgShadow {
    Single(ObjectId),
    /// One shadow per variadic positional item.
    Group(Vec<ObjectId>),
}

/// Reference to a traced object for selective lookup.
#[derive(Clone, Debug)]
pub enum ArgRef {
    Name(String),
    Var(Var),
    Shared(SharedTensor),
    Int(i64),
}

impl From<&str> for ArgRef {
    fn from(s: &str) -> Self {
        ArgRef::Name(s.to_string())
    }
}

impl From<String> for ArgRef {
    fn from(s: String) -> Self {
        ArgRef::Name(s)
    }
}

impl From<Var> for ArgRef {
    fn from(v: Var) -> Self {
        ArgRef::Var(v)
    }
}

impl From<&SharedTensor> for ArgRef {
    fn from(s: &SharedTensor) -> Self {
        ArgRef::Shared(s.clone())
    }
}

impl From<i64> for ArgRef {
    fn from(i: i64) -> Self {
        ArgRef::Int(i)
    }
}

/// Integers too common to identify a single argument by value.
const SMALL_INT: std::ops::RangeInclusive<i64> = -5..=256;

/// A formal input of a [`SymbolicGraph`].
#[derive(Clone, Debug)]
pub struct GraphInput {
    pub name: String,
    pub tensor: SymTensor,
    pub default: Option<Tensor>,
}

/// Input/output graph built from one trace.
#[derive(Clone, Debug)]
pub struct SymbolicGraph {
    pub inputs: Vec<GraphInput>,
    pub outputs: Vec<SymTensor>,
    pub graph: Graph,
    /// Trace node → node of `graph`, for every node the clone visited.
    pub equiv: HashMap<NodeId, NodeId>,
    /// Total number of flat input slots.
    pub num_slots: usize,
}

type TargetFn = Rc<dyn Fn(&Frame<'_>) -> Result<Returns>>;

/// Wraps a target closure and records its trace.
#[derive(Clone)]
pub struct Symbolic {
    target: TargetFn,
    signature: Signature,
    config: SymbolicConfig,
    s_vars: ShadowMap,
    s_args: Vec<(String, ArgShadow)>,
    s_results: Vec<ObjectId>,
    trace_graph: Graph,
    bound: Option<BoundArgs>,
}

impl fmt::Debug for Symbolic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbolic")
            .field("signature", &self.signature)
            .field("config", &self.config)
            .field("shadows", &self.s_vars.len())
            .field("results", &self.s_results)
            .finish()
    }
}

impl Symbolic {
    pub fn new<F, R>(signature: Signature, f: F) -> Self
    where
        F: Fn(&Frame<'_>) -> Result<R> + 'static,
        R: Into<Returns>,
    {
        Symbolic {
            target: Rc::new(move |frame: &Frame<'_>| f(frame).map(Into::into)),
            signature,
            config: SymbolicConfig::default(),
            s_vars: ShadowMap::default(),
            s_args: Vec::new(),
            s_results: Vec::new(),
            trace_graph: Graph::new(),
            bound: None,
        }
    }

    pub fn with_config(mut self, config: SymbolicConfig) -> Self {
        self.config = config;
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn config(&self) -> &SymbolicConfig {
        &self.config
    }

    /// Bind `call`, applying `force_float_x` to the bound values.
    pub fn bind(&self, call: &CallArgs) -> Result<BoundArgs> {
        let mut bound = self.signature.bind(call)?;
        if self.config.force_float_x {
            let fx = self.config.float_x;
            for e in &mut bound.entries {
                if e.value.dtype().is_float() && e.value.dtype() != fx {
                    e.value = e.value.astype(fx);
                }
            }
        }
        Ok(bound)
    }

    /// Run the target on `call` and repopulate the shadow maps.
    pub fn trace(&mut self, call: &CallArgs) -> Result<()> {
        let bound = self.bind(call)?;
        self.trace_bound(bound)
    }

    pub(crate) fn trace_bound(&mut self, bound: BoundArgs) -> Result<()> {
        self.reset();
        debug!(args = bound.entries.len(), "trace start");

        let float_x = self.config.force_float_x.then_some(self.config.float_x);
        let guard = TraceGuard::install(TraceState::new(self.config.borrow.clone(), float_x));
        let frame = Frame::new(&bound);
        let returned = (self.target)(&frame);
        let slots = frame.into_slots();
        let mut state = guard.finish().ok_or(Error::NoActiveTrace)?;

        if let Some(err) = state.error.take() {
            return Err(err);
        }
        let returned = returned?;

        let vararg_name = bound.vararg_name().unwrap_or_default().to_string();
        let mut s_args = Vec::with_capacity(bound.entries.len());
        let mut group = Vec::new();
        for (entry, slot) in bound.entries.iter().zip(&slots) {
            match entry.kind {
                ArgKind::Vararg(index) => {
                    let v = slot.ok_or_else(|| Error::UntracedVarargItem {
                        name: vararg_name.clone(),
                        index,
                    })?;
                    group.push(v.id);
                }
                kind => {
                    let v = slot.ok_or_else(|| Error::UntracedArgument(entry.name.clone()))?;
                    if kind == ArgKind::Keyword && bound.vararg_name().is_some() {
                        flush_group(&mut s_args, &vararg_name, &mut group);
                    }
                    s_args.push((entry.name.clone(), ArgShadow::Single(v.id)));
                }
            }
        }
        if bound.vararg_name().is_some() {
            flush_group(&mut s_args, &vararg_name, &mut group);
        }

        let mut s_results = Vec::with_capacity(returned.0.len());
        for (i, v) in returned.0.iter().enumerate() {
            if state.shadows.get(v.id).is_none() {
                return Err(Error::UntracedResult(i + 1));
            }
            s_results.push(v.id);
        }

        debug!(
            shadows = state.shadows.len(),
            nodes = state.graph.len(),
            results = s_results.len(),
            "trace complete"
        );
        self.s_vars = state.shadows;
        self.trace_graph = state.graph;
        self.s_args = s_args;
        self.s_results = s_results;
        self.bound = Some(bound);
        Ok(())
    }

    /// Re-trace and build the input/output graph.
    pub fn get_graph(&mut self, call: &CallArgs) -> Result<SymbolicGraph> {
        let bound = self.bind(call)?;
        self.get_graph_bound(bound)
    }

    pub(crate) fn get_graph_bound(&mut self, bound: BoundArgs) -> Result<SymbolicGraph> {
        self.get_graph_with(bound, |g, slot, value, _| g.input(slot, value))
    }

    /// Re-trace and build the input/output graph, creating the node that
    /// replaces each argument element with `make_input(graph, slot, value, dtype)`.
    pub(crate) fn get_graph_with<F>(
        &mut self,
        bound: BoundArgs,
        mut make_input: F,
    ) -> Result<SymbolicGraph>
    where
        F: FnMut(&mut Graph, u32, f64, DType) -> NodeId,
    {
        self.trace_bound(bound)?;
        let bound = self.bound.as_ref().ok_or(Error::NoActiveTrace)?;

        let mut graph = Graph::with_capacity(self.trace_graph.len());
        let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
        let mut inputs = Vec::with_capacity(bound.entries.len());
        let mut slot = 0u32;
        for (entry, id) in bound.entries.iter().zip(self.arg_ids()) {
            let shadow = self.s_vars.resolve(id)?;
            let dtype = shadow.tensor.dtype;
            let tensor = shadow.tensor.map_nodes(|n| {
                let input = make_input(&mut graph, slot, self.trace_graph.value(n), dtype);
                slot += 1;
                memo.insert(n, input);
                input
            });
            let default = match entry.kind {
                ArgKind::Positional => self
                    .signature
                    .defaults
                    .get(&entry.name)
                    .map(|d| d.to_tensor(&entry.name))
                    .transpose()?,
                _ => None,
            };
            inputs.push(GraphInput {
                name: entry.name.clone(),
                tensor,
                default,
            });
        }

        let mut roots = Vec::new();
        for &id in &self.s_results {
            roots.extend_from_slice(&self.s_vars.resolve(id)?.tensor.nodes);
        }
        self.trace_graph.clone_into(&roots, &mut graph, &mut memo);

        let mut outputs = Vec::with_capacity(self.s_results.len());
        for &id in &self.s_results {
            outputs.push(self.s_vars.resolve(id)?.tensor.map_nodes(|n| memo[&n]));
        }

        Ok(SymbolicGraph {
            inputs,
            outputs,
            graph,
            equiv: memo,
            num_slots: slot as usize,
        })
    }

    /// Argument shadows in bound-entry order, variadic groups expanded.
    fn arg_ids(&self) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        for (_, s) in &self.s_args {
            match s {
                ArgShadow::Single(id) => ids.push(*id),
                ArgShadow::Group(g) => ids.extend_from_slice(g),
            }
        }
        ids
    }

    /// Shadow handle of an argument, a traced variable, a shared storage, or
    /// the unique argument holding an integer value, from the last trace.
    pub fn get_symbolic_arg(&self, r: impl Into<ArgRef>) -> Result<ObjectId> {
        let r = r.into();
        let Some(bound) = self.bound.as_ref() else {
            return Err(Error::NotTraced(describe(&r)));
        };
        match &r {
            ArgRef::Name(name) => {
                let ids = self.arg_ids();
                bound
                    .entries
                    .iter()
                    .zip(ids)
                    .find(|(e, _)| &e.name == name)
                    .map(|(_, id)| id)
                    .ok_or_else(|| Error::NotTraced(describe(&r)))
            }
            ArgRef::Var(v) => match self.s_vars.get(v.id) {
                Some(_) => Ok(v.id),
                None => Err(Error::NotTraced(describe(&r))),
            },
            ArgRef::Shared(s) => self
                .s_vars
                .by_storage(s)
                .ok_or_else(|| Error::NotTraced(describe(&r))),
            ArgRef::Int(i) => {
                if SMALL_INT.contains(i) {
                    return Err(Error::AmbiguousSmallInt(*i));
                }
                let matches: Vec<ObjectId> = bound
                    .entries
                    .iter()
                    .zip(self.arg_ids())
                    .filter(|(e, _)| e.int_value == Some(*i))
                    .map(|(_, id)| id)
                    .collect();
                match matches.as_slice() {
                    [id] => Ok(*id),
                    [] => Err(Error::NotTraced(describe(&r))),
                    _ => Err(Error::AmbiguousInt(*i)),
                }
            }
        }
    }

    pub fn s_vars(&self) -> &ShadowMap {
        &self.s_vars
    }

    pub fn s_args(&self) -> &[(String, ArgShadow)] {
        &self.s_args
    }

    pub fn s_results(&self) -> &[ObjectId] {
        &self.s_results
    }

    /// The graph recorded by the last trace, leaves still unsubstituted.
    pub fn trace_graph(&self) -> &Graph {
        &self.trace_graph
    }

    /// Arguments bound for the last trace.
    pub fn last_bound(&self) -> Option<&BoundArgs> {
        self.bound.as_ref()
    }

    /// Forget the last trace.
    pub fn reset(&mut self) {
        self.s_vars = ShadowMap::default();
        self.s_args.clear();
        self.s_results.clear();
        self.trace_graph = Graph::new();
        self.bound = None;
    }
}

fn flush_group(s_args: &mut Vec<(String, ArgShadow)>, name: &str, group: &mut Vec<ObjectId>) {
    if !s_args.iter().any(|(n, _)| n == name) {
        s_args.push((name.to_string(), ArgShadow::Group(std::mem::take(group))));
    }
}

fn describe(r: &ArgRef) -> String {
    match r {
        ArgRef::Name(n) => n.clone(),
        ArgRef::Var(v) => v.id().to_string(),
        ArgRef::Shared(s) => format!("<shared {:?}>", s.get().shape()),
        ArgRef::Int(i) => i.to_string(),
    }
}
