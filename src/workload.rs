//! Workload definitions: the runner and its lifecycle hooks.
//!
//! A *workload* is what a [`Job`](crate::Job) executes — a mandatory
//! `runner` plus optional `init` / `init_runner` / `done` hooks, stored as
//! boxed async closures over a dynamically-typed [`State`] handle:
//!
//! - `init` runs once before any worker starts and produces the suite state.
//! - `init_runner` runs once per worker and derives that worker's private
//!   state from the suite state. Without it, workers receive the suite
//!   state unchanged.
//! - `runner` is the counted unit of work, invoked in a tight loop with the
//!   worker state.
//! - `done` runs once after the last worker has exited, with the suite
//!   state.
//!
//! Workloads come from two places. Library callers build them directly from
//! closures with [`Workload::new`] and the `with_*` methods. The CLI parses
//! a [`WorkloadSpec`] naming ops from the built-in registry; a spec
//! instantiates into a workload that also carries the spec itself, which is
//! the only form that can cross the isolation boundary.
//!
//! # Notes on the runner closure
//!
//! The runner cannot receive ad-hoc arguments, so capture shared clients or
//! buffers in the closure. Heavy construction inside the runner collapses
//! throughput by orders of magnitude; build expensive resources in `init`
//! or `init_runner` and hand them down through [`State`] instead.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::builtins;
use crate::error::{Error, HookError};

pub(crate) type BoxFut<T> = Pin<Box<dyn Future<Output = Result<T, HookError>> + Send>>;
pub(crate) type InitFn = Arc<dyn Fn() -> BoxFut<State> + Send + Sync>;
pub(crate) type InitRunnerFn = Arc<dyn Fn(State) -> BoxFut<State> + Send + Sync>;
pub(crate) type RunnerFn = Arc<dyn Fn(State) -> BoxFut<()> + Send + Sync>;
pub(crate) type DoneFn = Arc<dyn Fn(State) -> BoxFut<()> + Send + Sync>;

/// Dynamically-typed state handed between lifecycle hooks.
///
/// Cloning is cheap (an `Arc` bump); hooks that do not care about state
/// pass it through untouched.
#[derive(Clone, Default)]
pub struct State(Option<Arc<dyn Any + Send + Sync>>);

impl State {
    /// The empty state, used when no hook produced anything.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Wrap a value.
    pub fn of<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Borrow the wrapped value, if it has the expected type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|any| any.downcast_ref::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_some() {
            f.write_str("State(..)")
        } else {
            f.write_str("State(empty)")
        }
    }
}

/// A benchmarkable unit of work plus its lifecycle hooks.
#[derive(Clone)]
pub struct Workload {
    pub(crate) name: String,
    pub(crate) init: Option<InitFn>,
    pub(crate) init_runner: Option<InitRunnerFn>,
    pub(crate) runner: RunnerFn,
    pub(crate) done: Option<DoneFn>,
    pub(crate) spec: Option<WorkloadSpec>,
}

impl Workload {
    /// Build a workload from a runner closure.
    ///
    /// The closure receives the worker state produced by `init_runner` (or
    /// the suite state, or the empty state when neither hook exists).
    pub fn new<F, Fut>(name: impl Into<String>, runner: F) -> Self
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            init: None,
            init_runner: None,
            runner: Arc::new(move |state| -> BoxFut<()> { Box::pin(runner(state)) }),
            done: None,
            spec: None,
        }
    }

    /// Attach an `init` hook, executed once before any worker starts.
    pub fn with_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<State, HookError>> + Send + 'static,
    {
        self.init = Some(Arc::new(move || -> BoxFut<State> { Box::pin(hook()) }));
        self
    }

    /// Attach an `init_runner` hook, executed once per worker before its
    /// loop begins.
    pub fn with_init_runner<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<State, HookError>> + Send + 'static,
    {
        self.init_runner = Some(Arc::new(move |suite| -> BoxFut<State> { Box::pin(hook(suite)) }));
        self
    }

    /// Attach a `done` hook, executed once after the last worker exits.
    pub fn with_done<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.done = Some(Arc::new(move |suite| -> BoxFut<()> { Box::pin(hook(suite)) }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The serializable spec this workload was instantiated from, when it
    /// came from one. Only spec-backed workloads can run isolated.
    pub fn spec(&self) -> Option<&WorkloadSpec> {
        self.spec.as_ref()
    }
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("name", &self.name)
            .field("init", &self.init.is_some())
            .field("init_runner", &self.init_runner.is_some())
            .field("done", &self.done.is_some())
            .finish()
    }
}

/// One op from the built-in registry: a name and an optional argument,
/// written `name` or `name:arg` (for example `sleep:1ms`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct OpSpec {
    pub name: String,
    pub arg: Option<String>,
}

impl OpSpec {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let (name, arg) = match text.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim().to_string())),
            None => (text.trim(), None),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::ArgParse(format!("malformed op {text:?}")));
        }
        if !builtins::known(name) {
            return Err(Error::ArgParse(format!(
                "unknown op {name:?} (known: {})",
                builtins::names().join(", ")
            )));
        }
        Ok(Self { name: name.to_string(), arg })
    }
}

impl fmt::Display for OpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}:{arg}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<OpSpec> for String {
    fn from(op: OpSpec) -> Self {
        op.to_string()
    }
}

impl TryFrom<String> for OpSpec {
    type Error = Error;

    fn try_from(text: String) -> Result<Self, Error> {
        Self::parse(&text)
    }
}

/// Body of a runner or hook: a single registry op, or a recorded sequence
/// of ops replayed in order within one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeBody {
    Op(OpSpec),
    Trace(Vec<OpSpec>),
}

impl CodeBody {
    fn label(&self) -> String {
        match self {
            CodeBody::Op(op) => op.to_string(),
            CodeBody::Trace(ops) => format!("trace[{} ops]", ops.len()),
        }
    }
}

/// Serializable workload description: what the CLI parses and the only form
/// that can be shipped to an isolated runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub runner: CodeBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<CodeBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_runner: Option<CodeBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<CodeBody>,
}

impl WorkloadSpec {
    /// Interpret one CLI code argument.
    ///
    /// `{...}` parses as a JSON spec, a known op string parses as a bare
    /// runner, and anything else is taken as the path of a recorded trace.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let trimmed = text.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            return serde_json::from_str(trimmed).map_err(|e| {
                Error::ArgParse(format!("malformed workload spec {trimmed:?}: {e}"))
            });
        }
        if let Ok(op) = OpSpec::parse(trimmed) {
            return Ok(Self::from_runner(CodeBody::Op(op)));
        }
        Self::from_trace_file(trimmed)
    }

    pub fn from_runner(runner: CodeBody) -> Self {
        Self { name: None, runner, init: None, init_runner: None, done: None }
    }

    /// Load a recorded call trace: a JSON array of op strings, replayed in
    /// order as the body of one runner invocation.
    pub fn from_trace_file(path: &str) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ArgParse(format!(
                "{path:?} is neither a known op nor a readable trace file: {e}"
            ))
        })?;
        let ops: Vec<OpSpec> = serde_json::from_str(&raw)
            .map_err(|e| Error::ArgParse(format!("malformed trace file {path:?}: {e}")))?;
        if ops.is_empty() {
            return Err(Error::ArgParse(format!("trace file {path:?} is empty")));
        }
        Ok(Self::from_runner(CodeBody::Trace(ops)))
    }

    /// Display label: the explicit name, or the runner body.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.runner.label())
    }

    /// Compile into an executable workload. Fails on unknown ops or
    /// malformed op arguments, before any job exists.
    ///
    /// Registry ops carry no state of their own: an `init` body yields the
    /// empty suite state after executing, and an `init_runner` body passes
    /// the suite state through.
    pub fn instantiate(&self) -> Result<Workload, Error> {
        let runner = builtins::compile(&self.runner)?;
        let mut workload = Workload {
            name: self.label(),
            init: None,
            init_runner: None,
            runner,
            done: None,
            spec: Some(self.clone()),
        };
        if let Some(body) = &self.init {
            let op = builtins::compile(body)?;
            workload.init = Some(Arc::new(move || -> BoxFut<State> {
                let op = Arc::clone(&op);
                Box::pin(async move {
                    op(State::empty()).await?;
                    Ok(State::empty())
                })
            }));
        }
        if let Some(body) = &self.init_runner {
            let op = builtins::compile(body)?;
            workload.init_runner = Some(Arc::new(move |suite: State| -> BoxFut<State> {
                let op = Arc::clone(&op);
                Box::pin(async move {
                    op(suite.clone()).await?;
                    Ok(suite)
                })
            }));
        }
        if let Some(body) = &self.done {
            let op = builtins::compile(body)?;
            workload.done = Some(Arc::new(move |suite: State| -> BoxFut<()> {
                let op = Arc::clone(&op);
                Box::pin(async move { op(suite).await })
            }));
        }
        Ok(workload)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn expression_form_parses_to_a_bare_runner() {
        let spec = WorkloadSpec::parse("sleep:1ms").unwrap();
        assert_eq!(
            spec.runner,
            CodeBody::Op(OpSpec { name: "sleep".into(), arg: Some("1ms".into()) })
        );
        assert!(spec.init.is_none());
        assert_eq!(spec.label(), "sleep:1ms");
    }

    #[test]
    fn structured_form_parses_hooks() {
        let spec =
            WorkloadSpec::parse(r#"{"runner":"spin:100","init":"noop","name":"spinny"}"#).unwrap();
        assert_eq!(spec.label(), "spinny");
        assert_eq!(spec.init, Some(CodeBody::Op(OpSpec { name: "noop".into(), arg: None })));
        assert!(matches!(spec.runner, CodeBody::Op(_)));
    }

    #[test]
    fn unknown_op_reports_an_argument_error() {
        let err = WorkloadSpec::parse("frobnicate").unwrap_err();
        assert!(matches!(err, Error::ArgParse(_)));
    }

    #[test]
    fn trace_file_parses_as_a_replay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["noop", "spin:10"]"#).unwrap();
        let spec = WorkloadSpec::parse(file.path().to_str().unwrap()).unwrap();
        match &spec.runner {
            CodeBody::Trace(ops) => assert_eq!(ops.len(), 2),
            other => panic!("expected a trace, got {other:?}"),
        }
    }

    #[test]
    fn empty_trace_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        let err = WorkloadSpec::parse(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::ArgParse(_)));
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = WorkloadSpec::parse(r#"{"runner":"hash:32","done":"noop"}"#).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: WorkloadSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn instantiated_workloads_keep_their_spec() {
        let spec = WorkloadSpec::parse("noop").unwrap();
        let workload = spec.instantiate().unwrap();
        assert_eq!(workload.spec(), Some(&spec));
        assert_eq!(workload.name(), "noop");
    }

    #[test]
    fn state_downcasts_by_type() {
        let state = State::of(42u32);
        assert_eq!(state.get::<u32>(), Some(&42));
        assert_eq!(state.get::<String>(), None);
        assert!(State::empty().is_empty());
    }
}
