//! # Effectify
//!
//! [`effectify`] turns a tracing function into something callable on arrays.
//! Each call traces the function for the argument signature (once, when the
//! trace cache is on) and runs the program through the dispatch engine with
//! an empty handler stack, so every perform is interpreted by a handler
//! installed inside the function or fails as unhandled.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::trace::{Array, Program, ShapedArray, Tracer, Var};

use super::dispatch::{self, DispatchStats};

/// Trace `f` for arguments of the given abstract values.
pub fn trace_fn<F>(f: F, avals: &[ShapedArray]) -> Result<Program>
where
    F: FnOnce(&mut Tracer, &[Var]) -> Result<Var>,
{
    let (mut tracer, inputs) = Tracer::new(avals);
    let output = f(&mut tracer, &inputs)?;
    tracer.finish(output)
}

/// Wrap a tracing function so that its effects are handled when it runs.
pub fn effectify<F>(f: F) -> Effectified<F>
where
    F: Fn(&mut Tracer, &[Var]) -> Result<Var>,
{
    Effectified {
        f,
        config: RuntimeConfig::default(),
        cache: RefCell::new(FxHashMap::default()),
    }
}

/// A tracing function together with its runtime configuration and traces.
pub struct Effectified<F> {
    f: F,
    config: RuntimeConfig,
    cache: RefCell<FxHashMap<Vec<ShapedArray>, Rc<Program>>>,
}

impl<F> Effectified<F>
where
    F: Fn(&mut Tracer, &[Var]) -> Result<Var>,
{
    /// Replace the runtime configuration. Cached traces are kept.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Configuration used for every call.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The program traced for arguments of the given abstract values.
    pub fn trace(&self, avals: &[ShapedArray]) -> Result<Rc<Program>> {
        if self.config.trace_cache {
            if let Some(program) = self.cache.borrow().get(avals) {
                debug!(signature = %signature(avals), "trace cache hit");
                return Ok(Rc::clone(program));
            }
        }

        debug!(signature = %signature(avals), "tracing");
        let program = Rc::new(trace_fn(&self.f, avals)?);
        if self.config.trace_cache {
            self.cache
                .borrow_mut()
                .insert(avals.to_vec(), Rc::clone(&program));
        }
        Ok(program)
    }

    /// Trace for `args` and run with handlers interpreting every effect.
    pub fn call(&self, args: &[Array]) -> Result<Array> {
        self.call_with_stats(args).map(|(value, _)| value)
    }

    /// Like [`Effectified::call`], also returning dispatch counters.
    pub fn call_with_stats(&self, args: &[Array]) -> Result<(Array, DispatchStats)> {
        let avals: Vec<_> = args.iter().map(Array::aval).collect();
        let program = self.trace(&avals)?;
        let (value, stats) = dispatch::run(&program, args, &self.config)?;
        debug!(
            dispatches = stats.dispatches,
            resumes = stats.resumes,
            equations = stats.equations,
            max_depth = stats.max_depth,
            "call complete"
        );
        Ok((value, stats))
    }

    /// Trace the function into an enclosing trace. Its effects are then
    /// handled by the handlers in scope at `tracer`.
    pub fn inline(&self, tracer: &mut Tracer, args: &[Var]) -> Result<Var> {
        (self.f)(tracer, args)
    }

    /// Number of argument signatures with a cached trace.
    pub fn cached_signatures(&self) -> usize {
        self.cache.borrow().len()
    }
}

fn signature(avals: &[ShapedArray]) -> String {
    avals
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
