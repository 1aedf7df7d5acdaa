//! # effectrace
//!
//! Parameterized algebraic effect handlers for traced numerical programs.
//!
//! A computation is traced into a small block-structured IR. Inside it,
//! declared effects are performed without an implementation; handler scopes
//! installed around the computation interpret them when the program runs.
//! Handlers receive the scope's parameter, the effect arguments, and two
//! continuations: `k` resumes the rest of the scope with the handler still
//! installed, `lk` resumes it with the handler bypassed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          EFFECTRACE                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │    Tracer    │──▶│   Program    │──▶│   Dispatch   │         │
//! │  │ (tracer.rs)  │   │   (ir.rs)    │   │ (dispatch.rs)│         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         │                                      │                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ Declarations │   │   Handlers   │   │ Continuations│         │
//! │  │(declaration) │   │ (handler.rs) │   │  & Stack     │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use effectrace::{effectify, Array, EffectRegistry, Handlers, ShapedArray, DType};
//!
//! let mut registry = EffectRegistry::new();
//! let get = registry.declare("state_get", 0, |_| Ok(ShapedArray::scalar(DType::I32)));
//!
//! let program = effectify(move |tb, args| {
//!     let handlers = Handlers::new().on(&get, |tb, s, _args, k, _lk| tb.resume(k, s, s));
//!     let scoped = tb.handle(args[0], handlers, |tb| {
//!         let a = get.perform(tb, &[])?;
//!         tb.add(a, a)
//!     })?;
//!     Ok(scoped.result)
//! });
//!
//! assert_eq!(program.call(&[Array::from(3)])?, Array::from(6));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod demos;
pub mod effects;
pub mod error;
pub mod trace;

// Re-exports
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use effects::{
    declare_effect, effectify, trace_fn, ContinuationId, DispatchStats, EffectDeclaration,
    EffectHandle, EffectId, EffectRegistry, Effectified, HandlerFn, HandlerTable, Handlers,
};
pub use error::{EffectError, Result};
pub use trace::{
    AbstractValue, Array, BinaryOp, BlockId, Cont, ContinuationKind, ContinuationType, DType,
    LocalCont, Program, ScopeGuard, Scoped, ShapedArray, Tracer, UnaryOp, Var,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
