//! # Effect Handling
//!
//! Declared effects, parameterized handlers, and the engine that runs traced
//! programs with handlers installed.
//!
//! ## Overview
//!
//! An effect is declared with [`declare_effect`] and performed while tracing.
//! A handler scope is installed with [`Tracer::handle`](crate::Tracer::handle)
//! or [`Tracer::enter_scope`](crate::Tracer::enter_scope); its clauses are
//! traced into the program alongside the body. [`effectify`] runs such a
//! program:
//!
//! ```text
//! perform E(args)
//!      │
//!      ▼
//! scan stack top-down ──▶ no frame claims E ──▶ UnhandledEffect
//!      │
//!      ▼ frame F
//! split stack at F ──▶ segment (F .. perform)
//!      │
//!      ▼
//! push clause(F.parameter, args, k, lk)
//!      │
//!      ├── resume(k, P, V)       F.parameter = P, segment back on top
//!      ├── resume_local(lk, V)   F bypassed, segment back on top
//!      └── return R              segment dropped, R is the scope result
//! ```
//!
//! ## Parameters
//!
//! Each frame owns a parameter: state threaded through resumptions that is
//! separate from program data. Clauses receive the current value and choose
//! the next one when resuming with `k`. The scope's second output is the
//! parameter when the scope ended; if a clause returns without resuming, that
//! is the parameter the clause was entered with.
//!
//! ## Continuations
//!
//! Continuations are one-shot, and `k` and `lk` of one capture share that
//! shot. See [`continuation`] for the representation.

pub mod continuation;
pub mod declaration;
pub mod dispatch;
pub mod effectify;
pub mod handler;
pub(crate) mod stack;

pub use continuation::ContinuationId;
pub use declaration::{
    declare_effect, AbstractEvalFn, EffectDeclaration, EffectHandle, EffectId, EffectRegistry,
};
pub use dispatch::DispatchStats;
pub use effectify::{effectify, trace_fn, Effectified};
pub use handler::{Clause, HandlerFn, HandlerTable, Handlers};
