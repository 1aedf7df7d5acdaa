//! # Tracing Host
//!
//! The numerical host the effect runtime is embedded in: array values and
//! their abstract values, the block-structured program representation, the
//! tracer that records programs, and a plain evaluator for programs that
//! install no handlers.
//!
//! | Module    | Contents                                          |
//! |-----------|---------------------------------------------------|
//! | `value`   | `DType`, `ShapedArray`, `Array`, primitive kernels |
//! | `ir`      | `Program`, `Block`, `Eqn`, `Op`, `Var`             |
//! | `tracer`  | `Tracer`, `ScopeGuard`, `Cont`, `LocalCont`        |
//! | `eval`    | `Program::evaluate`, shared primitive evaluation   |

pub mod eval;
pub mod ir;
pub mod tracer;
pub mod value;

pub use ir::{
    AbstractValue, Block, BlockId, BlockKind, ContinuationKind, ContinuationType, Eqn, Op, Program,
    Var,
};
pub use tracer::{Cont, LocalCont, ScopeGuard, Scoped, Tracer};
pub use value::{Array, BinaryOp, DType, ShapedArray, UnaryOp};
