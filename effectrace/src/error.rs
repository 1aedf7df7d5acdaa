//! Errors raised while tracing or evaluating effectful programs.
//!
//! Every error here is a programming error in the traced program or its
//! handlers. Nothing is retried; errors propagate to the caller of the
//! outermost [`Effectified::call`](crate::Effectified::call).

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::effects::ContinuationId;
use crate::trace::{DType, Var};

/// Result type alias used throughout the crate.
pub type Result<T, E = EffectError> = std::result::Result<T, E>;

/// Errors produced by the tracer, the plain evaluator and the dispatch engine.
#[derive(Debug, Error)]
pub enum EffectError {
    /// An effect reached the bottom of the handler stack.
    #[error("unhandled effect `{effect}`: no enclosing handler scope handles it")]
    UnhandledEffect {
        /// Name of the performed effect.
        effect: String,
    },

    /// A value disagrees with the abstract value its slot was traced with.
    #[error("shape mismatch in {context}: expected `{expected}`, found `{found}`")]
    ShapeMismatch {
        /// Where the check failed.
        context: String,
        /// Abstract value the slot was traced with.
        expected: String,
        /// Abstract value actually supplied.
        found: String,
    },

    /// A continuation was resumed after its segment had already been taken.
    #[error("continuation {id} captured at `{effect}` was already resumed")]
    ContinuationConsumed {
        /// The continuation resumed twice.
        id: ContinuationId,
        /// Effect whose perform captured it.
        effect: String,
    },

    /// Wrong number of arguments for an effect, a program or a format string.
    #[error("`{name}` takes {expected} argument(s) but {found} were supplied")]
    Arity {
        /// What was called.
        name: String,
        /// Declared argument count.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },

    /// A variable was used outside the block that defines it.
    #[error("{var} is not visible here: the block defining it is no longer open")]
    EscapedVar {
        /// The out-of-scope variable.
        var: Var,
    },

    /// An array was required.
    #[error("expected an array, found `{found}`")]
    NotAnArray {
        /// Description of what was found instead.
        found: String,
    },

    /// A continuation of the given kind was required.
    #[error("expected a {expected} continuation, found `{found}`")]
    NotAContinuation {
        /// `"full"` or `"local"`.
        expected: &'static str,
        /// Description of what was found instead.
        found: String,
    },

    /// Plain evaluation met an operation that needs the dispatch engine.
    #[error("`{op}` can only be evaluated through `effectify`")]
    RequiresEffectify {
        /// Name of the control operation.
        op: &'static str,
    },

    /// A frame claims an effect but has no clause for this argument signature.
    #[error("no handler clause for `{effect}` with arguments ({signature})")]
    MissingClause {
        /// Name of the performed effect.
        effect: String,
        /// Comma-separated abstract values of the arguments.
        signature: String,
    },

    /// The activation stack grew past the configured limit.
    #[error("activation stack exceeded the configured limit of {limit}")]
    StackOverflow {
        /// The configured `max_stack_depth`.
        limit: usize,
    },

    /// Integer `div` with a zero divisor.
    #[error("integer division by zero")]
    DivisionByZero,

    /// A primitive applied to a dtype it has no kernel for.
    #[error("`{op}` does not support dtype `{dtype}`")]
    UnsupportedDType {
        /// Name of the primitive.
        op: &'static str,
        /// The rejected dtype.
        dtype: DType,
    },

    /// Array construction with a buffer that does not fit its shape.
    #[error("malformed array: {message}")]
    MalformedArray {
        /// What is wrong with it.
        message: String,
    },

    /// A broken engine invariant. Traced programs never trigger this.
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid runtime configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EffectError {
    /// Build a [`EffectError::ShapeMismatch`] from two displayable values.
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: &impl fmt::Display,
        found: &impl fmt::Display,
    ) -> Self {
        EffectError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        EffectError::Internal(message.into())
    }

    /// Whether this is an [`EffectError::UnhandledEffect`].
    pub fn is_unhandled(&self) -> bool {
        matches!(self, EffectError::UnhandledEffect { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{DType, ShapedArray};

    #[test]
    fn test_shape_mismatch_message() {
        let err = EffectError::shape_mismatch(
            "resume value",
            &ShapedArray::scalar(DType::I32),
            &ShapedArray::new(vec![2], DType::F32),
        );
        assert_eq!(
            err.to_string(),
            "shape mismatch in resume value: expected `i32[]`, found `f32[2]`"
        );
    }

    #[test]
    fn test_is_unhandled() {
        let err = EffectError::UnhandledEffect {
            effect: "state_get".to_string(),
        };
        assert!(err.is_unhandled());
        assert!(!EffectError::DivisionByZero.is_unhandled());
    }
}
