//! Plain evaluation of traced programs.
//!
//! [`Program::evaluate`] runs a program that installs no handlers. It is the
//! baseline the dispatch engine is checked against: for effect-free programs
//! both must agree. Control operations are rejected with
//! [`EffectError::RequiresEffectify`].

use tracing::{info, trace};

use crate::error::{EffectError, Result};

use super::ir::{Op, Program, Var};
use super::value::{self, Array};

/// Outcome of evaluating one equation.
pub(crate) enum Primitive {
    /// The equation produced a value for its single output.
    Value(Array),
    /// The equation has no outputs.
    Unit,
    /// The equation transfers control and must be run by the dispatch engine.
    Control,
}

/// Evaluate a non-control operation, reading operands through `read`.
pub(crate) fn eval_primitive<R>(op: &Op, read: R) -> Result<Primitive>
where
    R: Fn(Var) -> Result<Array>,
{
    let value = match op {
        Op::Literal(value) => value.clone(),
        Op::Unary { op, operand } => op.apply(&read(*operand)?)?,
        Op::Binary { op, lhs, rhs } => op.apply(&read(*lhs)?, &read(*rhs)?)?,
        Op::Select {
            pred,
            on_true,
            on_false,
        } => value::select(&read(*pred)?, &read(*on_true)?, &read(*on_false)?)?,
        Op::Convert { operand, dtype } => value::convert(&read(*operand)?, *dtype)?,
        Op::Stack { operands } => {
            let values = operands.iter().map(|&v| read(v)).collect::<Result<Vec<_>>>()?;
            value::stack(&values)?
        }
        Op::DebugPrint { format, args } => {
            let values = args.iter().map(|&a| read(a)).collect::<Result<Vec<_>>>()?;
            info!(target: "effectrace::debug_print", "{}", render(format, &values));
            return Ok(Primitive::Unit);
        }
        Op::Perform { .. } | Op::Handle { .. } | Op::Resume { .. } | Op::ResumeLocal { .. } => {
            return Ok(Primitive::Control)
        }
    };
    Ok(Primitive::Value(value))
}

/// Fill the `{}` placeholders of `format` with `values`, in order.
pub(crate) fn render(format: &str, values: &[Array]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut values = values.iter();
    let mut pieces = format.split("{}").peekable();
    while let Some(piece) = pieces.next() {
        out.push_str(piece);
        if pieces.peek().is_some() {
            match values.next() {
                Some(v) => out.push_str(&v.to_string()),
                None => out.push_str("{}"),
            }
        }
    }
    out
}

impl Program {
    /// Evaluate a program that performs no effects and installs no handlers.
    pub fn evaluate(&self, args: &[Array]) -> Result<Array> {
        self.check_args(args)?;
        let root = self.block(self.root);
        let mut env: Vec<Option<Array>> = vec![None; root.num_slots()];
        for (var, arg) in root.inputs.iter().zip(args) {
            env[var.slot()] = Some(arg.clone());
        }

        for eqn in &root.eqns {
            trace!(op = eqn.op.name(), "evaluate");
            let read = |v: Var| {
                env.get(v.slot())
                    .and_then(Option::clone)
                    .ok_or_else(|| EffectError::internal(format!("{v} read before it was written")))
            };
            match eval_primitive(&eqn.op, read)? {
                Primitive::Value(value) => {
                    let out = eqn
                        .outputs
                        .first()
                        .ok_or_else(|| EffectError::internal("value equation without output"))?;
                    env[out.slot()] = Some(value);
                }
                Primitive::Unit => {}
                Primitive::Control => {
                    return Err(EffectError::RequiresEffectify { op: eqn.op.name() })
                }
            }
        }

        env.get(root.output.slot())
            .and_then(Option::clone)
            .ok_or_else(|| EffectError::internal("program output was never written"))
    }
}
