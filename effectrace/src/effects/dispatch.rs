//! # Dispatch Engine
//!
//! Runs a traced program on a [`HandlerStack`]. Primitive equations are
//! evaluated in place; control equations manipulate the stack:
//!
//! | Equation       | Effect on the stack                                  |
//! |----------------|------------------------------------------------------|
//! | `handle`       | push the scope body with a new frame                 |
//! | `perform`      | split at the handling frame, push the clause         |
//! | `resume`       | restore the segment with a new parameter             |
//! | `resume_local` | restore the segment with the frame bypassed          |
//!
//! When an activation runs off the end of its block it is popped and its
//! result is delivered to the activation below, whose pending equation
//! decides how many outputs it receives: a `handle` gets the result and the
//! final parameter, a `perform` or a resume gets the result only.
//!
//! A clause that returns without resuming drops its continuations; the
//! captured segment, and every frame in it, goes with them.
//!
//! A resume that is the last equation of its clause, and whose output is the
//! clause's result, is a tail resume: the clause is popped before the segment
//! is restored, and the scope delivers straight to the activation below.
//! Handlers that resume in tail position therefore run in constant depth.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::RuntimeConfig;
use crate::error::{EffectError, Result};
use crate::trace::eval::{eval_primitive, Primitive};
use crate::trace::{Array, BlockId, ContinuationKind, Op, Program, Var};

use super::continuation::ContinuationRef;
use super::declaration::EffectHandle;
use super::handler::HandlerTable;
use super::stack::{Activation, HandlerFrame, HandlerStack, Role, Slot};

/// Counters collected while running a program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Effects dispatched to a handler clause.
    pub dispatches: usize,
    /// Continuations resumed, through either view.
    pub resumes: usize,
    /// Equations executed, control equations included.
    pub equations: usize,
    /// Deepest activation stack reached.
    pub max_depth: usize,
}

/// Run `program` on `args` with an empty handler stack.
pub(crate) fn run(
    program: &Program,
    args: &[Array],
    config: &RuntimeConfig,
) -> Result<(Array, DispatchStats)> {
    program.check_args(args)?;
    let mut machine = Machine {
        program,
        check_shapes: config.check_shapes,
        stack: HandlerStack::new(config.max_stack_depth),
        stats: DispatchStats::default(),
        next_frame: 0,
    };

    let root = program.block(program.root());
    let mut activation = Activation::new(program.root(), root.num_slots(), Role::Root);
    for (var, arg) in root.inputs().iter().zip(args) {
        activation.write(*var, Slot::Array(arg.clone()))?;
    }
    machine.stack.push(activation)?;

    let result = machine.run()?;
    let mut stats = machine.stats;
    stats.max_depth = machine.stack.high_water();
    Ok((result, stats))
}

struct Machine<'p> {
    program: &'p Program,
    check_shapes: bool,
    stack: HandlerStack,
    stats: DispatchStats,
    next_frame: u64,
}

impl<'p> Machine<'p> {
    fn run(&mut self) -> Result<Array> {
        let program = self.program;
        loop {
            let top = self.stack.top()?;
            let block = program.block(top.block);

            let Some(eqn) = block.eqns().get(top.pc) else {
                let finished = self.stack.pop()?;
                let result = finished.read_array(block.output())?;
                match finished.role {
                    Role::Root => return Ok(result),
                    Role::Scope { frame, .. } => {
                        debug!(frame = frame.id, parameter = %frame.parameter, "scope complete");
                        *frame.outcome.borrow_mut() = Some(frame.parameter.clone());
                        self.deliver(result, Some(frame.parameter))?;
                    }
                    Role::Clause {
                        outcome,
                        entry_parameter,
                    } => {
                        let parameter = outcome
                            .borrow_mut()
                            .get_or_insert(entry_parameter)
                            .clone();
                        trace!(%result, "clause complete");
                        self.deliver(result, Some(parameter))?;
                    }
                }
                continue;
            };

            self.stats.equations += 1;
            trace!(op = eqn.op.name(), block = %top.block, pc = top.pc, "step");
            match eval_primitive(&eqn.op, |v| top.read_array(v))? {
                Primitive::Value(value) => {
                    let out = eqn
                        .outputs
                        .first()
                        .ok_or_else(|| EffectError::internal("value equation without output"))?;
                    let top = self.stack.top_mut()?;
                    top.write(*out, Slot::Array(value))?;
                    top.pc += 1;
                }
                Primitive::Unit => self.stack.top_mut()?.pc += 1,
                Primitive::Control => self.control(&eqn.op)?,
            }
        }
    }

    fn control(&mut self, op: &'p Op) -> Result<()> {
        match op {
            Op::Handle { table, init, body } => self.enter(table, *init, *body),
            Op::Perform { effect, args } => self.dispatch(effect, args),
            Op::Resume {
                k,
                parameter,
                value,
            } => {
                let tail = self.in_tail_position()?;
                let top = self.stack.top()?;
                let k = top.read_continuation(*k, ContinuationKind::Full)?;
                let parameter = top.read_array(*parameter)?;
                let value = top.read_array(*value)?;
                self.resume(&k, Some(parameter), value, tail)
            }
            Op::ResumeLocal { lk, value } => {
                let tail = self.in_tail_position()?;
                let top = self.stack.top()?;
                let lk = top.read_continuation(*lk, ContinuationKind::Local)?;
                let value = top.read_array(*value)?;
                self.resume(&lk, None, value, tail)
            }
            other => Err(EffectError::internal(format!(
                "`{}` is not a control operation",
                other.name()
            ))),
        }
    }

    /// Start a handler scope. The `handle` equation stays pending until the
    /// scope delivers its result.
    fn enter(&mut self, table: &Rc<HandlerTable>, init: Var, body: BlockId) -> Result<()> {
        let program = self.program;
        let top = self.stack.top()?;
        let parameter = top.read_array(init)?;

        let mut clause_env = Vec::with_capacity(table.clauses().len());
        for clause in table.clauses() {
            let captured = program
                .block(clause.block)
                .captures()
                .iter()
                .map(|(outer, _)| top.read(*outer).cloned())
                .collect::<Result<Vec<_>>>()?;
            clause_env.push(captured);
        }

        let body_block = program.block(body);
        let mut scope = Activation::new(
            body,
            body_block.num_slots(),
            Role::Scope {
                frame: HandlerFrame {
                    id: self.next_frame,
                    table: Rc::clone(table),
                    parameter,
                    clause_env,
                    outcome: Rc::new(RefCell::new(None)),
                },
                bypassed: false,
            },
        );
        for (outer, local) in body_block.captures() {
            scope.write(*local, top.read(*outer)?.clone())?;
        }

        debug!(frame = self.next_frame, %body, depth = self.stack.len(), "enter scope");
        self.next_frame += 1;
        self.stack.push(scope)
    }

    /// Hand a perform to the innermost frame that handles it.
    fn dispatch(&mut self, effect: &EffectHandle, args: &[Var]) -> Result<()> {
        let program = self.program;
        let top = self.stack.top()?;
        let values = args
            .iter()
            .map(|&a| top.read_array(a))
            .collect::<Result<Vec<_>>>()?;

        let index = self
            .stack
            .find_handler(effect.id())
            .ok_or_else(|| EffectError::UnhandledEffect {
                effect: effect.name().to_string(),
            })?;
        let segment = self.stack.split_off(index)?;
        let frame = segment.frame()?;

        let avals: Vec<_> = values.iter().map(Array::aval).collect();
        let clause_index = frame.table.lookup(effect.id(), &avals).ok_or_else(|| {
            EffectError::MissingClause {
                effect: effect.name().to_string(),
                signature: avals
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })?;
        let clause = frame
            .table
            .clause(clause_index)
            .ok_or_else(|| EffectError::internal("clause index out of range"))?;
        let block = program.block(clause.block);
        let captured = frame
            .clause_env
            .get(clause_index)
            .cloned()
            .unwrap_or_default();
        let entry_parameter = frame.parameter.clone();
        let outcome = Rc::clone(&frame.outcome);
        let frame_id = frame.id;

        let mut activation = Activation::new(
            clause.block,
            block.num_slots(),
            Role::Clause {
                outcome,
                entry_parameter: entry_parameter.clone(),
            },
        );
        let [param_var, arg_vars @ .., k_var, lk_var] = block.inputs() else {
            return Err(EffectError::internal("clause block has too few inputs"));
        };
        if arg_vars.len() != values.len() {
            return Err(EffectError::internal("clause arity differs from perform"));
        }
        activation.write(*param_var, Slot::Array(entry_parameter))?;
        for (var, value) in arg_vars.iter().zip(values) {
            activation.write(*var, Slot::Array(value))?;
        }
        for ((_, local), value) in block.captures().iter().zip(captured) {
            activation.write(*local, value)?;
        }

        let (k, lk) = ContinuationRef::capture(segment, effect.name());
        debug!(
            effect = effect.name(),
            frame = frame_id,
            continuation = %k.id(),
            depth = self.stack.len(),
            "dispatch"
        );
        activation.write(*k_var, Slot::Continuation(k))?;
        activation.write(*lk_var, Slot::Continuation(lk))?;

        self.stats.dispatches += 1;
        self.stack.push(activation)
    }

    /// Whether the pending equation of the top activation is a clause's
    /// final equation producing the clause's result.
    fn in_tail_position(&self) -> Result<bool> {
        let top = self.stack.top()?;
        if !matches!(top.role, Role::Clause { .. }) {
            return Ok(false);
        }
        let block = self.program.block(top.block);
        let last = top.pc + 1 == block.eqns().len();
        Ok(last
            && block
                .eqns()
                .get(top.pc)
                .is_some_and(|eqn| eqn.outputs.as_slice() == [block.output()]))
    }

    /// Put a captured segment back on the stack and deliver `value` to the
    /// perform it was captured at. `parameter` is `Some` for a full resume.
    /// With `tail` set the resuming clause is popped first.
    fn resume(
        &mut self,
        k: &ContinuationRef,
        parameter: Option<Array>,
        value: Array,
        tail: bool,
    ) -> Result<()> {
        let mut segment = k.take()?;
        let (frame, bypassed) = segment.frame_mut()?;
        match parameter {
            Some(parameter) => {
                if self.check_shapes && parameter.aval() != frame.parameter.aval() {
                    return Err(EffectError::shape_mismatch(
                        "resume parameter",
                        &frame.parameter.aval(),
                        &parameter.aval(),
                    ));
                }
                frame.parameter = parameter;
                *bypassed = false;
            }
            None => *bypassed = true,
        }
        debug!(
            continuation = %k.id(),
            kind = k.kind().name(),
            frame = frame.id,
            parameter = %frame.parameter,
            tail,
            "resume"
        );

        self.stats.resumes += 1;
        if tail {
            self.stack.pop()?;
        }
        self.stack.restore(segment)?;
        self.deliver(value, None)
    }

    /// Write a completed activation's result into the pending equation of
    /// the new top activation and step past it.
    fn deliver(&mut self, result: Array, parameter: Option<Array>) -> Result<()> {
        let program = self.program;
        let check_shapes = self.check_shapes;
        let top = self.stack.top_mut()?;
        let block = program.block(top.block);
        let eqn = block
            .eqns()
            .get(top.pc)
            .ok_or_else(|| EffectError::internal("delivery to an activation with no pending equation"))?;

        let values = match &eqn.op {
            Op::Handle { .. } => {
                let parameter = parameter
                    .ok_or_else(|| EffectError::internal("scope result delivered without parameter"))?;
                vec![result, parameter]
            }
            Op::Perform { .. } | Op::Resume { .. } | Op::ResumeLocal { .. } => vec![result],
            other => {
                return Err(EffectError::internal(format!(
                    "delivery to non-control `{}`",
                    other.name()
                )))
            }
        };

        for (out, value) in eqn.outputs.iter().zip(values) {
            if check_shapes {
                let expected = block.aval(*out).expect_array()?;
                let found = value.aval();
                if *expected != found {
                    return Err(EffectError::shape_mismatch(
                        format!("result of `{}`", eqn.op.name()),
                        expected,
                        &found,
                    ));
                }
            }
            top.write(*out, Slot::Array(value))?;
        }
        top.pc += 1;
        Ok(())
    }
}
