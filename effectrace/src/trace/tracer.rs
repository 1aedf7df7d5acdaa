//! # Tracer
//!
//! Records a computation as a [`Program`]. Every primitive is abstractly
//! evaluated when it is recorded, so shape and dtype errors surface at trace
//! time with the offending operation named.
//!
//! ## Blocks
//!
//! The tracer keeps a stack of open blocks. Recording always appends to the
//! innermost one. Using a variable of an enclosing open block adds a capture
//! to every block between the two, so each block only ever reads its own
//! slots. Variables of closed blocks are rejected with
//! [`EffectError::EscapedVar`].
//!
//! ## Handler scopes
//!
//! [`Tracer::enter_scope`] opens a scope body and returns a [`ScopeGuard`].
//! [`ScopeGuard::finish`] closes the body, then traces one clause block per
//! distinct `(effect, argument signature)` the body can perform:
//!
//! ```text
//! enter_scope(init, handlers)      finish(result)
//!        │                               │
//!        ▼                               ▼
//!  open body ── trace body ── close body ── walk body tree for performs
//!                                               │
//!                                               ▼
//!                              trace clause(param, args.., k, lk) per signature
//!                                               │
//!                                               ▼
//!                              emit `handle` in the enclosing block
//! ```
//!
//! A guard dropped before `finish` discards the body and everything traced
//! inside it.

use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::effects::{Clause, EffectHandle, EffectId, HandlerTable, Handlers};
use crate::error::{EffectError, Result};

use super::ir::{
    AbstractValue, Block, BlockId, BlockKind, ContinuationKind, ContinuationType, Eqn, Op, Program,
    Var,
};
use super::value::{self, Array, BinaryOp, DType, ShapedArray, UnaryOp};

/// A full continuation, as seen by a handler clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cont(pub(crate) Var);

impl Cont {
    /// The clause input holding this continuation.
    pub fn var(self) -> Var {
        self.0
    }
}

/// A local continuation, as seen by a handler clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCont(pub(crate) Var);

impl LocalCont {
    /// The clause input holding this continuation.
    pub fn var(self) -> Var {
        self.0
    }
}

/// Outputs of a handler scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scoped {
    /// The value the scope evaluated to.
    pub result: Var,
    /// The handler parameter when the scope ended.
    pub parameter: Var,
}

#[derive(Debug)]
struct OpenBlock {
    id: BlockId,
    /// Unique per opened block; ids are reused after an abandoned scope.
    generation: u32,
    kind: BlockKind,
    parent: Option<BlockId>,
    inputs: Vec<Var>,
    captures: Vec<(Var, Var)>,
    /// Outer variable to local capture slot.
    capture_map: FxHashMap<Var, Var>,
    eqns: Vec<Eqn>,
    avals: Vec<AbstractValue>,
}

impl OpenBlock {
    fn new(id: BlockId, generation: u32, kind: BlockKind, parent: Option<BlockId>) -> Self {
        Self {
            id,
            generation,
            kind,
            parent,
            inputs: Vec::new(),
            captures: Vec::new(),
            capture_map: FxHashMap::default(),
            eqns: Vec::new(),
            avals: Vec::new(),
        }
    }

    fn new_var(&mut self, aval: AbstractValue) -> Var {
        let var = Var {
            block: self.id,
            index: self.avals.len() as u32,
            generation: self.generation,
        };
        self.avals.push(aval);
        var
    }

    /// Whether `var` was defined in this block, not in an abandoned block
    /// that had the same id.
    fn owns(&self, var: Var) -> bool {
        self.id == var.block && self.generation == var.generation
    }

    fn close(self, output: Var) -> Block {
        Block {
            kind: self.kind,
            parent: self.parent,
            inputs: self.inputs,
            captures: self.captures,
            eqns: self.eqns,
            output,
            avals: self.avals,
        }
    }
}

/// Records traced computations.
#[derive(Debug)]
pub struct Tracer {
    /// Closed blocks; an id is reserved when its block opens.
    blocks: Vec<Option<Block>>,
    open: Vec<OpenBlock>,
    next_generation: u32,
}

impl Tracer {
    /// Start tracing a function of the given argument abstract values.
    pub(crate) fn new(avals: &[ShapedArray]) -> (Self, Vec<Var>) {
        let mut root = OpenBlock::new(BlockId(0), 0, BlockKind::Root, None);
        let inputs: Vec<Var> = avals
            .iter()
            .map(|aval| root.new_var(aval.clone().into()))
            .collect();
        root.inputs = inputs.clone();
        let tracer = Self {
            blocks: vec![None],
            open: vec![root],
            next_generation: 1,
        };
        (tracer, inputs)
    }

    /// Close the root block and return the finished program.
    pub(crate) fn finish(mut self, output: Var) -> Result<Program> {
        if self.open.len() != 1 {
            return Err(EffectError::internal(format!(
                "{} block(s) still open at the end of tracing",
                self.open.len() - 1
            )));
        }
        let output = self.resolve(output)?;
        self.aval(output)?.expect_array()?;
        let root = self.close_block(output)?;
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, b)| b.ok_or_else(|| EffectError::internal(format!("block b{i} never closed"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Program { blocks, root })
    }

    /// Number of handler scopes enclosing the current recording point.
    pub fn handler_depth(&self) -> usize {
        self.open
            .iter()
            .filter(|b| b.kind == BlockKind::ScopeBody)
            .count()
    }

    /// Abstract value of a variable visible at the current recording point.
    pub fn aval_of(&mut self, var: Var) -> Result<AbstractValue> {
        let var = self.resolve(var)?;
        self.aval(var).cloned()
    }

    /// Array abstract value of a variable visible at the current recording point.
    pub fn shape_of(&mut self, var: Var) -> Result<ShapedArray> {
        let var = self.resolve(var)?;
        self.aval(var)?.expect_array().cloned()
    }

    // ------------------------------------------------------------------
    // Block bookkeeping
    // ------------------------------------------------------------------

    fn open_block(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(None);
        let generation = self.next_generation;
        self.next_generation += 1;
        let parent = self.open.last().map(|b| b.id);
        self.open.push(OpenBlock::new(id, generation, kind, parent));
        id
    }

    fn close_block(&mut self, output: Var) -> Result<BlockId> {
        let block = self
            .open
            .pop()
            .ok_or_else(|| EffectError::internal("no open block to close"))?;
        let id = block.id;
        let slot = self
            .blocks
            .get_mut(id.index())
            .ok_or_else(|| EffectError::internal(format!("{id} was never reserved")))?;
        *slot = Some(block.close(output));
        Ok(id)
    }

    /// Discard every block opened at or after `depth` and `first`.
    fn abandon(&mut self, depth: usize, first: BlockId) {
        self.open.truncate(depth);
        self.blocks.truncate(first.index());
    }

    fn top(&mut self) -> Result<&mut OpenBlock> {
        self.open
            .last_mut()
            .ok_or_else(|| EffectError::internal("no open block"))
    }

    fn add_input(&mut self, aval: AbstractValue) -> Result<Var> {
        let block = self.top()?;
        let var = block.new_var(aval);
        block.inputs.push(var);
        Ok(var)
    }

    fn aval(&self, var: Var) -> Result<&AbstractValue> {
        let block = self
            .open
            .iter()
            .rev()
            .find(|b| b.owns(var))
            .ok_or(EffectError::EscapedVar { var })?;
        block
            .avals
            .get(var.slot())
            .ok_or(EffectError::EscapedVar { var })
    }

    /// Make `var` readable from the innermost open block.
    fn resolve(&mut self, var: Var) -> Result<Var> {
        let pos = self
            .open
            .iter()
            .rposition(|b| b.owns(var))
            .ok_or(EffectError::EscapedVar { var })?;
        if var.slot() >= self.open[pos].avals.len() {
            return Err(EffectError::EscapedVar { var });
        }
        let mut current = var;
        for depth in pos + 1..self.open.len() {
            if let Some(&local) = self.open[depth].capture_map.get(&current) {
                current = local;
                continue;
            }
            let aval = self.open[depth - 1].avals[current.slot()].clone();
            let block = &mut self.open[depth];
            let local = block.new_var(aval);
            block.captures.push((current, local));
            block.capture_map.insert(current, local);
            current = local;
        }
        Ok(current)
    }

    fn resolve_all(&mut self, vars: &[Var]) -> Result<Vec<Var>> {
        vars.iter().map(|&v| self.resolve(v)).collect()
    }

    fn array_aval(&mut self, var: Var) -> Result<(Var, ShapedArray)> {
        let var = self.resolve(var)?;
        let aval = self.aval(var)?.expect_array()?.clone();
        Ok((var, aval))
    }

    fn emit(&mut self, op: Op, outputs: Vec<AbstractValue>) -> Result<Vec<Var>> {
        trace!(op = op.name(), "record");
        let block = self.top()?;
        let outputs: Vec<Var> = outputs.into_iter().map(|a| block.new_var(a)).collect();
        block.eqns.push(Eqn {
            op,
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    fn emit_one(&mut self, op: Op, aval: AbstractValue) -> Result<Var> {
        self.emit(op, vec![aval])?
            .pop()
            .ok_or_else(|| EffectError::internal("equation recorded without output"))
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    /// Record a constant.
    pub fn literal(&mut self, value: impl Into<Array>) -> Result<Var> {
        let value = value.into();
        let aval = value.aval();
        self.emit_one(Op::Literal(value), aval.into())
    }

    /// Record a binary primitive.
    pub fn binary(&mut self, op: BinaryOp, lhs: Var, rhs: Var) -> Result<Var> {
        let (lhs, lhs_aval) = self.array_aval(lhs)?;
        let (rhs, rhs_aval) = self.array_aval(rhs)?;
        let out = op.abstract_eval(&lhs_aval, &rhs_aval)?;
        self.emit_one(Op::Binary { op, lhs, rhs }, out.into())
    }

    /// `lhs + rhs`
    pub fn add(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// `lhs / rhs`; integer division by zero fails when the program runs.
    pub fn div(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    /// Element-wise maximum.
    pub fn max(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Max, lhs, rhs)
    }

    /// Element-wise minimum.
    pub fn min(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Min, lhs, rhs)
    }

    /// `lhs < rhs`, as `bool`.
    pub fn lt(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Lt, lhs, rhs)
    }

    /// `lhs == rhs`, as `bool`.
    pub fn eq(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        self.binary(BinaryOp::Eq, lhs, rhs)
    }

    /// Record a unary primitive.
    pub fn unary(&mut self, op: UnaryOp, operand: Var) -> Result<Var> {
        let (operand, aval) = self.array_aval(operand)?;
        let out = op.abstract_eval(&aval)?;
        self.emit_one(Op::Unary { op, operand }, out.into())
    }

    /// Arithmetic negation.
    pub fn neg(&mut self, operand: Var) -> Result<Var> {
        self.unary(UnaryOp::Neg, operand)
    }

    /// Logical negation.
    pub fn not(&mut self, operand: Var) -> Result<Var> {
        self.unary(UnaryOp::Not, operand)
    }

    /// Element-wise choice between two values of the same abstract value.
    pub fn select(&mut self, pred: Var, on_true: Var, on_false: Var) -> Result<Var> {
        let (pred, pred_aval) = self.array_aval(pred)?;
        let (on_true, true_aval) = self.array_aval(on_true)?;
        let (on_false, false_aval) = self.array_aval(on_false)?;
        let out = value::select_abstract_eval(&pred_aval, &true_aval, &false_aval)?;
        self.emit_one(
            Op::Select {
                pred,
                on_true,
                on_false,
            },
            out.into(),
        )
    }

    /// Convert to another dtype.
    pub fn convert(&mut self, operand: Var, dtype: DType) -> Result<Var> {
        let (operand, aval) = self.array_aval(operand)?;
        self.emit_one(Op::Convert { operand, dtype }, aval.with_dtype(dtype).into())
    }

    /// Stack operands of one abstract value along a new leading axis.
    pub fn stack(&mut self, operands: &[Var]) -> Result<Var> {
        let mut resolved = Vec::with_capacity(operands.len());
        let mut avals = Vec::with_capacity(operands.len());
        for &operand in operands {
            let (var, aval) = self.array_aval(operand)?;
            resolved.push(var);
            avals.push(aval);
        }
        let out = value::stack_abstract_eval(&avals)?;
        self.emit_one(Op::Stack { operands: resolved }, out.into())
    }

    /// Log a message when the program runs. Each `{}` in `format` is
    /// replaced by the next argument.
    pub fn debug_print(&mut self, format: &str, args: &[Var]) -> Result<()> {
        let placeholders = format.matches("{}").count();
        if placeholders != args.len() {
            return Err(EffectError::Arity {
                name: "debug_print".to_string(),
                expected: placeholders,
                found: args.len(),
            });
        }
        let mut resolved = Vec::with_capacity(args.len());
        for &arg in args {
            resolved.push(self.array_aval(arg)?.0);
        }
        self.emit(
            Op::DebugPrint {
                format: format.to_string(),
                args: resolved,
            },
            Vec::new(),
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Record an invocation of `effect`.
    pub fn perform(&mut self, effect: &EffectHandle, args: &[Var]) -> Result<Var> {
        let mut resolved = Vec::with_capacity(args.len());
        let mut avals = Vec::with_capacity(args.len());
        for &arg in args {
            let (var, aval) = self.array_aval(arg)?;
            resolved.push(var);
            avals.push(aval);
        }
        let out = effect.result_aval(&avals)?;
        self.emit_one(
            Op::Perform {
                effect: effect.clone(),
                args: resolved,
            },
            out.into(),
        )
    }

    /// Open a handler scope with the given initial parameter.
    pub fn enter_scope(&mut self, init: Var, handlers: Handlers) -> Result<ScopeGuard<'_>> {
        let (init, parameter) = self.array_aval(init)?;
        let depth = self.open.len();
        let body = self.open_block(BlockKind::ScopeBody);
        debug!(%body, effects = handlers.len(), "enter scope");
        Ok(ScopeGuard {
            tracer: self,
            depth,
            body,
            init,
            parameter,
            handlers,
            finished: false,
        })
    }

    /// Trace `body` inside a handler scope.
    pub fn handle<F>(&mut self, init: Var, handlers: Handlers, body: F) -> Result<Scoped>
    where
        F: FnOnce(&mut Tracer) -> Result<Var>,
    {
        let mut scope = self.enter_scope(init, handlers)?;
        let result = body(&mut *scope)?;
        scope.finish(result)
    }

    /// Resume a full continuation with a new handler parameter.
    ///
    /// The result is the value the handler scope evaluates to.
    pub fn resume(&mut self, k: Cont, parameter: Var, value: Var) -> Result<Var> {
        let (k, ty) = self.continuation(k.0, ContinuationKind::Full)?;
        let (parameter, parameter_aval) = self.array_aval(parameter)?;
        if parameter_aval != ty.parameter {
            return Err(EffectError::shape_mismatch(
                "resume parameter",
                &ty.parameter,
                &parameter_aval,
            ));
        }
        let (value, value_aval) = self.array_aval(value)?;
        if value_aval != ty.resume {
            return Err(EffectError::shape_mismatch(
                "resume value",
                &ty.resume,
                &value_aval,
            ));
        }
        self.emit_one(
            Op::Resume {
                k,
                parameter,
                value,
            },
            ty.result.into(),
        )
    }

    /// Resume a local continuation; the capturing handler stays bypassed.
    pub fn resume_local(&mut self, lk: LocalCont, value: Var) -> Result<Var> {
        let (lk, ty) = self.continuation(lk.0, ContinuationKind::Local)?;
        let (value, value_aval) = self.array_aval(value)?;
        if value_aval != ty.resume {
            return Err(EffectError::shape_mismatch(
                "resume value",
                &ty.resume,
                &value_aval,
            ));
        }
        self.emit_one(Op::ResumeLocal { lk, value }, ty.result.into())
    }

    fn continuation(&mut self, var: Var, kind: ContinuationKind) -> Result<(Var, ContinuationType)> {
        let var = self.resolve(var)?;
        match self.aval(var)? {
            AbstractValue::Continuation(ty) if ty.kind == kind => Ok((var, ty.clone())),
            other => Err(EffectError::NotAContinuation {
                expected: kind.name(),
                found: other.to_string(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Clause tracing
    // ------------------------------------------------------------------

    /// Perform sites reachable from `block`, restricted to effects in
    /// `handlers`, in first-occurrence order.
    ///
    /// A resume reaches the body of the scope that captured the continuation:
    /// that remainder runs above whatever frames enclose the resume.
    fn collect_sites(
        &self,
        block: BlockId,
        handlers: &Handlers,
        visited: &mut FxHashSet<BlockId>,
        seen: &mut FxHashSet<(EffectId, Vec<ShapedArray>)>,
        sites: &mut Vec<(EffectHandle, Vec<ShapedArray>)>,
    ) -> Result<()> {
        if !visited.insert(block) {
            return Ok(());
        }
        let block = self
            .blocks
            .get(block.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| EffectError::internal(format!("{block} is not closed")))?;
        for eqn in &block.eqns {
            match &eqn.op {
                Op::Perform { effect, args } if handlers.handles(effect.id()) => {
                    let avals = args
                        .iter()
                        .map(|&a| block.aval(a).expect_array().cloned())
                        .collect::<Result<Vec<_>>>()?;
                    if seen.insert((effect.id(), avals.clone())) {
                        sites.push((effect.clone(), avals));
                    }
                }
                Op::Handle { table, body, .. } => {
                    self.collect_sites(*body, handlers, visited, seen, sites)?;
                    for clause in table.clauses() {
                        self.collect_sites(clause.block, handlers, visited, seen, sites)?;
                    }
                }
                Op::Resume { k, .. } | Op::ResumeLocal { lk: k, .. } => {
                    if let Some(ty) = block.aval(*k).as_continuation() {
                        self.collect_sites(ty.scope, handlers, visited, seen, sites)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn trace_clause(
        &mut self,
        effect: &EffectHandle,
        arg_avals: &[ShapedArray],
        scope: BlockId,
        parameter: &ShapedArray,
        result: &ShapedArray,
        handlers: &Handlers,
    ) -> Result<Clause> {
        let handler = handlers
            .get(effect.id())
            .cloned()
            .ok_or_else(|| EffectError::internal(format!("no handler for `{}`", effect.name())))?;
        let resume = effect.result_aval(arg_avals)?;

        let block = self.open_block(BlockKind::Clause);
        let param_var = self.add_input(parameter.clone().into())?;
        let arg_vars = arg_avals
            .iter()
            .map(|aval| self.add_input(aval.clone().into()))
            .collect::<Result<Vec<_>>>()?;
        let k = self.add_input(AbstractValue::Continuation(ContinuationType {
            kind: ContinuationKind::Full,
            scope,
            resume: resume.clone(),
            parameter: parameter.clone(),
            result: result.clone(),
        }))?;
        let lk = self.add_input(AbstractValue::Continuation(ContinuationType {
            kind: ContinuationKind::Local,
            scope,
            resume,
            parameter: parameter.clone(),
            result: result.clone(),
        }))?;

        let out = handler(self, param_var, &arg_vars, Cont(k), LocalCont(lk))?;
        let (out, out_aval) = self.array_aval(out)?;
        if out_aval != *result {
            return Err(EffectError::shape_mismatch(
                format!("result of the `{}` handler", effect.name()),
                result,
                &out_aval,
            ));
        }
        let closed = self.close_block(out)?;
        debug_assert_eq!(closed, block);
        Ok(Clause {
            effect: effect.clone(),
            arg_avals: arg_avals.to_vec(),
            block,
        })
    }
}

/// An open handler scope.
///
/// Dereferences to the [`Tracer`] so the scope body is traced through it.
/// Dropping the guard without calling [`ScopeGuard::finish`] discards the
/// scope.
pub struct ScopeGuard<'t> {
    tracer: &'t mut Tracer,
    depth: usize,
    body: BlockId,
    init: Var,
    parameter: ShapedArray,
    handlers: Handlers,
    finished: bool,
}

impl ScopeGuard<'_> {
    /// Id of the scope body block.
    pub fn body(&self) -> BlockId {
        self.body
    }

    /// Close the scope with `result` as the body's value.
    pub fn finish(mut self, result: Var) -> Result<Scoped> {
        let scoped = self.close(result)?;
        self.finished = true;
        Ok(scoped)
    }

    fn close(&mut self, result: Var) -> Result<Scoped> {
        let body = self.body;
        let tracer = &mut *self.tracer;
        if tracer.open.len() != self.depth + 1 || tracer.open.last().map(|b| b.id) != Some(body) {
            return Err(EffectError::internal(format!(
                "scope {body} finished while a nested block is open"
            )));
        }
        let (result, result_aval) = tracer.array_aval(result)?;
        tracer.close_block(result)?;

        let handlers = std::mem::take(&mut self.handlers);
        let mut seen = FxHashSet::default();
        let mut sites = Vec::new();
        let mut visited = FxHashSet::default();
        tracer.collect_sites(body, &handlers, &mut visited, &mut seen, &mut sites)?;

        let mut clauses = Vec::with_capacity(sites.len());
        for (effect, arg_avals) in &sites {
            clauses.push(tracer.trace_clause(
                effect,
                arg_avals,
                body,
                &self.parameter,
                &result_aval,
                &handlers,
            )?);
        }
        let handled = handlers.effects().cloned().collect();
        let table = Rc::new(HandlerTable::new(handled, clauses));
        debug!(%body, clauses = table.clauses().len(), "exit scope");

        let outputs = tracer.emit(
            Op::Handle {
                table,
                init: self.init,
                body,
            },
            vec![result_aval.into(), self.parameter.clone().into()],
        )?;
        match outputs[..] {
            [result, parameter] => Ok(Scoped { result, parameter }),
            _ => Err(EffectError::internal("handle recorded with wrong arity")),
        }
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = Tracer;

    fn deref(&self) -> &Tracer {
        self.tracer
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Tracer {
        self.tracer
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(body = %self.body, "abandon scope");
            self.tracer.abandon(self.depth, self.body);
        }
    }
}
