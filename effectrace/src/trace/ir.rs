//! # Traced Program Representation
//!
//! A traced program is a tree of blocks stored in an arena. Each block is a
//! flat list of equations in SSA form over block-local variables, with one
//! output variable. Blocks nest in three ways:
//!
//! - the root block is the traced function itself,
//! - a `handle` equation owns a *scope body* block,
//! - a `handle` equation's handler table owns one *clause* block per
//!   handled effect signature.
//!
//! A nested block may read variables of enclosing blocks only through its
//! capture list, which the tracer fills in when such a variable is used.
//!
//! ```text
//! b0 (root) (v0: i32[])
//!   v1: i32[], v2: i32[] = handle v0 body=b1 [state_get() -> b2]
//!   return v1
//! b1 (scope body) captures [v0@b0 -> v0]
//!   v1: i32[] = perform state_get
//!   return v1
//! ```

use std::fmt;
use std::rc::Rc;

use crate::effects::{EffectHandle, HandlerTable};
use crate::error::{EffectError, Result};

use super::value::{Array, BinaryOp, DType, ShapedArray, UnaryOp};

/// Index of a block in a program's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A traced variable: a slot in the block that defines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var {
    pub(crate) block: BlockId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Var {
    pub(crate) fn slot(self) -> usize {
        self.index as usize
    }

    /// The block that defines this variable.
    pub fn block(self) -> BlockId {
        self.block
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}@{}", self.index, self.block)
    }
}

/// Which view of a captured remainder a continuation resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContinuationKind {
    /// Resumes with the capturing handler reinstalled.
    Full,
    /// Resumes with the capturing handler bypassed.
    Local,
}

impl ContinuationKind {
    /// `"full"` or `"local"`.
    pub fn name(self) -> &'static str {
        match self {
            ContinuationKind::Full => "full",
            ContinuationKind::Local => "local",
        }
    }
}

/// Static type of a continuation variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationType {
    /// Full or local view.
    pub kind: ContinuationKind,
    /// Body of the scope whose frame captured the continuation. Resuming runs
    /// the rest of that body.
    pub scope: BlockId,
    /// Abstract value of the perform result the continuation is resumed with.
    pub resume: ShapedArray,
    /// Abstract value of the handler parameter.
    pub parameter: ShapedArray,
    /// Abstract value of the scope result resuming yields.
    pub result: ShapedArray,
}

impl fmt::Display for ContinuationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ContinuationKind::Full => write!(
                f,
                "k({}, {}) -> {}",
                self.parameter, self.resume, self.result
            ),
            ContinuationKind::Local => write!(f, "lk({}) -> {}", self.resume, self.result),
        }
    }
}

/// Static type of any traced variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbstractValue {
    /// An array of known shape and dtype.
    Array(ShapedArray),
    /// A continuation; only clause inputs have this type.
    Continuation(ContinuationType),
}

impl AbstractValue {
    /// The array type, if this is not a continuation.
    pub fn as_array(&self) -> Option<&ShapedArray> {
        match self {
            AbstractValue::Array(aval) => Some(aval),
            AbstractValue::Continuation(_) => None,
        }
    }

    /// The continuation type, if this is one.
    pub fn as_continuation(&self) -> Option<&ContinuationType> {
        match self {
            AbstractValue::Continuation(ty) => Some(ty),
            AbstractValue::Array(_) => None,
        }
    }

    pub(crate) fn expect_array(&self) -> Result<&ShapedArray> {
        self.as_array().ok_or_else(|| EffectError::NotAnArray {
            found: self.to_string(),
        })
    }
}

impl From<ShapedArray> for AbstractValue {
    fn from(aval: ShapedArray) -> Self {
        AbstractValue::Array(aval)
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Array(aval) => aval.fmt(f),
            AbstractValue::Continuation(ty) => ty.fmt(f),
        }
    }
}

/// An operation in a block.
#[derive(Debug, Clone)]
pub enum Op {
    /// A constant.
    Literal(Array),
    /// Elementwise unary primitive.
    Unary {
        /// The primitive.
        op: UnaryOp,
        /// Its operand.
        operand: Var,
    },
    /// Elementwise binary primitive.
    Binary {
        /// The primitive.
        op: BinaryOp,
        /// Left operand.
        lhs: Var,
        /// Right operand.
        rhs: Var,
    },
    /// Elementwise choice on a `bool` predicate.
    Select {
        /// Boolean predicate.
        pred: Var,
        /// Taken where `pred` holds.
        on_true: Var,
        /// Taken elsewhere.
        on_false: Var,
    },
    /// Elementwise dtype conversion.
    Convert {
        /// Value to convert.
        operand: Var,
        /// Target dtype.
        dtype: DType,
    },
    /// Stack operands along a new leading axis.
    Stack {
        /// Arrays of one abstract value.
        operands: Vec<Var>,
    },
    /// Log the formatted arguments; `{}` placeholders are filled in order.
    DebugPrint {
        /// Format string.
        format: String,
        /// One argument per placeholder.
        args: Vec<Var>,
    },
    /// Perform an effect; one output, the value the handler resumes with.
    Perform {
        /// The effect performed.
        effect: EffectHandle,
        /// Its arguments.
        args: Vec<Var>,
    },
    /// Run `body` under a new handler frame; outputs are the scope result
    /// and the final handler parameter.
    Handle {
        /// Clauses of the new frame.
        table: Rc<HandlerTable>,
        /// Initial handler parameter.
        init: Var,
        /// Scope body block.
        body: BlockId,
    },
    /// Resume a full continuation; one output, the scope result.
    Resume {
        /// The continuation.
        k: Var,
        /// New handler parameter.
        parameter: Var,
        /// Value the perform returns.
        value: Var,
    },
    /// Resume a local continuation; one output, the scope result.
    ResumeLocal {
        /// The local continuation.
        lk: Var,
        /// Value the perform returns.
        value: Var,
    },
}

impl Op {
    /// Primitive name used in diagnostics and the program printer.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Literal(_) => "literal",
            Op::Unary { op, .. } => op.name(),
            Op::Binary { op, .. } => op.name(),
            Op::Select { .. } => "select",
            Op::Convert { .. } => "convert",
            Op::Stack { .. } => "stack",
            Op::DebugPrint { .. } => "debug_print",
            Op::Perform { .. } => "perform",
            Op::Handle { .. } => "handle",
            Op::Resume { .. } => "resume",
            Op::ResumeLocal { .. } => "resume_local",
        }
    }

    /// Variables read by this operation, in operand order.
    pub fn inputs(&self) -> Vec<Var> {
        match self {
            Op::Literal(_) => Vec::new(),
            Op::Unary { operand, .. } | Op::Convert { operand, .. } => vec![*operand],
            Op::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Select {
                pred,
                on_true,
                on_false,
            } => vec![*pred, *on_true, *on_false],
            Op::Stack { operands } => operands.clone(),
            Op::DebugPrint { args, .. } | Op::Perform { args, .. } => args.clone(),
            Op::Handle { init, .. } => vec![*init],
            Op::Resume {
                k,
                parameter,
                value,
            } => vec![*k, *parameter, *value],
            Op::ResumeLocal { lk, value } => vec![*lk, *value],
        }
    }

    /// Whether evaluating this operation transfers control.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Op::Perform { .. } | Op::Handle { .. } | Op::Resume { .. } | Op::ResumeLocal { .. }
        )
    }
}

/// One equation: an operation and the variables it defines.
#[derive(Debug, Clone)]
pub struct Eqn {
    /// The operation.
    pub op: Op,
    /// Variables defined by the operation.
    pub outputs: Vec<Var>,
}

/// Role of a block in the program tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The traced function.
    Root,
    /// The body of a handler scope.
    ScopeBody,
    /// A handler clause for one effect signature.
    Clause,
}

impl BlockKind {
    fn label(self) -> &'static str {
        match self {
            BlockKind::Root => "root",
            BlockKind::ScopeBody => "scope body",
            BlockKind::Clause => "clause",
        }
    }
}

/// A closed block.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) kind: BlockKind,
    pub(crate) parent: Option<BlockId>,
    pub(crate) inputs: Vec<Var>,
    /// `(variable in parent, local variable)` pairs.
    pub(crate) captures: Vec<(Var, Var)>,
    pub(crate) eqns: Vec<Eqn>,
    pub(crate) output: Var,
    pub(crate) avals: Vec<AbstractValue>,
}

impl Block {
    /// What the block was traced for.
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Enclosing block; `None` for the root.
    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    /// Equations in evaluation order.
    pub fn eqns(&self) -> &[Eqn] {
        &self.eqns
    }

    /// Input variables, bound by the caller.
    pub fn inputs(&self) -> &[Var] {
        &self.inputs
    }

    /// Captured variables as `(enclosing, local)` pairs.
    pub fn captures(&self) -> &[(Var, Var)] {
        &self.captures
    }

    /// Variable holding the block result.
    pub fn output(&self) -> Var {
        self.output
    }

    /// Number of variable slots an activation of this block needs.
    pub fn num_slots(&self) -> usize {
        self.avals.len()
    }

    /// Abstract value of `var`. Panics if its slot is out of range for this block.
    pub fn aval(&self, var: Var) -> &AbstractValue {
        &self.avals[var.slot()]
    }
}

/// A fully traced program.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) blocks: Vec<Block>,
    pub(crate) root: BlockId,
}

impl Program {
    /// The root block.
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Block `id`. Panics if `id` does not belong to this program.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// All blocks in arena order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId(i as u32), b))
    }

    /// Abstract values of the root block's inputs.
    pub fn input_avals(&self) -> Vec<ShapedArray> {
        let root = self.block(self.root);
        root.inputs
            .iter()
            .filter_map(|v| root.aval(*v).as_array().cloned())
            .collect()
    }

    /// Abstract value of the root block's output.
    pub fn output_aval(&self) -> Option<&ShapedArray> {
        let root = self.block(self.root);
        root.aval(root.output).as_array()
    }

    /// Total number of equations over all blocks.
    pub fn num_eqns(&self) -> usize {
        self.blocks.iter().map(|b| b.eqns.len()).sum()
    }

    /// Whether any block performs an effect or installs a handler.
    pub fn has_effects(&self) -> bool {
        self.blocks
            .iter()
            .flat_map(|b| &b.eqns)
            .any(|e| matches!(e.op, Op::Perform { .. } | Op::Handle { .. }))
    }

    /// Check that `args` match the root block's inputs.
    pub(crate) fn check_args(&self, args: &[Array]) -> Result<()> {
        let expected = self.input_avals();
        if expected.len() != args.len() {
            return Err(EffectError::Arity {
                name: "program".to_string(),
                expected: expected.len(),
                found: args.len(),
            });
        }
        for (aval, arg) in expected.iter().zip(args) {
            let found = arg.aval();
            if *aval != found {
                return Err(EffectError::shape_mismatch("program argument", aval, &found));
            }
        }
        Ok(())
    }
}

fn write_vars(f: &mut fmt::Formatter<'_>, vars: &[Var]) -> fmt::Result {
    for (i, v) in vars.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "v{}", v.index)?;
    }
    Ok(())
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, block) in self.blocks() {
            write!(f, "{id} ({})", block.kind.label())?;
            if !block.inputs.is_empty() {
                f.write_str(" (")?;
                for (i, v) in block.inputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "v{}: {}", v.index, block.aval(*v))?;
                }
                f.write_str(")")?;
            }
            if !block.captures.is_empty() {
                f.write_str(" captures [")?;
                for (i, (outer, local)) in block.captures.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{outer} -> v{}", local.index)?;
                }
                f.write_str("]")?;
            }
            writeln!(f)?;
            for eqn in &block.eqns {
                f.write_str("  ")?;
                for (i, out) in eqn.outputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "v{}: {}", out.index, block.aval(*out))?;
                }
                if !eqn.outputs.is_empty() {
                    f.write_str(" = ")?;
                }
                match &eqn.op {
                    Op::Literal(value) => write!(f, "literal {value}")?,
                    Op::Convert { operand, dtype } => write!(f, "convert v{} {dtype}", operand.index)?,
                    Op::DebugPrint { format, args } => {
                        write!(f, "debug_print {format:?} ")?;
                        write_vars(f, args)?;
                    }
                    Op::Perform { effect, args } => {
                        write!(f, "perform {}", effect.name())?;
                        if !args.is_empty() {
                            f.write_str(" ")?;
                            write_vars(f, args)?;
                        }
                    }
                    Op::Handle { table, init, body } => {
                        write!(f, "handle v{} body={body} [{table}]", init.index)?;
                    }
                    op => {
                        write!(f, "{} ", op.name())?;
                        write_vars(f, &op.inputs())?;
                    }
                }
                writeln!(f)?;
            }
            writeln!(f, "  return v{}", block.output.index)?;
        }
        Ok(())
    }
}
