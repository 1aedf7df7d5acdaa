//! # Handler Stack
//!
//! The dispatch engine runs a program on one explicit stack of activations.
//! An activation is a running block: its id, a program counter, and the slot
//! ledger of values computed so far. Its role says what happens when it runs
//! off the end of its block.
//!
//! ```text
//!   top ─▶ ┌────────────────────────────┐
//!          │ clause   (role: Clause)    │  handler running for a perform
//!          ├────────────────────────────┤
//!          │ body     (role: Scope)     │  ◀─ HandlerFrame lives here
//!          ├────────────────────────────┤
//!          │ root     (role: Root)      │
//!          └────────────────────────────┘
//! ```
//!
//! Handler frames are the activations in scope role. Lookup scans from the
//! top for the first frame that claims the effect and is not bypassed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EffectError, Result};
use crate::trace::{Array, BlockId, ContinuationKind, Var};

use super::continuation::{ContinuationRef, Segment};
use super::declaration::EffectId;
use super::handler::HandlerTable;

/// A value held in an activation slot.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Array(Array),
    Continuation(ContinuationRef),
}

/// Parameter recorded when a scope ends, shared with the clauses it spawns.
pub(crate) type Outcome = Rc<RefCell<Option<Array>>>;

/// A running handler scope.
#[derive(Debug)]
pub(crate) struct HandlerFrame {
    pub(crate) id: u64,
    pub(crate) table: Rc<HandlerTable>,
    pub(crate) parameter: Array,
    /// Captured values for each clause of `table`, taken when the scope began.
    pub(crate) clause_env: Vec<Vec<Slot>>,
    pub(crate) outcome: Outcome,
}

/// What an activation does when its block completes.
#[derive(Debug)]
pub(crate) enum Role {
    /// The program's root block; completing it ends the run.
    Root,
    /// A handler scope body; delivers `(result, parameter)`.
    Scope { frame: HandlerFrame, bypassed: bool },
    /// A handler clause; delivers `(result, final parameter)`.
    Clause {
        outcome: Outcome,
        entry_parameter: Array,
    },
}

/// One running block.
#[derive(Debug)]
pub(crate) struct Activation {
    pub(crate) block: BlockId,
    pub(crate) pc: usize,
    env: Vec<Option<Slot>>,
    pub(crate) role: Role,
}

impl Activation {
    pub(crate) fn new(block: BlockId, num_slots: usize, role: Role) -> Self {
        Self {
            block,
            pc: 0,
            env: vec![None; num_slots],
            role,
        }
    }

    pub(crate) fn read(&self, var: Var) -> Result<&Slot> {
        self.env
            .get(var.slot())
            .and_then(Option::as_ref)
            .ok_or_else(|| EffectError::internal(format!("{var} read before it was written")))
    }

    pub(crate) fn read_array(&self, var: Var) -> Result<Array> {
        match self.read(var)? {
            Slot::Array(value) => Ok(value.clone()),
            Slot::Continuation(k) => Err(EffectError::NotAnArray {
                found: k.to_string(),
            }),
        }
    }

    pub(crate) fn read_continuation(
        &self,
        var: Var,
        kind: ContinuationKind,
    ) -> Result<ContinuationRef> {
        match self.read(var)? {
            Slot::Continuation(k) if k.kind() == kind => Ok(k.clone()),
            Slot::Continuation(k) => Err(EffectError::NotAContinuation {
                expected: kind.name(),
                found: k.to_string(),
            }),
            Slot::Array(value) => Err(EffectError::NotAContinuation {
                expected: kind.name(),
                found: value.aval().to_string(),
            }),
        }
    }

    pub(crate) fn write(&mut self, var: Var, value: Slot) -> Result<()> {
        let slot = self
            .env
            .get_mut(var.slot())
            .ok_or_else(|| EffectError::internal(format!("{var} is out of range")))?;
        *slot = Some(value);
        Ok(())
    }
}

/// The activation stack of one evaluation.
#[derive(Debug)]
pub(crate) struct HandlerStack {
    activations: Vec<Activation>,
    limit: usize,
    high_water: usize,
}

impl HandlerStack {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            activations: Vec::new(),
            limit,
            high_water: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.activations.len()
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water
    }

    pub(crate) fn push(&mut self, activation: Activation) -> Result<()> {
        self.reserve(1)?;
        self.activations.push(activation);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Activation> {
        self.activations
            .pop()
            .ok_or_else(|| EffectError::internal("pop from an empty activation stack"))
    }

    pub(crate) fn top(&self) -> Result<&Activation> {
        self.activations
            .last()
            .ok_or_else(|| EffectError::internal("empty activation stack"))
    }

    pub(crate) fn top_mut(&mut self) -> Result<&mut Activation> {
        self.activations
            .last_mut()
            .ok_or_else(|| EffectError::internal("empty activation stack"))
    }

    /// Index of the innermost frame that handles `effect` and is not bypassed.
    pub(crate) fn find_handler(&self, effect: EffectId) -> Option<usize> {
        self.activations.iter().rposition(|a| match &a.role {
            Role::Scope { frame, bypassed } => !bypassed && frame.table.handles(effect),
            _ => false,
        })
    }

    /// Move the activations from `index` to the top into a segment.
    pub(crate) fn split_off(&mut self, index: usize) -> Result<Segment> {
        if index >= self.activations.len() {
            return Err(EffectError::internal(format!(
                "split at {index} beyond stack of {}",
                self.activations.len()
            )));
        }
        Segment::new(self.activations.split_off(index))
    }

    /// Push a captured segment back on top.
    pub(crate) fn restore(&mut self, segment: Segment) -> Result<()> {
        self.reserve(segment.len())?;
        self.activations.extend(segment.into_activations());
        Ok(())
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        let depth = self.activations.len() + additional;
        if depth > self.limit {
            return Err(EffectError::StackOverflow { limit: self.limit });
        }
        self.high_water = self.high_water.max(depth);
        Ok(())
    }
}
