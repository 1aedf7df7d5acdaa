//! # Handlers
//!
//! Two representations of the same thing:
//!
//! - [`Handlers`] is what a user writes: one Rust closure per effect, each
//!   tracing the handler clause given the parameter, the effect arguments,
//!   and the two continuations.
//! - [`HandlerTable`] is what ends up in the program: one traced clause block
//!   per `(effect, argument signature)` the scope can perform, plus the set
//!   of effects the scope claims.
//!
//! The dispatch engine only sees tables. A frame claims an effect when its
//! table lists it, whether or not a clause was traced for every signature.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::trace::{BlockId, Cont, LocalCont, ShapedArray, Tracer, Var};

use super::declaration::{EffectHandle, EffectId};

/// A handler clause: `(tracer, parameter, args, k, lk) -> result`.
pub type HandlerFn = Rc<dyn Fn(&mut Tracer, Var, &[Var], Cont, LocalCont) -> Result<Var>>;

/// Handler clauses to install in a scope, keyed by effect.
#[derive(Clone, Default)]
pub struct Handlers {
    entries: Vec<(EffectHandle, HandlerFn)>,
}

impl Handlers {
    /// An empty set of handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `effect` with `clause`. A later registration for the same
    /// effect replaces the earlier one.
    pub fn on<F>(mut self, effect: &EffectHandle, clause: F) -> Self
    where
        F: Fn(&mut Tracer, Var, &[Var], Cont, LocalCont) -> Result<Var> + 'static,
    {
        let clause: HandlerFn = Rc::new(clause);
        match self.entries.iter_mut().find(|(e, _)| e == effect) {
            Some(entry) => entry.1 = clause,
            None => self.entries.push((effect.clone(), clause)),
        }
        self
    }

    /// Whether a clause has been registered for `effect`.
    pub fn handles(&self, effect: EffectId) -> bool {
        self.entries.iter().any(|(e, _)| e.id() == effect)
    }

    /// The clause function registered for `effect`.
    pub fn get(&self, effect: EffectId) -> Option<&HandlerFn> {
        self.entries
            .iter()
            .find(|(e, _)| e.id() == effect)
            .map(|(_, f)| f)
    }

    /// Handled effects, in registration order.
    pub fn effects(&self) -> impl Iterator<Item = &EffectHandle> {
        self.entries.iter().map(|(e, _)| e)
    }

    /// Number of handled effects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no effect is handled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.effects()).finish()
    }
}

/// A traced handler clause.
#[derive(Debug, Clone)]
pub struct Clause {
    /// Effect this clause handles.
    pub effect: EffectHandle,
    /// Abstract values of the perform arguments it was traced for.
    pub arg_avals: Vec<ShapedArray>,
    /// Clause block; inputs are `[parameter, args.., k, lk]`.
    pub block: BlockId,
}

/// The handler of one scope, as recorded in a `handle` equation.
#[derive(Debug)]
pub struct HandlerTable {
    effects: Vec<EffectHandle>,
    clauses: Vec<Clause>,
    index: FxHashMap<(EffectId, Vec<ShapedArray>), usize>,
}

impl HandlerTable {
    /// Build a table claiming `effects`, indexed by clause signature.
    pub fn new(effects: Vec<EffectHandle>, clauses: Vec<Clause>) -> Self {
        let index = clauses
            .iter()
            .enumerate()
            .map(|(i, c)| ((c.effect.id(), c.arg_avals.clone()), i))
            .collect();
        Self {
            effects,
            clauses,
            index,
        }
    }

    /// Whether this table claims `effect`.
    pub fn handles(&self, effect: EffectId) -> bool {
        self.effects.iter().any(|e| e.id() == effect)
    }

    /// Index of the clause for `effect` applied to arguments of `arg_avals`.
    pub fn lookup(&self, effect: EffectId, arg_avals: &[ShapedArray]) -> Option<usize> {
        self.index.get(&(effect, arg_avals.to_vec())).copied()
    }

    /// Clause at `index`, as returned by [`lookup`](Self::lookup).
    pub fn clause(&self, index: usize) -> Option<&Clause> {
        self.clauses.get(index)
    }

    /// Traced clauses in trace order.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Every effect the scope claims, including effects with no traced clause.
    pub fn effects(&self) -> &[EffectHandle] {
        &self.effects
    }
}

impl fmt::Display for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}(", clause.effect.name())?;
            for (j, aval) in clause.arg_avals.iter().enumerate() {
                if j > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{aval}")?;
            }
            write!(f, ") -> {}", clause.block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::declare_effect;
    use crate::trace::DType;
    use pretty_assertions::assert_eq;

    fn scalar_effect(name: &str) -> EffectHandle {
        declare_effect(name, 1, |_| Ok(ShapedArray::scalar(DType::I32)))
    }

    #[test]
    fn test_last_registration_wins() {
        let get = scalar_effect("get");
        let handlers = Handlers::new()
            .on(&get, |tb, _, _, _, _| tb.literal(1))
            .on(&get, |tb, _, _, _, _| tb.literal(2));
        assert_eq!(handlers.len(), 1);
        assert!(handlers.handles(get.id()));
    }

    #[test]
    fn test_table_lookup_by_signature() {
        let log = scalar_effect("log");
        let other = scalar_effect("other");
        let i32s = vec![ShapedArray::scalar(DType::I32)];
        let f32s = vec![ShapedArray::scalar(DType::F32)];
        let table = HandlerTable::new(
            vec![log.clone()],
            vec![Clause {
                effect: log.clone(),
                arg_avals: i32s.clone(),
                block: BlockId(3),
            }],
        );

        assert!(table.handles(log.id()));
        assert!(!table.handles(other.id()));
        assert_eq!(table.lookup(log.id(), &i32s), Some(0));
        assert_eq!(table.lookup(log.id(), &f32s), None);
        assert_eq!(table.to_string(), "log(i32[]) -> b3");
    }
}
