//! # Effect Declarations
//!
//! An effect is declared once with a name, an arity and an abstract
//! evaluation rule mapping argument abstract values to the abstract value of
//! the result. The rule is only used while tracing; it never runs when the
//! program is evaluated.
//!
//! Identity is a process-unique [`EffectId`]. Two effects declared with the
//! same name are different effects, and a handler frame handles exactly the
//! declarations it was built with.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::{EffectError, Result};
use crate::trace::{ShapedArray, Tracer, Var};

/// Unique identifier for a declared effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Global effect ID counter.
static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

fn next_effect_id() -> EffectId {
    EffectId(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Abstract evaluation rule of an effect.
pub type AbstractEvalFn = Box<dyn Fn(&[ShapedArray]) -> Result<ShapedArray>>;

/// A declared effect operation.
pub struct EffectDeclaration {
    id: EffectId,
    name: String,
    arity: usize,
    abstract_eval: AbstractEvalFn,
}

impl EffectDeclaration {
    /// Process-unique identity of this declaration.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Declared name; not unique.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of arguments a perform must pass.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Abstract value of the result for the given argument abstract values.
    ///
    /// Fails with [`EffectError::Arity`] when the call site passes the wrong
    /// number of arguments, or with whatever the declaration's rule reports.
    pub fn result_aval(&self, args: &[ShapedArray]) -> Result<ShapedArray> {
        if args.len() != self.arity {
            return Err(EffectError::Arity {
                name: self.name.clone(),
                expected: self.arity,
                found: args.len(),
            });
        }
        (self.abstract_eval)(args)
    }
}

impl fmt::Debug for EffectDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDeclaration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Shared handle to a declared effect.
///
/// Handles compare by identity. Performing the effect is
/// `handle.perform(tracer, args)`.
#[derive(Clone)]
pub struct EffectHandle(Rc<EffectDeclaration>);

impl EffectHandle {
    /// Identity of the underlying declaration.
    pub fn id(&self) -> EffectId {
        self.0.id
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Declared argument count.
    pub fn arity(&self) -> usize {
        self.0.arity
    }

    /// The declaration this handle shares.
    pub fn declaration(&self) -> &EffectDeclaration {
        &self.0
    }

    /// See [`EffectDeclaration::result_aval`].
    pub fn result_aval(&self, args: &[ShapedArray]) -> Result<ShapedArray> {
        self.0.result_aval(args)
    }

    /// Perform this effect in the block currently being traced.
    pub fn perform(&self, tracer: &mut Tracer, args: &[Var]) -> Result<Var> {
        tracer.perform(self, args)
    }
}

impl PartialEq for EffectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for EffectHandle {}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name(), self.id())
    }
}

/// Declare a new effect.
pub fn declare_effect<F>(name: impl Into<String>, arity: usize, abstract_eval: F) -> EffectHandle
where
    F: Fn(&[ShapedArray]) -> Result<ShapedArray> + 'static,
{
    EffectHandle(Rc::new(EffectDeclaration {
        id: next_effect_id(),
        name: name.into(),
        arity,
        abstract_eval: Box::new(abstract_eval),
    }))
}

/// Declarations made for one program, in declaration order.
///
/// The registry is passed around explicitly; it is a listing and lookup aid,
/// not a source of identity.
#[derive(Debug, Default)]
pub struct EffectRegistry {
    effects: IndexMap<EffectId, EffectHandle>,
}

impl EffectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an effect and record it.
    pub fn declare<F>(&mut self, name: impl Into<String>, arity: usize, abstract_eval: F) -> EffectHandle
    where
        F: Fn(&[ShapedArray]) -> Result<ShapedArray> + 'static,
    {
        let handle = declare_effect(name, arity, abstract_eval);
        self.register(handle.clone());
        handle
    }

    /// Declare an effect whose result abstract value is fixed.
    pub fn declare_returning(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        result: ShapedArray,
    ) -> EffectHandle {
        self.declare(name, arity, move |_| Ok(result.clone()))
    }

    /// Record an effect declared elsewhere.
    pub fn register(&mut self, handle: EffectHandle) {
        self.effects.insert(handle.id(), handle);
    }

    /// The declaration with identity `id`.
    pub fn get(&self, id: EffectId) -> Option<&EffectHandle> {
        self.effects.get(&id)
    }

    /// All declarations with the given name.
    pub fn find_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EffectHandle> + 'a {
        self.effects.values().filter(move |h| h.name() == name)
    }

    /// Declarations in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &EffectHandle> {
        self.effects.values()
    }

    /// Number of registered declarations.
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}
