//! # Continuations
//!
//! A continuation owns the part of the activation stack between a handler
//! scope and the perform that reached it. Capturing moves those activations
//! out of the running stack into a [`Segment`]; nothing is copied and nothing
//! is re-evaluated when the segment is resumed.
//!
//! Each capture yields two views over one cell:
//!
//! | View | Resumes with                                   |
//! |------|------------------------------------------------|
//! | `k`  | the capturing frame reinstalled, new parameter |
//! | `lk` | the capturing frame bypassed                   |
//!
//! Continuations are one-shot. Whichever view resumes first takes the
//! segment; a later resume through either view fails with
//! [`EffectError::ContinuationConsumed`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EffectError, Result};
use crate::trace::ContinuationKind;

use super::stack::{Activation, HandlerFrame, Role};

/// Unique identifier for a captured continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContinuationId(u64);

impl ContinuationId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Global continuation ID counter.
static NEXT_CONTINUATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_continuation_id() -> ContinuationId {
    ContinuationId(NEXT_CONTINUATION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Activations moved out of the stack, bottom first.
///
/// The bottom activation is always the scope of the capturing frame.
#[derive(Debug)]
pub(crate) struct Segment {
    activations: Vec<Activation>,
}

impl Segment {
    pub(crate) fn new(activations: Vec<Activation>) -> Result<Self> {
        match activations.first().map(|a| &a.role) {
            Some(Role::Scope { .. }) => Ok(Self { activations }),
            _ => Err(EffectError::internal(
                "captured segment does not start at a handler scope",
            )),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.activations.len()
    }

    /// The capturing frame and its bypass flag.
    pub(crate) fn frame_mut(&mut self) -> Result<(&mut HandlerFrame, &mut bool)> {
        match self.activations.first_mut().map(|a| &mut a.role) {
            Some(Role::Scope { frame, bypassed }) => Ok((frame, bypassed)),
            _ => Err(EffectError::internal("segment lost its handler scope")),
        }
    }

    pub(crate) fn frame(&self) -> Result<&HandlerFrame> {
        match self.activations.first().map(|a| &a.role) {
            Some(Role::Scope { frame, .. }) => Ok(frame),
            _ => Err(EffectError::internal("segment lost its handler scope")),
        }
    }

    pub(crate) fn into_activations(self) -> Vec<Activation> {
        self.activations
    }
}

#[derive(Debug)]
struct Captured {
    id: ContinuationId,
    effect: String,
    segment: RefCell<Option<Segment>>,
}

/// One view of a captured continuation.
#[derive(Debug, Clone)]
pub(crate) struct ContinuationRef {
    captured: Rc<Captured>,
    kind: ContinuationKind,
}

impl ContinuationRef {
    /// Capture `segment`, returning the full and local views.
    pub(crate) fn capture(segment: Segment, effect: &str) -> (Self, Self) {
        let captured = Rc::new(Captured {
            id: next_continuation_id(),
            effect: effect.to_string(),
            segment: RefCell::new(Some(segment)),
        });
        let full = Self {
            captured: Rc::clone(&captured),
            kind: ContinuationKind::Full,
        };
        let local = Self {
            captured,
            kind: ContinuationKind::Local,
        };
        (full, local)
    }

    pub(crate) fn id(&self) -> ContinuationId {
        self.captured.id
    }

    pub(crate) fn kind(&self) -> ContinuationKind {
        self.kind
    }

    pub(crate) fn is_consumed(&self) -> bool {
        self.captured.segment.borrow().is_none()
    }

    /// Take the segment for resumption.
    pub(crate) fn take(&self) -> Result<Segment> {
        self.captured
            .segment
            .borrow_mut()
            .take()
            .ok_or_else(|| EffectError::ContinuationConsumed {
                id: self.captured.id,
                effect: self.captured.effect.clone(),
            })
    }
}

impl fmt::Display for ContinuationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ContinuationKind::Full => "k",
            ContinuationKind::Local => "lk",
        };
        write!(f, "{prefix}{} at `{}`", self.captured.id, self.captured.effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::stack::Activation;
    use crate::effects::HandlerTable;
    use crate::trace::{Array, BlockId};
    use std::cell::RefCell;

    fn scope_segment() -> Segment {
        let frame = HandlerFrame {
            id: 0,
            table: Rc::new(HandlerTable::new(Vec::new(), Vec::new())),
            parameter: Array::from(3),
            clause_env: Vec::new(),
            outcome: Rc::new(RefCell::new(None)),
        };
        let scope = Activation::new(
            BlockId(1),
            0,
            Role::Scope {
                frame,
                bypassed: false,
            },
        );
        Segment::new(vec![scope]).unwrap()
    }

    #[test]
    fn test_continuation_id_generation() {
        let (k1, _) = ContinuationRef::capture(scope_segment(), "get");
        let (k2, _) = ContinuationRef::capture(scope_segment(), "get");
        assert_ne!(k1.id(), k2.id());
    }

    #[test]
    fn test_views_share_one_shot() {
        let (k, lk) = ContinuationRef::capture(scope_segment(), "get");
        assert_eq!(k.id(), lk.id());
        assert_eq!(k.kind(), ContinuationKind::Full);
        assert_eq!(lk.kind(), ContinuationKind::Local);

        let segment = lk.take().unwrap();
        assert_eq!(segment.len(), 1);
        assert!(k.is_consumed());

        let err = k.take().unwrap_err();
        assert!(matches!(err, EffectError::ContinuationConsumed { .. }));
        assert!(err.to_string().contains("`get`"));
    }

    #[test]
    fn test_segment_must_start_at_scope() {
        let root = Activation::new(BlockId(0), 0, Role::Root);
        assert!(Segment::new(vec![root]).is_err());
    }

    #[test]
    fn test_frame_mut_updates_parameter() {
        let mut segment = scope_segment();
        {
            let (frame, bypassed) = segment.frame_mut().unwrap();
            frame.parameter = Array::from(11);
            *bypassed = true;
        }
        assert_eq!(segment.frame().unwrap().parameter, Array::from(11));
    }
}
