//! Integration tests for handler dispatch and continuations.
//!
//! Every test builds a program with `effectify` and checks the value it
//! evaluates to, or the error it fails with.

use std::cell::Cell;
use std::rc::Rc;

use effectrace::demos::{self, StateEffects};
use effectrace::{
    effectify, trace_fn, Array, DType, EffectError, EffectHandle, EffectRegistry, Handlers,
    RuntimeConfig, ShapedArray,
};
use pretty_assertions::assert_eq;

fn i32_scalar() -> ShapedArray {
    ShapedArray::scalar(DType::I32)
}

fn ask(registry: &mut EffectRegistry) -> EffectHandle {
    registry.declare_returning("ask", 0, i32_scalar())
}

fn pair(a: i32, b: i32) -> Array {
    Array::from_i32(vec![2], vec![a, b]).unwrap()
}

// ============================================================
// Parameter threading
// ============================================================

#[test]
fn test_state_threading() {
    let mut registry = EffectRegistry::new();
    let program = demos::state_example(&mut registry);

    assert_eq!(program.call(&[Array::from(3)]).unwrap(), pair(20, 11));
    // get → 0, set(0), get → 0, set(5), get → 5
    assert_eq!(program.call(&[Array::from(0)]).unwrap(), pair(5, 5));
}

#[test]
fn test_state_reads_observe_sets() {
    let mut registry = EffectRegistry::new();
    let state = StateEffects::declare(&mut registry);
    let program = effectify(move |tb, args| {
        let scoped = tb.handle(args[0], state.handlers(), |tb| {
            let before = state.get.perform(tb, &[])?;
            let ten = tb.literal(10)?;
            state.set.perform(tb, &[ten])?;
            let after = state.get.perform(tb, &[])?;
            tb.stack(&[before, after])
        })?;
        Ok(scoped.result)
    });

    assert_eq!(program.call(&[Array::from(-4)]).unwrap(), pair(-4, 10));
}

#[test]
fn test_parameter_with_array_shape() {
    let mut registry = EffectRegistry::new();
    let push = registry.declare_returning("push", 1, i32_scalar());
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&push, |tb, acc, args, k, _| {
            let next = tb.add(acc, args[0])?;
            tb.resume(k, next, args[0])
        });
        let scoped = tb.handle(args[0], handlers, |tb| {
            let one = tb.literal(1)?;
            let two = tb.literal(2)?;
            push.perform(tb, &[one])?;
            push.perform(tb, &[two])
        })?;
        Ok(scoped.parameter)
    });

    let init = Array::from_i32(vec![3], vec![0, 10, 20]).unwrap();
    let expected = Array::from_i32(vec![3], vec![3, 13, 23]).unwrap();
    assert_eq!(program.call(&[init]).unwrap(), expected);
}

// ============================================================
// Resumption
// ============================================================

#[test]
fn test_immediate_resume_is_noop() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let with_effect = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, p, _, k, _| {
            let seven = tb.literal(7)?;
            tb.resume(k, p, seven)
        });
        let scoped = tb.handle(args[0], handlers, |tb| {
            let v = ask.perform(tb, &[])?;
            let sum = tb.add(v, args[0])?;
            tb.mul(sum, v)
        })?;
        Ok(scoped.result)
    });
    let without_effect = trace_fn(
        |tb, args| {
            let v = tb.literal(7)?;
            let sum = tb.add(v, args[0])?;
            tb.mul(sum, v)
        },
        &[i32_scalar()],
    )
    .unwrap();

    for x in [-3, 0, 5, 1000] {
        assert_eq!(
            with_effect.call(&[Array::from(x)]).unwrap(),
            without_effect.evaluate(&[Array::from(x)]).unwrap()
        );
    }
}

#[test]
fn test_handler_postprocesses_scope_result() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, p, _, k, _| {
            let r = tb.resume(k, p, p)?;
            let hundred = tb.literal(100)?;
            tb.add(r, hundred)
        });
        let scoped = tb.handle(args[0], handlers, |tb| ask.perform(tb, &[]))?;
        Ok(scoped.result)
    });

    assert_eq!(program.call(&[Array::from(1)]).unwrap(), Array::from(101));
}

#[test]
fn test_abort_discards_remainder() {
    let mut registry = EffectRegistry::new();
    let program = demos::abort_example(&mut registry);
    assert_eq!(program.call(&[Array::from(3)]).unwrap(), pair(30, 4));
    assert_eq!(program.call(&[Array::from(-1)]).unwrap(), pair(-10, 0));
}

#[test]
fn test_abort_skips_debug_print_and_division() {
    let mut registry = EffectRegistry::new();
    let fail = registry.declare_returning("fail", 0, i32_scalar());
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&fail, |tb, _, _, _, _| tb.literal(-1));
        let scoped = tb.handle(args[0], handlers, |tb| {
            fail.perform(tb, &[])?;
            let zero = tb.literal(0)?;
            // Would fail with DivisionByZero if the remainder ran.
            tb.div(args[0], zero)
        })?;
        Ok(scoped.result)
    });

    assert_eq!(program.call(&[Array::from(9)]).unwrap(), Array::from(-1));
}

#[test]
fn test_double_resume_is_consumed() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, p, _, k, _| {
            let first = tb.resume(k, p, p)?;
            let second = tb.resume(k, p, p)?;
            tb.add(first, second)
        });
        let scoped = tb.handle(args[0], handlers, |tb| ask.perform(tb, &[]))?;
        Ok(scoped.result)
    });

    let err = program.call(&[Array::from(1)]).unwrap_err();
    assert!(
        matches!(err, EffectError::ContinuationConsumed { ref effect, .. } if effect == "ask"),
        "unexpected error: {err}"
    );
}

#[test]
fn test_k_and_lk_share_one_shot() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, p, _, k, lk| {
            tb.resume_local(lk, p)?;
            tb.resume(k, p, p)
        });
        let scoped = tb.handle(args[0], handlers, |tb| ask.perform(tb, &[]))?;
        Ok(scoped.result)
    });

    let err = program.call(&[Array::from(1)]).unwrap_err();
    assert!(matches!(err, EffectError::ContinuationConsumed { .. }));
}

#[test]
fn test_resume_with_wrong_shape_rejected() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, _, _, k, _| {
            let wide = tb.literal(Array::from_i32(vec![2], vec![1, 2])?)?;
            let v = tb.literal(0)?;
            tb.resume(k, wide, v)
        });
        let scoped = tb.handle(args[0], handlers, |tb| ask.perform(tb, &[]))?;
        Ok(scoped.result)
    });

    let err = program.call(&[Array::from(1)]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "shape mismatch in resume parameter: expected `i32[]`, found `i32[2]`"
    );
}

// ============================================================
// Handler selection
// ============================================================

#[test]
fn test_innermost_handler_wins() {
    let mut registry = EffectRegistry::new();
    let program = demos::nested_example(&mut registry);
    assert_eq!(program.call(&[]).unwrap(), Array::from(101));
}

#[test]
fn test_clause_effects_reach_outer_handler() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, _| {
        let forward = ask.clone();
        let outer = Handlers::new().on(&ask, |tb, p, _, k, _| tb.resume(k, p, p));
        let inner = Handlers::new().on(&ask, move |tb, p, _, k, _| {
            let above = forward.perform(tb, &[])?;
            let v = tb.add(p, above)?;
            tb.resume(k, p, v)
        });
        let one = tb.literal(1)?;
        let scoped = tb.handle(one, outer, |tb| {
            let hundred = tb.literal(100)?;
            let inner = tb.handle(hundred, inner, |tb| ask.perform(tb, &[]))?;
            Ok(inner.result)
        })?;
        Ok(scoped.result)
    });

    assert_eq!(program.call(&[]).unwrap(), Array::from(101));
}

#[test]
fn test_resumed_remainder_reaches_clause_scope() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let other = registry.declare_returning("other", 0, i32_scalar());
    let program = effectify(move |tb, _| {
        let other_effect = other.clone();
        let outer = Handlers::new().on(&ask, move |tb, p, _, k, _| {
            let inner = Handlers::new().on(&other_effect, |tb, p, _, k, _| tb.resume(k, p, p));
            let seven = tb.literal(7)?;
            let scoped = tb.handle(seven, inner, |tb| tb.resume(k, p, p))?;
            Ok(scoped.result)
        });
        let one = tb.literal(1)?;
        let scoped = tb.handle(one, outer, |tb| {
            let a = ask.perform(tb, &[])?;
            let b = other.perform(tb, &[])?;
            tb.add(a, b)
        })?;
        Ok(scoped.result)
    });

    // `other` runs above the clause's scope once `k` resumes the body.
    assert_eq!(program.call(&[]).unwrap(), Array::from(8));
}

#[test]
fn test_same_name_effects_are_distinct() {
    let mut registry = EffectRegistry::new();
    let first = ask(&mut registry);
    let second = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&first, |tb, p, _, k, _| tb.resume(k, p, p));
        let scoped = tb.handle(args[0], handlers, |tb| second.perform(tb, &[]))?;
        Ok(scoped.result)
    });

    let err = program.call(&[Array::from(0)]).unwrap_err();
    assert!(err.is_unhandled());
}

#[test]
fn test_clause_reads_enclosing_values() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let offset = tb.mul(args[0], args[0])?;
        let handlers = Handlers::new().on(&ask, move |tb, p, _, k, _| {
            let v = tb.add(p, offset)?;
            tb.resume(k, p, v)
        });
        let zero = tb.literal(0)?;
        let scoped = tb.handle(zero, handlers, |tb| ask.perform(tb, &[]))?;
        Ok(scoped.result)
    });

    assert_eq!(program.call(&[Array::from(6)]).unwrap(), Array::from(36));
}

// ============================================================
// Local continuations
// ============================================================

#[test]
fn test_local_continuation_bypasses_frame() {
    let mut registry = EffectRegistry::new();
    let program = demos::local_example(&mut registry);
    assert_eq!(program.call(&[]).unwrap(), pair(1000, 1));
}

#[test]
fn test_local_continuation_without_outer_handler() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, p, _, _, lk| tb.resume_local(lk, p));
        let scoped = tb.handle(args[0], handlers, |tb| {
            let a = ask.perform(tb, &[])?;
            let b = ask.perform(tb, &[])?;
            tb.add(a, b)
        })?;
        Ok(scoped.result)
    });

    let err = program.call(&[Array::from(2)]).unwrap_err();
    assert!(matches!(err, EffectError::UnhandledEffect { ref effect } if effect == "ask"));
}

#[test]
fn test_local_resume_keeps_parameter() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, p, _, _, lk| tb.resume_local(lk, p));
        let scoped = tb.handle(args[0], handlers, |tb| ask.perform(tb, &[]))?;
        Ok(scoped.parameter)
    });

    assert_eq!(program.call(&[Array::from(8)]).unwrap(), Array::from(8));
}

// ============================================================
// Failures
// ============================================================

#[test]
fn test_unhandled_effect() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, _| ask.perform(tb, &[]));

    let err = program.call(&[]).unwrap_err();
    assert!(err.is_unhandled());
    assert_eq!(
        err.to_string(),
        "unhandled effect `ask`: no enclosing handler scope handles it"
    );
}

#[test]
fn test_unhandled_effect_after_state_and_print() {
    let mut registry = EffectRegistry::new();
    let state = StateEffects::declare(&mut registry);
    let missing = registry.declare_returning("missing", 0, i32_scalar());
    let program = effectify(move |tb, args| {
        let scoped = tb.handle(args[0], state.handlers(), |tb| {
            let doubled = tb.add(args[0], args[0])?;
            state.set.perform(tb, &[doubled])?;
            tb.debug_print("before failure: {}", &[doubled])?;
            let v = missing.perform(tb, &[])?;
            let current = state.get.perform(tb, &[])?;
            tb.add(v, current)
        })?;
        Ok(scoped.parameter)
    });

    for _ in 0..2 {
        let err = program.call(&[Array::from(4)]).unwrap_err();
        assert!(matches!(err, EffectError::UnhandledEffect { ref effect } if effect == "missing"));
    }
    assert_eq!(program.cached_signatures(), 1);
}

#[test]
fn test_clause_cannot_handle_its_own_effect() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let program = effectify(move |tb, args| {
        let again = ask.clone();
        let handlers = Handlers::new().on(&ask, move |tb, p, _, k, _| {
            let v = again.perform(tb, &[])?;
            tb.resume(k, p, v)
        });
        let scoped = tb.handle(args[0], handlers, |tb| ask.perform(tb, &[]))?;
        Ok(scoped.result)
    });

    assert!(program.call(&[Array::from(0)]).unwrap_err().is_unhandled());
}

#[test]
fn test_failed_scope_is_popped() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let depth_after = Rc::new(Cell::new(usize::MAX));
    let observed = Rc::clone(&depth_after);
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&ask, |tb, p, _, k, _| tb.resume(k, p, p));
        let failed = tb.handle(args[0], handlers, |tb| {
            let v = ask.perform(tb, &[])?;
            let f = tb.literal(1.0f32)?;
            tb.add(v, f)
        });
        assert!(matches!(failed, Err(EffectError::ShapeMismatch { .. })));
        observed.set(tb.handler_depth());
        Ok(args[0])
    });

    assert_eq!(program.call(&[Array::from(5)]).unwrap(), Array::from(5));
    assert_eq!(depth_after.get(), 0);
}

#[test]
fn test_stack_depth_limit() {
    let mut registry = EffectRegistry::new();
    let ask = ask(&mut registry);
    let config = RuntimeConfig::builder().max_stack_depth(4).build().unwrap();
    let program = effectify(move |tb, args| {
        // The clause post-processes the resumed result, so it stays live.
        let handlers = Handlers::new().on(&ask, |tb, p, _, k, _| {
            let r = tb.resume(k, p, p)?;
            let hundred = tb.literal(100)?;
            tb.add(r, hundred)
        });
        let scoped = tb.handle(args[0], handlers, |tb| {
            let mut total = ask.perform(tb, &[])?;
            for _ in 0..4 {
                let v = ask.perform(tb, &[])?;
                total = tb.add(total, v)?;
            }
            Ok(total)
        })?;
        Ok(scoped.result)
    })
    .with_config(config);

    let err = program.call(&[Array::from(3)]).unwrap_err();
    assert!(matches!(err, EffectError::StackOverflow { limit: 4 }));
}

#[test]
fn test_tail_resume_runs_in_constant_depth() {
    let mut registry = EffectRegistry::new();
    let tick = registry.declare_returning("tick", 0, i32_scalar());
    let config = RuntimeConfig::builder().max_stack_depth(8).build().unwrap();
    let program = effectify(move |tb, args| {
        let handlers = Handlers::new().on(&tick, |tb, p, _, k, _| {
            let one = tb.literal(1)?;
            let next = tb.add(p, one)?;
            tb.resume(k, next, next)
        });
        let scoped = tb.handle(args[0], handlers, |tb| {
            let mut last = tick.perform(tb, &[])?;
            for _ in 1..200 {
                last = tick.perform(tb, &[])?;
            }
            Ok(last)
        })?;
        tb.stack(&[scoped.result, scoped.parameter])
    })
    .with_config(config);

    let (value, stats) = program.call_with_stats(&[Array::from(0)]).unwrap();
    assert_eq!(value, pair(200, 200));
    assert_eq!(stats.dispatches, 200);
    // root and scope; each clause replaces the scope it was dispatched from
    assert_eq!(stats.max_depth, 2);
}

#[test]
fn test_tail_local_resume_pops_clause() {
    let mut registry = EffectRegistry::new();
    let program = demos::local_example(&mut registry);
    let (value, stats) = program.call_with_stats(&[]).unwrap();
    assert_eq!(value, pair(1000, 1));
    assert_eq!(stats.max_depth, 3);
}

