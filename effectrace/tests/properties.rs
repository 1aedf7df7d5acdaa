//! Property-based tests for the dispatch engine.
//!
//! Effect-free programs must evaluate the same through `effectify` as through
//! plain evaluation, and handler parameters must thread state exactly like an
//! explicit accumulator.

use effectrace::demos::StateEffects;
use effectrace::{
    effectify, trace_fn, Array, DType, EffectRegistry, Handlers, ShapedArray, Tracer, Var,
};
use proptest::prelude::*;

// ============================================================
// Strategies
// ============================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Add(i32),
    Sub(i32),
    Mul(i32),
    Max(i32),
    Min(i32),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<i32>().prop_map(Step::Add),
        any::<i32>().prop_map(Step::Sub),
        (-100i32..100).prop_map(Step::Mul),
        any::<i32>().prop_map(Step::Max),
        any::<i32>().prop_map(Step::Min),
    ]
}

fn steps_strategy() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step_strategy(), 0..12)
}

fn apply_steps(tb: &mut Tracer, x: Var, steps: &[Step]) -> effectrace::Result<Var> {
    let mut acc = x;
    for step in steps {
        acc = match *step {
            Step::Add(c) => {
                let c = tb.literal(c)?;
                tb.add(acc, c)?
            }
            Step::Sub(c) => {
                let c = tb.literal(c)?;
                tb.sub(acc, c)?
            }
            Step::Mul(c) => {
                let c = tb.literal(c)?;
                tb.mul(acc, c)?
            }
            Step::Max(c) => {
                let c = tb.literal(c)?;
                tb.max(acc, c)?
            }
            Step::Min(c) => {
                let c = tb.literal(c)?;
                tb.min(acc, c)?
            }
        };
    }
    Ok(acc)
}

fn i32_scalar() -> ShapedArray {
    ShapedArray::scalar(DType::I32)
}

// ============================================================
// Properties
// ============================================================

proptest! {
    /// Without effects, `effectify` agrees with plain evaluation.
    #[test]
    fn effect_free_programs_agree(x in any::<i32>(), steps in steps_strategy()) {
        let plain_steps = steps.clone();
        let plain = trace_fn(|tb, args| apply_steps(tb, args[0], &plain_steps), &[i32_scalar()])
            .unwrap();
        let effectified = effectify(move |tb, args| apply_steps(tb, args[0], &steps));

        let args = [Array::from(x)];
        prop_assert_eq!(effectified.call(&args).unwrap(), plain.evaluate(&args).unwrap());
    }

    /// An installed handler that is never invoked changes nothing.
    #[test]
    fn unused_handler_is_transparent(x in any::<i32>(), steps in steps_strategy()) {
        let mut registry = EffectRegistry::new();
        let unused = registry.declare_returning("unused", 0, i32_scalar());
        let plain_steps = steps.clone();
        let plain = trace_fn(|tb, args| apply_steps(tb, args[0], &plain_steps), &[i32_scalar()])
            .unwrap();
        let scoped = effectify(move |tb, args| {
            let handlers = Handlers::new().on(&unused, |tb, p, _, k, _| tb.resume(k, p, p));
            let zero = tb.literal(0)?;
            let scoped = tb.handle(zero, handlers, |tb| apply_steps(tb, args[0], &steps))?;
            Ok(scoped.result)
        });

        let args = [Array::from(x)];
        prop_assert_eq!(scoped.call(&args).unwrap(), plain.evaluate(&args).unwrap());
    }

    /// Each `set` replaces the parameter and each `get` reads the latest one.
    #[test]
    fn state_threads_like_an_accumulator(
        init in any::<i32>(),
        writes in prop::collection::vec(any::<i32>(), 0..8),
    ) {
        let mut registry = EffectRegistry::new();
        let state = StateEffects::declare(&mut registry);
        let values = writes.clone();
        let program = effectify(move |tb, args| {
            let scoped = tb.handle(args[0], state.handlers(), |tb| {
                let mut total = state.get.perform(tb, &[])?;
                for &w in &values {
                    let w = tb.literal(w)?;
                    state.set.perform(tb, &[w])?;
                    let read = state.get.perform(tb, &[])?;
                    total = tb.add(total, read)?;
                }
                Ok(total)
            })?;
            tb.stack(&[scoped.result, scoped.parameter])
        });

        let expected_total = writes.iter().fold(init, |acc, &w| acc.wrapping_add(w));
        let expected_final = writes.last().copied().unwrap_or(init);
        let expected = Array::from_i32(vec![2], vec![expected_total, expected_final]).unwrap();
        prop_assert_eq!(program.call(&[Array::from(init)]).unwrap(), expected);
    }

    /// A counter handler sees exactly as many dispatches as performs.
    #[test]
    fn every_perform_dispatches_once(ticks in 0usize..10) {
        let mut registry = EffectRegistry::new();
        let tick = registry.declare_returning("tick", 0, i32_scalar());
        let program = effectify(move |tb, _| {
            let counting = Handlers::new().on(&tick, |tb, p, _, k, _| {
                let one = tb.literal(1)?;
                let next = tb.add(p, one)?;
                tb.resume(k, next, p)
            });
            let zero = tb.literal(0)?;
            let scoped = tb.handle(zero, counting, |tb| {
                let mut last = tb.literal(-1)?;
                for _ in 0..ticks {
                    last = tick.perform(tb, &[])?;
                }
                Ok(last)
            })?;
            Ok(scoped.parameter)
        });

        let (value, stats) = program.call_with_stats(&[]).unwrap();
        prop_assert_eq!(value, Array::from(ticks as i32));
        prop_assert_eq!(stats.dispatches, ticks);
        prop_assert_eq!(stats.resumes, ticks);
    }
}
