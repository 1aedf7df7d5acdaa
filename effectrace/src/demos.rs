//! Example programs.
//!
//! Each demo declares its effects into the caller's [`EffectRegistry`] and
//! returns an [`Effectified`] program. Programs that report a handler's final
//! parameter return `[result, parameter]`.
//!
//! | Demo     | Arguments | Shows                                         |
//! |----------|-----------|-----------------------------------------------|
//! | `state`  | `x: i32`  | get/set threaded through the parameter        |
//! | `abort`  | `x: i32`  | a clause returning without resuming           |
//! | `nested` | none      | the innermost handler wins                    |
//! | `local`  | none      | `lk` bypasses the capturing handler, `k` not  |

use crate::effects::{effectify, EffectHandle, EffectRegistry, Effectified, Handlers};
use crate::error::Result;
use crate::trace::{DType, ShapedArray, Tracer, Var};

fn i32_scalar() -> ShapedArray {
    ShapedArray::scalar(DType::I32)
}

/// Names and one-line descriptions of the demos.
pub const DEMOS: &[(&str, &str)] = &[
    ("state", "parameterized state: get/set threaded through the handler"),
    ("abort", "a handler that returns without resuming"),
    ("nested", "two handlers for one effect; the innermost wins"),
    ("local", "resuming with lk versus k"),
];

/// The `state_get` / `state_set` effect pair.
#[derive(Debug, Clone)]
pub struct StateEffects {
    /// `state_get() -> i32[]`
    pub get: EffectHandle,
    /// `state_set(i32[]) -> bool[]`
    pub set: EffectHandle,
}

impl StateEffects {
    /// Declare both effects.
    pub fn declare(registry: &mut EffectRegistry) -> Self {
        let get = registry.declare_returning("state_get", 0, i32_scalar());
        let set = registry.declare_returning("state_set", 1, ShapedArray::scalar(DType::Bool));
        Self { get, set }
    }

    /// Handlers keeping the state in the handler parameter.
    pub fn handlers(&self) -> Handlers {
        Handlers::new()
            .on(&self.get, |tb, s, _, k, _| tb.resume(k, s, s))
            .on(&self.set, |tb, _, args, k, _| {
                let ok = tb.literal(true)?;
                tb.resume(k, args[0], ok)
            })
    }
}

/// `get; set(x * 2); get; set(get + 5); get`, summing the three reads.
pub fn state_computation(tb: &mut Tracer, effects: &StateEffects, x: Var) -> Result<Var> {
    let get_0 = effects.get.perform(tb, &[])?;
    let two = tb.literal(2)?;
    let doubled = tb.mul(x, two)?;
    effects.set.perform(tb, &[doubled])?;
    let get_1 = effects.get.perform(tb, &[])?;
    let five = tb.literal(5)?;
    let bumped = tb.add(get_1, five)?;
    effects.set.perform(tb, &[bumped])?;
    let get_2 = effects.get.perform(tb, &[])?;
    let partial = tb.add(get_0, get_1)?;
    tb.add(partial, get_2)
}

/// The state demo. With `x = 3` it returns `[20, 11]`.
pub fn state_example(
    registry: &mut EffectRegistry,
) -> Effectified<impl Fn(&mut Tracer, &[Var]) -> Result<Var>> {
    let effects = StateEffects::declare(registry);
    effectify(move |tb, args| {
        let x = args[0];
        let scoped = tb.handle(x, effects.handlers(), |tb| {
            tb.debug_print("x is {}", &[x])?;
            state_computation(tb, &effects, x)
        })?;
        tb.stack(&[scoped.result, scoped.parameter])
    })
}

/// Sets the state to `x + 1`, then aborts with `x * 10`. With `x = 3` it
/// returns `[30, 4]`: the final parameter is the one in force at the abort.
pub fn abort_example(
    registry: &mut EffectRegistry,
) -> Effectified<impl Fn(&mut Tracer, &[Var]) -> Result<Var>> {
    let state = StateEffects::declare(registry);
    let abort = registry.declare("abort", 1, |args| Ok(args[0].clone()));
    effectify(move |tb, args| {
        let x = args[0];
        let handlers = state
            .handlers()
            .on(&abort, |_, _, args, _, _| Ok(args[0]));
        let scoped = tb.handle(x, handlers, |tb| {
            let one = tb.literal(1)?;
            let next = tb.add(x, one)?;
            state.set.perform(tb, &[next])?;
            let ten = tb.literal(10)?;
            let code = tb.mul(x, ten)?;
            let resumed = abort.perform(tb, &[code])?;
            tb.debug_print("not reached: {}", &[resumed])?;
            tb.add(resumed, x)
        })?;
        tb.stack(&[scoped.result, scoped.parameter])
    })
}

/// Two scopes handle `ask`, the outer with parameter 1 and the inner with
/// 100. Asking inside the inner scope yields 100, outside it 1: returns 101.
pub fn nested_example(
    registry: &mut EffectRegistry,
) -> Effectified<impl Fn(&mut Tracer, &[Var]) -> Result<Var>> {
    let ask = registry.declare_returning("ask", 0, i32_scalar());
    effectify(move |tb, _| {
        let answer = Handlers::new().on(&ask, |tb, p, _, k, _| tb.resume(k, p, p));
        let outer_init = tb.literal(1)?;
        let scoped = tb.handle(outer_init, answer.clone(), |tb| {
            let inner_init = tb.literal(100)?;
            let inner = tb.handle(inner_init, answer.clone(), |tb| ask.perform(tb, &[]))?;
            let outer = ask.perform(tb, &[])?;
            tb.add(inner.result, outer)
        })?;
        Ok(scoped.result)
    })
}

/// An outer scope answers `tick` with 1000. Two inner scopes answer their
/// first `tick` with 0, one resuming with `lk` and one with `k` (counting
/// up). The second `tick` escapes the first inner scope but not the second:
/// returns `[1000, 1]`.
pub fn local_example(
    registry: &mut EffectRegistry,
) -> Effectified<impl Fn(&mut Tracer, &[Var]) -> Result<Var>> {
    let tick = registry.declare_returning("tick", 0, i32_scalar());
    effectify(move |tb, _| {
        let fixed = Handlers::new().on(&tick, |tb, p, _, k, _| tb.resume(k, p, p));
        let local = Handlers::new().on(&tick, |tb, p, _, _, lk| tb.resume_local(lk, p));
        let counting = Handlers::new().on(&tick, |tb, p, _, k, _| {
            let one = tb.literal(1)?;
            let next = tb.add(p, one)?;
            tb.resume(k, next, p)
        });
        let two_ticks = |tb: &mut Tracer| {
            let a = tick.perform(tb, &[])?;
            let b = tick.perform(tb, &[])?;
            tb.add(a, b)
        };

        let outer_init = tb.literal(1000)?;
        let scoped = tb.handle(outer_init, fixed, |tb| {
            let zero = tb.literal(0)?;
            let via_lk = tb.handle(zero, local, two_ticks)?;
            let via_k = tb.handle(zero, counting, two_ticks)?;
            tb.stack(&[via_lk.result, via_k.result])
        })?;
        Ok(scoped.result)
    })
}
