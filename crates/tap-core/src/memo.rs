//! Memoized values, stored as derived state of a reducer cell.
//!
//! A recomputed value is pending state like any other update: it becomes the
//! committed value with the render's commit and is discarded when the root
//! rolls back.

use std::convert::Infallible;
use std::rc::Rc;

use crate::cell::Deps;
use crate::reducer::{Reducer, ReducerCell};

struct MemoEntry<T> {
    value: T,
    deps: Rc<dyn Deps>,
}

type MemoState<T> = Rc<MemoEntry<T>>;

fn same_entry<T>(a: &MemoState<T>, b: &MemoState<T>) -> bool {
    Rc::ptr_eq(a, b)
}

fn no_actions<T>(_state: &MemoState<T>, action: &Infallible) -> MemoState<T> {
    match *action {}
}

/// `audit` re-runs the computation for strict instances.
fn memo_impl<T: Clone + 'static>(
    deps: Rc<dyn Deps>,
    compute: impl FnOnce() -> T,
    audit: impl Fn(),
) -> T {
    let reducer = Reducer::new(no_actions::<T>);
    let mut compute = Some(compute);
    let mut evaluate = |deps: Rc<dyn Deps>, strict: bool| {
        let compute = compute.take().expect("memo computes at most once per render");
        if strict {
            audit();
        }
        Rc::new(MemoEntry {
            value: compute(),
            deps,
        })
    };

    let mut created = false;
    let (fiber, cell) = ReducerCell::tap(
        reducer.clone(),
        || {
            created = true;
            let strict = crate::execution_context::current_fiber().is_strict();
            evaluate(Rc::clone(&deps), strict)
        },
        same_entry::<T>,
    );
    let entry = cell.render(&fiber, reducer);
    if created || entry.deps.same_as(deps.as_ref()) {
        return entry.value.clone();
    }
    let next = evaluate(deps, fiber.is_strict());
    cell.derive(next).value.clone()
}

/// Returns `compute()`, recomputed only when `deps` changes.
///
/// While `deps` compares equal the previous value is returned, so a
/// structurally equal but freshly built result never replaces it. Strict
/// instances call `compute` one extra time whenever it runs.
pub fn tap_memo<T, D>(compute: impl Fn() -> T, deps: D) -> T
where
    T: Clone + 'static,
    D: Deps,
{
    memo_impl(Rc::new(deps), &compute, || {
        let _ = compute();
    })
}

/// Value computed on the first render and kept for the instance's lifetime.
pub fn tap_const<T: Clone + 'static>(compute: impl Fn() -> T) -> T {
    tap_memo(compute, ())
}

/// Returns the same `Rc<F>` until `deps` changes.
pub fn tap_callback<F, D>(callback: F, deps: D) -> Rc<F>
where
    F: 'static,
    D: Deps,
{
    memo_impl(Rc::new(deps), move || Rc::new(callback), || {})
}
