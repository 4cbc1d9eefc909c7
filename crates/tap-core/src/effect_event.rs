//! Callbacks with a stable identity that run the closure of the last commit.

use std::convert::Infallible;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::fiber::FiberCore;
use crate::reducer::{Reducer, ReducerCell};

type Handler<A, O> = Rc<dyn Fn(A) -> O>;

fn same_handler<A, O>(a: &Handler<A, O>, b: &Handler<A, O>) -> bool {
    Rc::ptr_eq(a, b)
}

fn no_actions<A, O>(_state: &Handler<A, O>, action: &Infallible) -> Handler<A, O> {
    match *action {}
}

/// Handle returned by [`tap_effect_event`].
///
/// The handle is the same on every render of its instance, so it can be
/// captured by an effect that mounts once without going stale.
pub struct EffectEvent<A, O = ()> {
    cell: Rc<ReducerCell<Handler<A, O>, Infallible>>,
    fiber: Weak<FiberCore>,
}

impl<A, O> Clone for EffectEvent<A, O> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            fiber: Weak::clone(&self.fiber),
        }
    }
}

impl<A, O> PartialEq for EffectEvent<A, O> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<A, O> Eq for EffectEvent<A, O> {}

impl<A, O> fmt::Debug for EffectEvent<A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectEvent")
            .field("cell", &Rc::as_ptr(&self.cell))
            .finish()
    }
}

impl<A: 'static, O: 'static> EffectEvent<A, O> {
    /// Runs the closure passed by the last committed render.
    ///
    /// # Panics
    ///
    /// While the owning instance renders.
    pub fn call(&self, arg: A) -> O {
        if self.fiber.upgrade().is_some_and(|fiber| fiber.is_rendering()) {
            panic!("Effect events cannot be called during render");
        }
        let handler = self.cell.committed();
        handler(arg)
    }
}

/// Wraps `handler` in a handle whose identity never changes.
///
/// Each render offers a new closure; it replaces the previous one when that
/// render commits, before any effect of the commit runs. A discarded render
/// leaves the previous closure in place.
pub fn tap_effect_event<A, O>(handler: impl Fn(A) -> O + 'static) -> EffectEvent<A, O>
where
    A: 'static,
    O: 'static,
{
    let handler: Handler<A, O> = Rc::new(handler);
    let reducer = Reducer::new(no_actions::<A, O>);
    let initial = Rc::clone(&handler);
    let (fiber, cell) = ReducerCell::tap(reducer.clone(), || initial, same_handler::<A, O>);
    let _ = cell.render(&fiber, reducer);
    let _ = cell.derive(handler);
    EffectEvent {
        cell,
        fiber: Rc::downgrade(&fiber),
    }
}
