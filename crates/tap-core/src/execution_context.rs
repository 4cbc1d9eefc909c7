//! The "current instance" pointer used while a resource body runs.
//!
//! Bodies nest through ordinary calls, so the pointer is a stack: entering a
//! body pushes its fiber and the returned [`RenderScope`] pops it again, even
//! when the body unwinds.

use std::cell::RefCell;
use std::rc::Rc;

use crate::fiber::FiberCore;

thread_local! {
    static CURRENT_FIBERS: RefCell<Vec<Rc<FiberCore>>> = const { RefCell::new(Vec::new()) };
}

/// Strict auditing inherited by an instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StrictMode {
    /// Strictness requested by the host that owns the instance.
    Root,
    /// Strictness inherited from a strict parent.
    Child,
}

#[must_use]
pub(crate) struct RenderScope {
    fiber: Rc<FiberCore>,
}

impl RenderScope {
    pub(crate) fn enter(fiber: &Rc<FiberCore>) -> Self {
        fiber.begin_render();
        CURRENT_FIBERS.with(|stack| stack.borrow_mut().push(Rc::clone(fiber)));
        Self {
            fiber: Rc::clone(fiber),
        }
    }
}

impl Drop for RenderScope {
    fn drop(&mut self) {
        CURRENT_FIBERS.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert!(popped.is_some_and(|fiber| Rc::ptr_eq(&fiber, &self.fiber)));
        });
        self.fiber.end_render();
    }
}

/// Fiber whose body is running right now.
///
/// Panics when called outside of a resource body.
pub(crate) fn current_fiber() -> Rc<FiberCore> {
    try_current_fiber().unwrap_or_else(|| panic!("tap hooks can only be called inside a resource body"))
}

pub(crate) fn try_current_fiber() -> Option<Rc<FiberCore>> {
    CURRENT_FIBERS.with(|stack| stack.borrow().last().cloned())
}

/// Strictness for a new instance: explicit requests win, otherwise the
/// instance inherits from the body that creates it.
pub(crate) fn get_dev_strict_mode(explicit: bool) -> Option<StrictMode> {
    if explicit {
        return Some(StrictMode::Root);
    }
    match try_current_fiber() {
        Some(parent) if parent.strict_mode().is_some() => Some(StrictMode::Child),
        _ => None,
    }
}
