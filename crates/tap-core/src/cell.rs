//! Per-instance memory slots.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// One slot in an instance's ordered cell list.
#[derive(Clone)]
pub(crate) enum HookCell {
    /// A `ReducerCell<S, A>` behind `dyn Any`.
    Reducer(Rc<dyn Any>),
    Effect(Rc<EffectCell>),
}

const HOOK_ORDER_CHANGED: &str = "Hook order changed between renders";

impl HookCell {
    pub(crate) fn into_reducer<T: 'static>(self) -> Rc<T> {
        match self {
            HookCell::Reducer(cell) => cell.downcast::<T>().unwrap_or_else(|_| panic!("{HOOK_ORDER_CHANGED}")),
            HookCell::Effect(_) => panic!("{HOOK_ORDER_CHANGED}"),
        }
    }

    pub(crate) fn into_effect(self) -> Rc<EffectCell> {
        match self {
            HookCell::Effect(cell) => cell,
            HookCell::Reducer(_) => panic!("{HOOK_ORDER_CHANGED}"),
        }
    }
}

/// A cell with uncommitted work tracked by its root.
pub(crate) trait DirtyCell {
    /// Promotes the in-progress value to the committed one.
    fn commit(&self);
    /// Drops queued actions and resets the in-progress value.
    fn rollback(&self);
}

/// Dependency values compared between invocations.
///
/// Implemented for every `PartialEq + 'static` type; tuples compare pairwise.
pub trait Deps: 'static {
    fn same_as(&self, other: &dyn Deps) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: PartialEq + 'static> Deps for T {
    fn same_as(&self, other: &dyn Deps) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Effect slot: the cleanup of the last mount and the deps it ran with.
#[derive(Default)]
pub(crate) struct EffectCell {
    cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    deps: RefCell<Option<Rc<dyn Deps>>>,
}

impl EffectCell {
    /// Whether a mount task is needed for `deps`. `None` always runs.
    pub(crate) fn needs_run(&self, deps: Option<&Rc<dyn Deps>>) -> bool {
        match (deps, self.deps.borrow().as_ref()) {
            (Some(next), Some(previous)) => !next.same_as(previous.as_ref()),
            _ => true,
        }
    }

    pub(crate) fn take_cleanup(&self) -> Option<Box<dyn FnOnce()>> {
        self.cleanup.borrow_mut().take()
    }

    pub(crate) fn set_cleanup(&self, cleanup: Option<Box<dyn FnOnce()>>) {
        *self.cleanup.borrow_mut() = cleanup;
    }

    pub(crate) fn set_deps(&self, deps: Option<Rc<dyn Deps>>) {
        *self.deps.borrow_mut() = deps;
    }
}
