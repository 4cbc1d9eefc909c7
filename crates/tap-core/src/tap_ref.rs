use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::reducer::{Reducer, ReducerCell};

/// Mutable box that survives re-renders of its instance.
///
/// Writes are invisible to the scheduler: changing a `TapRef` never causes a
/// re-render.
pub struct TapRef<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> Clone for TapRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TapRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TapRef").field(&*self.inner.borrow()).finish()
    }
}

impl<T> TapRef<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
        }
    }

    /// Run `f` with an immutable reference to the stored value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow())
    }

    /// Run `f` with a mutable reference to the stored value.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    pub fn replace(&self, value: T) -> T {
        self.inner.replace(value)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> PartialEq for TapRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for TapRef<T> {}

impl<T: Clone> TapRef<T> {
    pub fn get(&self) -> T {
        self.inner.borrow().clone()
    }
}

fn same_ref<T>(a: &TapRef<T>, b: &TapRef<T>) -> bool {
    a.ptr_eq(b)
}

fn no_action<T>(state: &TapRef<T>, _: &()) -> TapRef<T> {
    state.clone()
}

/// Returns the instance's persistent box, created from `initial` on the first
/// render.
pub fn tap_ref<T: 'static>(initial: T) -> TapRef<T> {
    let reducer = Reducer::new(no_action::<T>);
    let (fiber, cell) = ReducerCell::tap(reducer.clone(), || TapRef::new(initial), same_ref::<T>);
    cell.render(&fiber, reducer)
}
