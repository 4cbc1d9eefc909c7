//! Reducer cells and the state hooks built on them.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::{DirtyCell, HookCell};
use crate::execution_context::current_fiber;
use crate::fiber::FiberCore;
use crate::root::ApplyUpdate;

/// A reducer function plus enough identity to tell whether two renders
/// passed the same one.
///
/// Only closures without captures have an identity: their type fixes their
/// behavior. Any other reducer is treated as new on every render.
pub(crate) struct Reducer<S, A> {
    call: Rc<dyn Fn(&S, &A) -> S>,
    identity: Option<TypeId>,
}

impl<S, A> Clone for Reducer<S, A> {
    fn clone(&self) -> Self {
        Self {
            call: Rc::clone(&self.call),
            identity: self.identity,
        }
    }
}

impl<S: 'static, A: 'static> Reducer<S, A> {
    pub(crate) fn new<F: Fn(&S, &A) -> S + 'static>(reducer: F) -> Self {
        let identity = (std::mem::size_of::<F>() == 0).then(TypeId::of::<F>);
        Self {
            call: Rc::new(reducer),
            identity,
        }
    }

    fn apply(&self, state: &S, action: &A) -> S {
        (self.call)(state, action)
    }

    fn same_as(&self, other: &Self) -> bool {
        matches!((self.identity, other.identity), (Some(a), Some(b)) if a == b)
    }
}

struct QueueEntry<S, A> {
    action: A,
    /// Precomputed result and the reducer that produced it.
    eager: RefCell<Option<(S, Reducer<S, A>)>>,
}

/// Persistent state slot updated through its own [`Dispatch`].
pub(crate) struct ReducerCell<S, A> {
    this: Weak<ReducerCell<S, A>>,
    fiber: Weak<FiberCore>,
    queue: RefCell<Vec<Rc<QueueEntry<S, A>>>>,
    dirty: Cell<bool>,
    work_in_progress: RefCell<S>,
    current: RefCell<S>,
    reducer: RefCell<Reducer<S, A>>,
    same: fn(&S, &S) -> bool,
    dispatch: Dispatch<A>,
}

trait ActionTarget<A> {
    fn dispatch(self: Rc<Self>, action: A);
}

impl<S: Clone + 'static, A: 'static> ReducerCell<S, A> {
    pub(crate) fn new(
        fiber: &Rc<FiberCore>,
        reducer: Reducer<S, A>,
        initial: S,
        same: fn(&S, &S) -> bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let target: Weak<dyn ActionTarget<A>> = this.clone();
            Self {
                this: this.clone(),
                fiber: Rc::downgrade(fiber),
                queue: RefCell::new(Vec::new()),
                dirty: Cell::new(false),
                work_in_progress: RefCell::new(initial.clone()),
                current: RefCell::new(initial),
                reducer: RefCell::new(reducer),
                same,
                dispatch: Dispatch {
                    target: Rc::new(target),
                },
            }
        })
    }

    /// Allocates or fetches the reducer cell at the cursor.
    pub(crate) fn tap(
        reducer: Reducer<S, A>,
        init: impl FnOnce() -> S,
        same: fn(&S, &S) -> bool,
    ) -> (Rc<FiberCore>, Rc<Self>) {
        let fiber = current_fiber();
        let cell = fiber
            .next_cell(|| HookCell::Reducer(Self::new(&fiber, reducer, init(), same)))
            .into_reducer::<Self>();
        (fiber, cell)
    }

    /// Folds queued actions into the in-progress value using `reducer`.
    ///
    /// A precomputed value is reused only when it came from the same reducer.
    pub(crate) fn render(&self, fiber: &FiberCore, reducer: Reducer<S, A>) -> S {
        *self.reducer.borrow_mut() = reducer.clone();
        let entries = std::mem::take(&mut *self.queue.borrow_mut());
        for entry in entries {
            let known = entry
                .eager
                .borrow()
                .as_ref()
                .filter(|(_, producer)| producer.same_as(&reducer))
                .map(|(value, _)| value.clone());
            let next = match known {
                Some(next) => next,
                None => {
                    let next = reducer.apply(&self.work_in_progress.borrow(), &entry.action);
                    *entry.eager.borrow_mut() = Some((next.clone(), reducer.clone()));
                    next
                }
            };
            if fiber.is_strict() {
                let _ = reducer.apply(&self.work_in_progress.borrow(), &entry.action);
            }
            *self.work_in_progress.borrow_mut() = next;
        }
        self.work_in_progress.borrow().clone()
    }

    /// Replaces the in-progress value with `derived` unless it is the same.
    pub(crate) fn derive(&self, derived: S) -> S {
        let unchanged = (self.same)(&derived, &self.work_in_progress.borrow());
        if !unchanged {
            self.mark_dirty();
            *self.work_in_progress.borrow_mut() = derived;
        }
        self.work_in_progress.borrow().clone()
    }

    pub(crate) fn committed(&self) -> S {
        self.current.borrow().clone()
    }

    pub(crate) fn dispatch_handle(&self) -> Dispatch<A> {
        self.dispatch.clone()
    }

    fn mark_dirty(&self) {
        if self.dirty.replace(true) {
            return;
        }
        if let (Some(fiber), Some(this)) = (self.fiber.upgrade(), self.this.upgrade()) {
            fiber.root().mark_cell_dirty(this);
        }
    }

    fn enqueue(&self, entry: &Rc<QueueEntry<S, A>>) {
        self.mark_dirty();
        {
            let mut queue = self.queue.borrow_mut();
            if !queue.iter().any(|queued| Rc::ptr_eq(queued, entry)) {
                queue.push(Rc::clone(entry));
            }
        }
        if let Some(fiber) = self.fiber.upgrade() {
            fiber.mark_dirty();
        }
    }
}

impl<S: Clone + 'static, A: 'static> ActionTarget<A> for ReducerCell<S, A> {
    fn dispatch(self: Rc<Self>, action: A) {
        let Some(fiber) = self.fiber.upgrade() else {
            log::debug!("ignoring update dispatched to a dropped resource");
            return;
        };
        if fiber.is_rendering() {
            panic!("Resource updated during render");
        }
        if fiber.is_never_mounted() {
            panic!("Resource updated before mount");
        }
        if !fiber.is_mounted() {
            log::debug!("ignoring update dispatched to an unmounted resource");
            return;
        }

        let entry = Rc::new(QueueEntry {
            action,
            eager: RefCell::new(None),
        });
        let root = fiber.root();
        root.dispatch_update(&|allow_eager| {
            if allow_eager && !root.has_dirty_cells() && entry.eager.borrow().is_none() {
                let reducer = self.reducer.borrow().clone();
                let eager = reducer.apply(&self.work_in_progress.borrow(), &entry.action);
                let unchanged = (self.same)(&self.current.borrow(), &eager);
                *entry.eager.borrow_mut() = Some((eager, reducer));
                if unchanged {
                    return None;
                }
            }
            let cell = Rc::clone(&self);
            let entry = Rc::clone(&entry);
            let apply: ApplyUpdate = Rc::new(move || cell.enqueue(&entry));
            Some(apply)
        });
    }
}

impl<S: Clone + 'static, A: 'static> DirtyCell for ReducerCell<S, A> {
    fn commit(&self) {
        *self.current.borrow_mut() = self.work_in_progress.borrow().clone();
        self.dirty.set(false);
    }

    fn rollback(&self) {
        *self.work_in_progress.borrow_mut() = self.current.borrow().clone();
        self.queue.borrow_mut().clear();
        self.dirty.set(false);
        if let Some(fiber) = self.fiber.upgrade() {
            fiber.mark_dirty();
        }
    }
}

/// Identity-stable handle queueing actions on one reducer cell.
pub struct Dispatch<A> {
    target: Rc<Weak<dyn ActionTarget<A>>>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            target: Rc::clone(&self.target),
        }
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("target", &Rc::as_ptr(&self.target))
            .finish()
    }
}

impl<A: 'static> Dispatch<A> {
    /// Queues `action`.
    ///
    /// # Panics
    ///
    /// While the owning instance renders, or before its first commit.
    pub fn dispatch(&self, action: A) {
        match self.target.upgrade() {
            Some(target) => target.dispatch(action),
            None => log::debug!("ignoring update dispatched to a dropped resource"),
        }
    }

    /// Whether both handles dispatch to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
    }
}

impl<A> PartialEq for Dispatch<A> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
    }
}

impl<A> Eq for Dispatch<A> {}

fn same_value<S: PartialEq>(a: &S, b: &S) -> bool {
    a == b
}

/// Reducer state: `(state, dispatch)`.
///
/// Dispatching an action whose result equals the committed state does not
/// schedule a re-render.
pub fn tap_reducer<S, A>(reducer: impl Fn(&S, &A) -> S + 'static, initial: S) -> (S, Dispatch<A>)
where
    S: Clone + PartialEq + 'static,
    A: 'static,
{
    let reducer = Reducer::new(reducer);
    let (fiber, cell) = ReducerCell::tap(reducer.clone(), || initial, same_value::<S>);
    (cell.render(&fiber, reducer), cell.dispatch_handle())
}

/// Like [`tap_reducer`] with the initial state computed as `init(&arg)`.
///
/// Strict instances call `init` one extra time on the first render.
pub fn tap_reducer_with_init<S, A, I>(
    reducer: impl Fn(&S, &A) -> S + 'static,
    arg: I,
    init: impl Fn(&I) -> S,
) -> (S, Dispatch<A>)
where
    S: Clone + PartialEq + 'static,
    A: 'static,
{
    let reducer = Reducer::new(reducer);
    let (fiber, cell) = ReducerCell::tap(
        reducer.clone(),
        || {
            let state = init(&arg);
            if current_fiber().is_strict() {
                let _ = init(&arg);
            }
            state
        },
        same_value::<S>,
    );
    (cell.render(&fiber, reducer), cell.dispatch_handle())
}

/// Reducer whose rendered state is passed through `derive`.
///
/// A derived value that differs from the reduced one becomes pending state of
/// the cell and is committed with the rest of the render.
pub fn tap_reducer_with_derived_state<S, A>(
    reducer: impl Fn(&S, &A) -> S + 'static,
    derive: impl FnOnce(&S) -> S,
    initial: S,
) -> (S, Dispatch<A>)
where
    S: Clone + PartialEq + 'static,
    A: 'static,
{
    let reducer = Reducer::new(reducer);
    let (fiber, cell) = ReducerCell::tap(reducer.clone(), || initial, same_value::<S>);
    let state = cell.render(&fiber, reducer);
    (cell.derive(derive(&state)), cell.dispatch_handle())
}

/// Action understood by [`tap_state`].
pub enum StateUpdate<T> {
    Value(T),
    Updater(Rc<dyn Fn(&T) -> T>),
}

fn apply_state_update<T: Clone>(state: &T, update: &StateUpdate<T>) -> T {
    match update {
        StateUpdate::Value(value) => value.clone(),
        StateUpdate::Updater(updater) => updater(state),
    }
}

/// Setter returned by [`tap_state`].
pub struct StateSetter<T> {
    dispatch: Dispatch<StateUpdate<T>>,
}

impl<T> Clone for StateSetter<T> {
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<T: 'static> StateSetter<T> {
    pub fn set(&self, value: T) {
        self.dispatch.dispatch(StateUpdate::Value(value));
    }

    /// Queues `updater`, which receives the latest pending state.
    pub fn update(&self, updater: impl Fn(&T) -> T + 'static) {
        self.dispatch.dispatch(StateUpdate::Updater(Rc::new(updater)));
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.dispatch.ptr_eq(&other.dispatch)
    }
}

impl<T> PartialEq for StateSetter<T> {
    fn eq(&self, other: &Self) -> bool {
        self.dispatch == other.dispatch
    }
}

impl<T> Eq for StateSetter<T> {}

pub fn tap_state<T>(initial: T) -> (T, StateSetter<T>)
where
    T: Clone + PartialEq + 'static,
{
    let (state, dispatch) = tap_reducer(apply_state_update::<T>, initial);
    (state, StateSetter { dispatch })
}

/// State initialized lazily by `init`, called once per instance (twice for
/// strict instances).
pub fn tap_state_with<T>(init: impl Fn() -> T) -> (T, StateSetter<T>)
where
    T: Clone + PartialEq + 'static,
{
    let (state, dispatch) = tap_reducer_with_init(apply_state_update::<T>, (), |_| init());
    (state, StateSetter { dispatch })
}
