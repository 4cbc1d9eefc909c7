//! Pull/push access to committed outputs.
//!
//! [`ResourceHandle`](crate::ResourceHandle) and the nested root helpers in
//! this module expose the same contract: `get_value` returns the last
//! published output, `subscribe` registers a callback run after each
//! publication.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::effect::{on_cleanup, tap_effect, tap_effect_with};
use crate::error::{raise, ErrorSink, TapError};
use crate::execution_context::get_dev_strict_mode;
use crate::fiber::{RenderResult, ResourceFiber};
use crate::memo::{tap_const, tap_memo};
use crate::resource::Element;
use crate::root::{FiberRoot, UpdateMode};
use crate::scheduler::{flush_resources_sync, UpdateScheduler};

#[derive(Default)]
struct Subscribers {
    next_id: Cell<usize>,
    callbacks: RefCell<IndexMap<usize, Rc<dyn Fn()>>>,
}

impl Subscribers {
    fn notify(&self) {
        let callbacks: Vec<_> = self.callbacks.borrow().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

/// Removes a subscription registered with `subscribe`.
#[must_use = "dropping an Unsubscribe keeps the callback registered"]
pub struct Unsubscribe {
    subscribers: Weak<Subscribers>,
    id: usize,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.callbacks.borrow_mut().shift_remove(&self.id);
        }
    }
}

/// Last published value plus its subscribers.
pub(crate) struct ValueStore<T> {
    value: RefCell<Option<T>>,
    subscribers: Rc<Subscribers>,
}

impl<T: Clone> ValueStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: RefCell::new(None),
            subscribers: Rc::default(),
        }
    }

    pub(crate) fn get(&self) -> T {
        self.value
            .borrow()
            .clone()
            .expect("a resource output is rendered before it can be read")
    }

    pub(crate) fn try_get(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    /// Stores `value` unless a value is already present.
    pub(crate) fn seed(&self, value: T) {
        let mut current = self.value.borrow_mut();
        if current.is_none() {
            *current = Some(value);
        }
    }

    pub(crate) fn subscribe(&self, callback: impl Fn() + 'static) -> Unsubscribe {
        let id = self.subscribers.next_id.get();
        self.subscribers.next_id.set(id + 1);
        self.subscribers
            .callbacks
            .borrow_mut()
            .insert(id, Rc::new(callback));
        Unsubscribe {
            subscribers: Rc::downgrade(&self.subscribers),
            id,
        }
    }
}

impl<T: Clone + PartialEq> ValueStore<T> {
    /// Stores `value` if it differs from the stored one. Subscribers hear
    /// about the change only when `notify` is set.
    pub(crate) fn publish(&self, value: T, notify: bool) -> bool {
        if self.value.borrow().as_ref() == Some(&value) {
            return false;
        }
        *self.value.borrow_mut() = Some(value);
        if notify {
            self.subscribers.notify();
        }
        true
    }
}

/// Output of an embedded resource tree.
pub struct SubscribableResource<T> {
    store: Rc<ValueStore<T>>,
}

impl<T> Clone for SubscribableResource<T> {
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }
}

impl<T> PartialEq for SubscribableResource<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.store, &other.store)
    }
}

impl<T> Eq for SubscribableResource<T> {}

impl<T: Clone> SubscribableResource<T> {
    pub fn get_value(&self) -> T {
        self.store.get()
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Unsubscribe {
        self.store.subscribe(callback)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.store, &other.store)
    }
}

/// State of an embedded tree that persists across parent renders.
struct NestedRoot<P, R> {
    mode: UpdateMode,
    scheduler: UpdateScheduler,
    fiber: RefCell<Option<ResourceFiber<P, R>>>,
    props: RefCell<Option<Rc<P>>>,
    is_mounted: Cell<bool>,
    store: Rc<ValueStore<R>>,
}

impl<P: 'static, R: Clone + PartialEq + 'static> NestedRoot<P, R> {
    fn new(mode: UpdateMode) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            Self {
                mode,
                scheduler: UpdateScheduler::new(move || match this.upgrade() {
                    Some(nested) => nested.run_scheduled(),
                    None => Ok(()),
                }),
                fiber: RefCell::new(None),
                props: RefCell::new(None),
                is_mounted: Cell::new(false),
                store: Rc::new(ValueStore::new()),
            }
        })
    }

    fn create_fiber(&self, element: &Element<P, R>) -> ResourceFiber<P, R> {
        let root = FiberRoot::new(self.mode);
        let scheduler = self.scheduler.clone();
        root.set_on_update(move || scheduler.mark_dirty());
        ResourceFiber::new(element.resource().clone(), root, get_dev_strict_mode(false))
    }

    fn rewind(&self, fiber: &ResourceFiber<P, R>) {
        if self.mode == UpdateMode::Deferred {
            let root = fiber.root();
            root.set_version(root.committed_version());
        }
    }

    /// Re-renders after an update inside the embedded tree.
    fn run_scheduled(&self) -> Result<(), TapError> {
        if !self.is_mounted.get() {
            return Ok(());
        }
        let fiber = self.fiber.borrow().clone();
        let props = self.props.borrow().clone();
        let (Some(fiber), Some(props)) = (fiber, props) else {
            return Ok(());
        };

        self.rewind(&fiber);
        if self.mode == UpdateMode::Deferred && fiber.core().is_strict() {
            let _ = fiber.render(&props);
        }
        let result = fiber.render(&props);
        self.commit(&fiber, &result, true)
    }

    /// Runs from the parent's commit with the parent's render of the tree.
    fn commit_from_parent(&self, fiber: &ResourceFiber<P, R>, result: &RenderResult<P, R>) {
        *self.fiber.borrow_mut() = Some(fiber.clone());
        *self.props.borrow_mut() = Some(Rc::clone(&result.props));
        let committed = match self.mode {
            UpdateMode::Immediate => flush_resources_sync(|| self.commit(fiber, result, true))
                .and_then(|committed| committed),
            UpdateMode::Deferred => self.commit(fiber, result, false),
        };
        if let Err(error) = committed {
            raise(error);
        }
    }

    fn commit(
        &self,
        fiber: &ResourceFiber<P, R>,
        result: &RenderResult<P, R>,
        skip_if_dirty: bool,
    ) -> Result<(), TapError> {
        if skip_if_dirty && self.scheduler.is_dirty() {
            return Ok(());
        }
        fiber.root().commit();
        let committed = if self.is_mounted.get() {
            fiber.commit(result)
        } else {
            Ok(())
        };

        if !self.scheduler.is_dirty() {
            self.store.publish(result.output.clone(), true);
        }
        committed
    }
}

fn tap_nested_root<P, R>(element: &Element<P, R>, mode: UpdateMode) -> SubscribableResource<R>
where
    P: 'static,
    R: Clone + PartialEq + 'static,
{
    let nested = tap_const(|| NestedRoot::<P, R>::new(mode));
    let identity = (element.resource().id(), element.key().cloned());
    let fiber = tap_memo(|| nested.create_fiber(element), identity);

    nested.rewind(&fiber);
    let result = fiber.render(element.shared_props());
    nested.store.seed(result.output.clone());

    let lifecycle = (Rc::clone(&nested), fiber.clone());
    tap_effect_with(fiber.core().id(), move || {
        let (nested, fiber) = lifecycle.clone();
        nested.is_mounted.set(true);
        on_cleanup(move || {
            nested.is_mounted.set(false);
            if fiber.is_mounted() {
                let mut errors = ErrorSink::default();
                errors.record(fiber.unmount());
                if let Err(error) = errors.finish() {
                    raise(error);
                }
            }
        })
    });

    let committing = Rc::clone(&nested);
    tap_effect(move || committing.commit_from_parent(&fiber, &result));

    SubscribableResource {
        store: Rc::clone(&nested.store),
    }
}

/// Embeds `element` as an independent tree with its own root and scheduler.
///
/// Updates inside the tree apply immediately and re-render only the tree; the
/// parent observes them through the returned [`SubscribableResource`]. The
/// tree is committed together with the parent, inside a synchronous flush.
pub fn tap_subscribable_resource<P, R>(element: &Element<P, R>) -> SubscribableResource<R>
where
    P: 'static,
    R: Clone + PartialEq + 'static,
{
    tap_nested_root(element, UpdateMode::Immediate)
}

/// Embeds `element` as an independent tree whose updates are recorded and
/// replayed.
///
/// Every parent render first rewinds the tree to its committed version and
/// replays the recorded updates, so renders the parent discards leave no trace
/// in the tree.
pub fn tap_resource_root<P, R>(element: &Element<P, R>) -> SubscribableResource<R>
where
    P: 'static,
    R: Clone + PartialEq + 'static,
{
    tap_nested_root(element, UpdateMode::Deferred)
}
