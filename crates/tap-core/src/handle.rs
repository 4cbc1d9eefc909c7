//! Imperative hosts: observable handles and one-shot roots.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::{ErrorSink, TapError};
use crate::execution_context::{get_dev_strict_mode, StrictMode};
use crate::fiber::{RenderResult, ResourceFiber};
use crate::resource::Element;
use crate::root::{FiberRoot, UpdateMode};
use crate::scheduler::{flush_resources_sync, UpdateScheduler};
use crate::subscribable::{Unsubscribe, ValueStore};
use crate::IS_DEVELOPMENT;

/// Options for [`create_resource`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResourceOptions {
    /// Commit the first render right away. When `false` the instance is
    /// rendered but stays uncommitted until the first [`ResourceHandle::render`].
    pub mount: bool,
    /// Audit the instance with development-only double invocation.
    pub dev_strict_mode: bool,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            mount: true,
            dev_strict_mode: false,
        }
    }
}

struct HandleState<P, R> {
    element: Element<P, R>,
    fiber: ResourceFiber<P, R>,
    last_render: Option<RenderResult<P, R>>,
    is_mounted: bool,
}

struct HandleInner<P, R> {
    strict: Option<StrictMode>,
    scheduler: UpdateScheduler,
    state: RefCell<HandleState<P, R>>,
    has_committed: Cell<bool>,
    store: ValueStore<R>,
}

impl<P: 'static, R: Clone + PartialEq + 'static> HandleInner<P, R> {
    fn new_fiber(
        scheduler: &UpdateScheduler,
        element: &Element<P, R>,
        strict: Option<StrictMode>,
    ) -> ResourceFiber<P, R> {
        let root = FiberRoot::new(UpdateMode::Immediate);
        let scheduler = scheduler.clone();
        root.set_on_update(move || scheduler.mark_dirty());
        ResourceFiber::new(element.resource().clone(), root, strict)
    }

    fn current(&self) -> (ResourceFiber<P, R>, Rc<P>) {
        let state = self.state.borrow();
        (state.fiber.clone(), Rc::clone(state.element.shared_props()))
    }

    /// Renders the current element, twice for strict instances where the
    /// auditor asks for it.
    fn render_current(&self, audit: bool) -> RenderResult<P, R> {
        let (fiber, props) = self.current();
        if audit {
            let _ = fiber.render(&props);
        }
        let result = fiber.render(&props);
        self.store.seed(result.output.clone());
        self.state.borrow_mut().last_render = Some(result.clone());
        result
    }

    fn run_update(&self) -> Result<(), TapError> {
        let (fiber, _) = self.current();
        let audit = IS_DEVELOPMENT
            && match self.strict {
                Some(StrictMode::Root) => true,
                Some(StrictMode::Child) => !fiber.core().is_first_render(),
                None => false,
            };
        let result = self.render_current(audit);

        if self.scheduler.is_dirty() || !self.state.borrow().is_mounted {
            return Ok(());
        }
        self.commit(&fiber, &result)
    }

    /// Mounts a handle created with `mount: false`, or re-mounts after unmount.
    fn mount_pending(&self, changed: bool) -> Result<(), TapError> {
        let pending = self.state.borrow().last_render.clone();
        let result = match pending {
            Some(result) if !changed => result,
            _ => self.render_current(IS_DEVELOPMENT && self.strict == Some(StrictMode::Root)),
        };
        if self.scheduler.is_dirty() {
            return Ok(());
        }
        let (fiber, _) = self.current();
        self.commit(&fiber, &result)
    }

    fn commit(&self, fiber: &ResourceFiber<P, R>, result: &RenderResult<P, R>) -> Result<(), TapError> {
        fiber.root().commit();
        let committed = fiber.commit(result);
        if !self.scheduler.is_dirty() {
            let notify = self.has_committed.replace(true);
            if self.store.publish(result.output.clone(), notify) && notify {
                log::trace!("resource handle published a new output");
            }
        }
        committed
    }
}

/// An instance exposed as an observable store.
pub struct ResourceHandle<P, R> {
    inner: Rc<HandleInner<P, R>>,
}

impl<P, R> Clone for ResourceHandle<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: 'static, R: Clone + PartialEq + 'static> ResourceHandle<P, R> {
    /// The last committed output (the first rendered output before the
    /// first commit).
    pub fn get_value(&self) -> R {
        self.inner.store.get()
    }

    /// Registers `callback` to run after each commit, other than the first,
    /// whose output differs from the previous one.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Unsubscribe {
        self.inner.store.subscribe(callback)
    }

    /// Points the handle at `element`.
    ///
    /// A new resource or key replaces the instance. On a mounted handle the
    /// update is scheduled; on an unmounted one it is mounted synchronously.
    pub fn render(&self, element: Element<P, R>) -> Result<(), TapError> {
        let inner = &self.inner;
        let mut errors = ErrorSink::default();

        let (changed, replaced, was_mounted) = {
            let mut state = inner.state.borrow_mut();
            let changed = !state.element.same_element(&element);
            let replaced = if state.element.same_identity(&element) {
                None
            } else {
                let fiber = HandleInner::new_fiber(&inner.scheduler, &element, inner.strict);
                state.last_render = None;
                Some(std::mem::replace(&mut state.fiber, fiber))
            };
            state.element = element;
            let was_mounted = std::mem::replace(&mut state.is_mounted, true);
            (changed, replaced, was_mounted)
        };

        if let Some(previous) = replaced {
            if previous.is_mounted() {
                errors.record(previous.unmount());
            }
        }

        if was_mounted {
            if changed {
                inner.scheduler.mark_dirty();
            }
        } else {
            errors.record(flush_resources_sync(|| inner.mount_pending(changed)).and_then(|mounted| mounted));
        }
        errors.finish()
    }

    /// Runs every cleanup of the instance.
    ///
    /// # Panics
    ///
    /// If the handle is not mounted.
    pub fn unmount(&self) -> Result<(), TapError> {
        let fiber = {
            let mut state = self.inner.state.borrow_mut();
            if !state.is_mounted {
                panic!("Resource not mounted");
            }
            state.is_mounted = false;
            state.fiber.clone()
        };
        if fiber.is_mounted() {
            fiber.unmount()
        } else {
            Ok(())
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.state.borrow().is_mounted
    }
}

/// Instantiates `element` outside of any body and returns its handle.
///
/// The first render (and, with `mount`, the first commit) happens before this
/// returns.
pub fn create_resource<P, R>(
    element: Element<P, R>,
    options: ResourceOptions,
) -> Result<ResourceHandle<P, R>, TapError>
where
    P: 'static,
    R: Clone + PartialEq + 'static,
{
    let strict = get_dev_strict_mode(options.dev_strict_mode);
    let inner = Rc::new_cyclic(|this: &Weak<HandleInner<P, R>>| {
        let this = this.clone();
        let scheduler = UpdateScheduler::new(move || match this.upgrade() {
            Some(inner) => inner.run_update(),
            None => Ok(()),
        });
        let fiber = HandleInner::new_fiber(&scheduler, &element, strict);
        HandleInner {
            strict,
            scheduler,
            state: RefCell::new(HandleState {
                element,
                fiber,
                last_render: None,
                is_mounted: options.mount,
            }),
            has_committed: Cell::new(false),
            store: ValueStore::new(),
        }
    });

    flush_resources_sync(|| inner.scheduler.mark_dirty())?;
    Ok(ResourceHandle { inner })
}

/// Imperative entry point rendering one element at a time.
pub struct ResourceRoot<P, R> {
    handle: RefCell<Option<ResourceHandle<P, R>>>,
}

impl<P: 'static, R: Clone + PartialEq + 'static> Default for ResourceRoot<P, R> {
    fn default() -> Self {
        Self {
            handle: RefCell::new(None),
        }
    }
}

impl<P: 'static, R: Clone + PartialEq + 'static> ResourceRoot<P, R> {
    /// Renders and commits `element`, returning its committed output.
    pub fn render(&self, element: Element<P, R>) -> Result<R, TapError> {
        let existing = self.handle.borrow().clone();
        let handle = match existing {
            Some(handle) => {
                flush_resources_sync(|| handle.render(element)).and_then(|rendered| rendered)?;
                handle
            }
            None => {
                let handle = create_resource(element, ResourceOptions::default())?;
                *self.handle.borrow_mut() = Some(handle.clone());
                handle
            }
        };
        Ok(handle.get_value())
    }

    pub fn is_mounted(&self) -> bool {
        self.handle
            .borrow()
            .as_ref()
            .is_some_and(ResourceHandle::is_mounted)
    }

    /// Output of the last commit, if anything was rendered.
    pub fn committed_output(&self) -> Option<R> {
        self.handle
            .borrow()
            .as_ref()
            .and_then(|handle| handle.inner.store.try_get())
    }

    /// Unmounts the rendered instance.
    ///
    /// # Panics
    ///
    /// If nothing is mounted.
    pub fn unmount(&self) -> Result<(), TapError> {
        let Some(handle) = self.handle.borrow_mut().take() else {
            panic!("Resource not mounted");
        };
        handle.unmount()
    }
}

pub fn create_resource_root<P, R>() -> ResourceRoot<P, R>
where
    P: 'static,
    R: Clone + PartialEq + 'static,
{
    ResourceRoot::default()
}
