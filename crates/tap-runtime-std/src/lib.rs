//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides a concrete implementation of the platform abstraction
//! defined in `tap-core`. Hosts construct a [`StdRuntime`], enter it on the
//! thread that owns their resources, and drain it whenever the registered
//! waker fires.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tap_core::{Runtime, RuntimeGuard, RuntimeScheduler};

type TaskWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Records macrotask requests so another thread can learn that the owning
/// thread has work to drain.
pub struct StdScheduler {
    task_requested: AtomicBool,
    task_waker: RwLock<Option<TaskWaker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            task_requested: AtomicBool::new(false),
            task_waker: RwLock::new(None),
        }
    }

    /// Returns whether a drain has been requested since the last call.
    pub fn take_task_request(&self) -> bool {
        self.task_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker that will be invoked whenever a macrotask is queued.
    pub fn set_task_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self.task_waker.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    pub fn clear_task_waker(&self) {
        *self.task_waker.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn wake(&self) {
        let waker = self
            .task_waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match waker {
            Some(waker) => waker(),
            None => log::trace!("macrotask requested with no waker registered"),
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("task_requested", &self.task_requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule_tasks(&self) {
        if !self.task_requested.swap(true, Ordering::SeqCst) {
            log::trace!("macrotask drain requested");
        }
        self.wake();
    }
}

/// A [`Runtime`] wired to a [`StdScheduler`].
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    runtime: Runtime,
}

impl StdRuntime {
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        Self { scheduler, runtime }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    /// Routes macrotasks posted on this thread to this runtime until the
    /// guard is dropped.
    pub fn enter(&self) -> RuntimeGuard {
        self.runtime.enter()
    }

    /// Returns whether a drain was requested since the last poll.
    pub fn take_task_request(&self) -> bool {
        self.scheduler.take_task_request()
    }

    /// Registers a waker to be called when the runtime queues a macrotask.
    /// The waker may run on any thread that posts work.
    pub fn set_task_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_task_waker(waker);
    }

    pub fn clear_task_waker(&self) {
        self.scheduler.clear_task_waker();
    }

    /// Drains macrotasks until the queue stays empty and returns how many ran.
    ///
    /// Tasks queued by a running task are drained in the same call, and the
    /// pending request flag is cleared afterwards.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.runtime.has_pending_tasks() {
            ran += self.runtime.drain_tasks();
        }
        self.scheduler.take_task_request();
        log::debug!("std runtime idle after {ran} macrotask(s)");
        ran
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tap_core::{create_resource, resource, tap_state, ResourceOptions, StateSetter};

    use super::StdRuntime;

    #[test]
    fn std_runtime_requests_drain_and_rerenders_on_state_change() {
        let runtime = StdRuntime::new();
        let _guard = runtime.enter();

        let wakes = Arc::new(AtomicUsize::new(0));
        {
            let wakes = Arc::clone(&wakes);
            runtime.set_task_waker(move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            });
        }

        let renders = Rc::new(Cell::new(0u32));
        let setter_slot: Rc<RefCell<Option<StateSetter<i32>>>> = Rc::new(RefCell::new(None));
        let counter = {
            let renders = Rc::clone(&renders);
            let setter_slot = Rc::clone(&setter_slot);
            resource(move |_: &()| {
                renders.set(renders.get() + 1);
                let (count, set_count) = tap_state(0);
                setter_slot.borrow_mut().replace(set_count);
                count
            })
        };

        let handle = create_resource(counter.element(()), ResourceOptions::default())
            .expect("initial render");
        assert_eq!(renders.get(), 1);
        assert_eq!(handle.get_value(), 0);
        assert!(!runtime.take_task_request());

        let setter = setter_slot
            .borrow()
            .clone()
            .expect("setter captured during render");
        setter.set(1);

        assert!(runtime.take_task_request(), "a dispatch should request a drain");
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.get_value(), 0);

        assert_eq!(runtime.run_until_idle(), 1);
        assert_eq!(renders.get(), 2);
        assert_eq!(handle.get_value(), 1);

        runtime.clear_task_waker();
        setter.set(2);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        runtime.run_until_idle();
        assert_eq!(handle.get_value(), 2);

        handle.unmount().expect("unmount");
    }

    #[test]
    fn run_until_idle_drains_tasks_posted_by_tasks() {
        let runtime = StdRuntime::default();
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let order = Rc::clone(&order);
            let chained = runtime.runtime();
            runtime.runtime().post_task(move || {
                order.borrow_mut().push("outer");
                let order = Rc::clone(&order);
                chained.post_task(move || order.borrow_mut().push("inner"));
            });
        }
        assert!(runtime.take_task_request());

        assert_eq!(runtime.run_until_idle(), 2);
        assert_eq!(*order.borrow(), vec!["outer", "inner"]);
        assert!(!runtime.take_task_request());
        assert_eq!(runtime.run_until_idle(), 0);
    }
}
