use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread_local;

use crate::platform::RuntimeScheduler;

type Task = Box<dyn FnOnce() + 'static>;

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    pending_tasks: RefCell<VecDeque<Task>>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            scheduler,
            pending_tasks: RefCell::new(VecDeque::new()),
        }
    }

    fn post_task(&self, task: Task) {
        self.pending_tasks.borrow_mut().push_back(task);
        log::trace!("macrotask queued");
        self.scheduler.schedule_tasks();
    }

    fn drain_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            // The borrow must end before the task runs; tasks may post more tasks.
            let next = self.pending_tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    fn has_tasks(&self) -> bool {
        !self.pending_tasks.borrow().is_empty()
    }
}

/// Owner of the macrotask queue that batched flushes are posted to.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn post_task(&self, task: impl FnOnce() + 'static) {
        self.inner.post_task(Box::new(task));
    }

    /// Runs queued macrotasks, including any posted while draining, and
    /// returns how many ran.
    pub fn drain_tasks(&self) -> usize {
        self.inner.drain_tasks()
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.inner.has_tasks()
    }

    /// Makes this runtime the target of macrotasks posted on the current
    /// thread until the returned guard is dropped.
    pub fn enter(&self) -> RuntimeGuard {
        ACTIVE_RUNTIMES.with(|stack| stack.borrow_mut().push(self.clone()));
        RuntimeGuard {
            _not_send: PhantomData,
        }
    }
}

#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_tasks(&self) {}
}

#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    /// Posts `task` to the runtime, running it inline if the runtime is gone.
    pub fn post_task(&self, task: impl FnOnce() + 'static) {
        if let Some(inner) = self.0.upgrade() {
            inner.post_task(Box::new(task));
        } else {
            task();
        }
    }

    pub fn drain_tasks(&self) -> usize {
        self.0
            .upgrade()
            .map(|inner| inner.drain_tasks())
            .unwrap_or(0)
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_tasks())
            .unwrap_or(false)
    }
}

/// Restores the previously entered runtime when dropped.
pub struct RuntimeGuard {
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        ACTIVE_RUNTIMES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

thread_local! {
    static ACTIVE_RUNTIMES: RefCell<Vec<Runtime>> = RefCell::new(Vec::new());
    static DEFAULT_RUNTIME: Runtime = Runtime::new(Arc::new(DefaultScheduler));
}

/// Returns the runtime macrotasks are posted to on this thread: the most
/// recently entered one, or a thread-default runtime nobody wakes.
pub fn current_runtime() -> Runtime {
    if let Some(runtime) = ACTIVE_RUNTIMES.with(|stack| stack.borrow().last().cloned()) {
        return runtime;
    }
    DEFAULT_RUNTIME.with(Runtime::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingScheduler {
        wakes: AtomicUsize,
    }

    impl RuntimeScheduler for CountingScheduler {
        fn schedule_tasks(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn entered_runtime_receives_posted_tasks() {
        let scheduler = Arc::new(CountingScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        let ran = Rc::new(Cell::new(false));
        {
            let _guard = runtime.enter();
            let ran = Rc::clone(&ran);
            current_runtime().post_task(move || ran.set(true));
        }
        assert_eq!(scheduler.wakes.load(Ordering::SeqCst), 1);
        assert!(runtime.has_pending_tasks());
        assert!(!ran.get());

        assert_eq!(runtime.drain_tasks(), 1);
        assert!(ran.get());
        assert!(!runtime.has_pending_tasks());
    }

    #[test]
    fn drain_runs_tasks_posted_while_draining() {
        let runtime = Runtime::new(Arc::new(DefaultScheduler));
        let order = Rc::new(RefCell::new(Vec::new()));
        let handle = runtime.handle();
        {
            let order = Rc::clone(&order);
            runtime.post_task(move || {
                order.borrow_mut().push("first");
                let order = Rc::clone(&order);
                handle.post_task(move || order.borrow_mut().push("second"));
            });
        }
        assert_eq!(runtime.drain_tasks(), 2);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn handle_runs_task_inline_once_runtime_is_gone() {
        let handle = Runtime::new(Arc::new(DefaultScheduler)).handle();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        handle.post_task(move || flag.set(true));
        assert!(ran.get());
        assert!(!handle.has_pending_tasks());
    }
}
