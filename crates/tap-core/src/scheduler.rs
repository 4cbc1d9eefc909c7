//! Batching of dirty resources into flushes.
//!
//! Every [`UpdateScheduler`] marked dirty joins the active [`FlushState`]. The
//! default state arms one macrotask per batch on the current
//! [`Runtime`](crate::Runtime); [`flush_resources_sync`] swaps in a private,
//! pre-armed state and drains it before returning.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use crate::error::{ErrorSink, TapError};
use crate::runtime::current_runtime;

/// Upper bound on scheduler tasks run by a single flush.
pub const MAX_FLUSH_DEPTH: usize = 50;

type SchedulerId = usize;
type SchedulerTask = Box<dyn Fn() -> Result<(), TapError>>;

static NEXT_SCHEDULER_ID: AtomicUsize = AtomicUsize::new(1);

struct SchedulerInner {
    id: SchedulerId,
    dirty: Cell<bool>,
    task: SchedulerTask,
}

/// A task paired with a dirty flag.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Rc<SchedulerInner>,
}

impl UpdateScheduler {
    pub fn new(task: impl Fn() -> Result<(), TapError> + 'static) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
                dirty: Cell::new(false),
                task: Box::new(task),
            }),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn mark_dirty(&self) {
        self.inner.dirty.set(true);
        let state = FLUSH_STATE.with(|state| Rc::clone(&state.borrow()));
        state
            .schedulers
            .borrow_mut()
            .insert(self.inner.id, Rc::downgrade(&self.inner));
        schedule_flush(&state);
    }

    fn run_task(inner: &SchedulerInner) -> Result<(), TapError> {
        inner.dirty.set(false);
        (inner.task)()
    }
}

struct FlushState {
    schedulers: RefCell<IndexMap<SchedulerId, Weak<SchedulerInner>>>,
    is_scheduled: Cell<bool>,
}

impl FlushState {
    fn new(is_scheduled: bool) -> Self {
        Self {
            schedulers: RefCell::new(IndexMap::new()),
            is_scheduled: Cell::new(is_scheduled),
        }
    }

    fn pop_front(&self) -> Option<Weak<SchedulerInner>> {
        self.schedulers
            .borrow_mut()
            .shift_remove_index(0)
            .map(|(_, scheduler)| scheduler)
    }
}

thread_local! {
    static FLUSH_STATE: RefCell<Rc<FlushState>> = RefCell::new(Rc::new(FlushState::new(false)));
}

fn schedule_flush(state: &Rc<FlushState>) {
    if state.is_scheduled.replace(true) {
        return;
    }
    let state = Rc::clone(state);
    current_runtime().post_task(move || {
        if let Err(error) = flush_scheduled(&state) {
            log::error!("scheduled flush failed: {error}");
        }
    });
}

/// Clears a flush state on every exit path, including unwinding.
struct FlushReset<'a>(&'a FlushState);

impl Drop for FlushReset<'_> {
    fn drop(&mut self) {
        self.0.schedulers.borrow_mut().clear();
        self.0.is_scheduled.set(false);
    }
}

fn flush_scheduled(state: &FlushState) -> Result<(), TapError> {
    let _reset = FlushReset(state);
    let mut errors = ErrorSink::default();
    let mut depth = 0;
    log::trace!("flush started");

    // Schedulers marked while the loop runs are appended and still visited.
    while let Some(scheduler) = state.pop_front() {
        let Some(scheduler) = scheduler.upgrade() else {
            continue;
        };
        if !scheduler.dirty.get() {
            continue;
        }

        depth += 1;
        if depth > MAX_FLUSH_DEPTH {
            return Err(TapError::MaxUpdateDepthExceeded);
        }

        let mut outcome = Ok(());
        errors.guard(|| outcome = UpdateScheduler::run_task(&scheduler));
        errors.record(outcome);
    }

    log::trace!("flush finished after {depth} task(s)");
    errors.finish()
}

/// Restores the previously active flush state when dropped.
struct FlushScope {
    previous: Option<Rc<FlushState>>,
}

impl FlushScope {
    fn install(state: Rc<FlushState>) -> Self {
        let previous = FLUSH_STATE.with(|slot| slot.replace(state));
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for FlushScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            FLUSH_STATE.with(|slot| {
                slot.replace(previous);
            });
        }
    }
}

/// Runs `callback` in an isolated batching scope and synchronously drains
/// everything scheduled inside it before returning.
pub fn flush_resources_sync<T>(callback: impl FnOnce() -> T) -> Result<T, TapError> {
    let state = Rc::new(FlushState::new(true));
    let _scope = FlushScope::install(Rc::clone(&state));
    let result = callback();
    flush_scheduled(&state)?;
    Ok(result)
}
