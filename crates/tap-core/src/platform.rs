//! Platform abstraction for the tap runtime.
//!
//! The runtime never owns an event loop. Batches of dirty resources are
//! flushed from macrotasks, and the host decides when those macrotasks run.
//! A host integrates by implementing [`RuntimeScheduler`] and draining the
//! [`Runtime`](crate::Runtime) whenever it is woken.

/// Receives wake-up requests from the tap runtime.
///
/// Implementations are notified every time a macrotask is queued. They are
/// expected to arrange for [`Runtime::drain_tasks`](crate::Runtime::drain_tasks)
/// to be called on the thread that owns the runtime, at the latest on the
/// host's next turn.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host drain pending macrotasks soon.
    fn schedule_tasks(&self);
}
