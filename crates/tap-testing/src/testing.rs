use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tap_core::{current_runtime, resource, ResourceRoot};

type Cleanup = Box<dyn Fn()>;

thread_local! {
    static LIVE_RESOURCES: RefCell<Vec<Cleanup>> = RefCell::new(Vec::new());
}

/// A resource built from a test body plus the root that renders it.
pub struct TestResource<P, R> {
    resource: tap_core::Resource<P, R>,
    root: Rc<ResourceRoot<P, R>>,
}

impl<P: 'static, R: Clone + PartialEq + 'static> TestResource<P, R> {
    /// Renders `props` synchronously and returns the committed output.
    ///
    /// Panics when the render or its commit fails.
    pub fn render(&self, props: P) -> R {
        match self.root.render(self.resource.element(props)) {
            Ok(output) => output,
            Err(error) => panic!("test resource failed to render: {error}"),
        }
    }

    /// Output of the most recent commit, including commits made by scheduled
    /// flushes after the last [`render`](Self::render).
    pub fn committed_output(&self) -> Option<R> {
        self.root.committed_output()
    }

    pub fn is_mounted(&self) -> bool {
        self.root.is_mounted()
    }

    pub fn unmount(&self) {
        if let Err(error) = self.root.unmount() {
            panic!("test resource failed to unmount: {error}");
        }
    }
}

/// Wraps `body` into a resource rendered by its own root.
///
/// The root is registered for [`cleanup_all_resources`].
pub fn create_test_resource<P, R>(body: impl Fn(&P) -> R + 'static) -> TestResource<P, R>
where
    P: 'static,
    R: Clone + PartialEq + 'static,
{
    let root = Rc::new(ResourceRoot::default());
    let weak: Weak<ResourceRoot<P, R>> = Rc::downgrade(&root);
    LIVE_RESOURCES.with(|live| {
        live.borrow_mut().push(Box::new(move || {
            if let Some(root) = weak.upgrade() {
                if root.is_mounted() {
                    if let Err(error) = root.unmount() {
                        log_cleanup_failure(&error);
                    }
                }
            }
        }))
    });
    TestResource {
        resource: resource(body),
        root,
    }
}

fn log_cleanup_failure(error: &tap_core::TapError) {
    log::warn!("cleanup of a test resource failed: {error}");
}

/// Renders `test` with `props`; shorthand for [`TestResource::render`].
pub fn render_test<P, R>(test: &TestResource<P, R>, props: P) -> R
where
    P: 'static,
    R: Clone + PartialEq + 'static,
{
    test.render(props)
}

/// Runs every macrotask queued on the current runtime, including the batched
/// flushes scheduled by dispatches. Returns how many tasks ran.
pub fn wait_for_next_tick() -> usize {
    current_runtime().drain_tasks()
}

/// Unmounts every test resource of this thread that is still mounted.
pub fn cleanup_all_resources() {
    let cleanups = LIVE_RESOURCES.with(|live| std::mem::take(&mut *live.borrow_mut()));
    for cleanup in cleanups {
        cleanup();
    }
}
