//! Live instances of resources.
//!
//! A fiber owns the ordered cell list of one instance. Rendering runs the
//! resource body against those cells and collects effect tasks without running
//! them; committing runs the tasks; unmounting runs every cleanup.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cell::{EffectCell, HookCell};
use crate::effect::EffectTask;
use crate::error::{ErrorSink, TapError};
use crate::execution_context::{RenderScope, StrictMode};
use crate::resource::{Resource, ResourceId};
use crate::root::FiberRoot;
use crate::IS_DEVELOPMENT;

static NEXT_FIBER_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FiberId(usize);

/// Called whenever cell state of an instance changes outside of its render.
pub(crate) type MarkDirty = Rc<dyn Fn()>;

/// Type-erased state of an instance, reachable from hooks.
pub(crate) struct FiberCore {
    id: FiberId,
    root: Rc<FiberRoot>,
    strict: Option<StrictMode>,
    mark_dirty: Option<MarkDirty>,
    cells: RefCell<Vec<HookCell>>,
    cursor: Cell<usize>,
    pending_effects: RefCell<Vec<Rc<EffectTask>>>,
    is_rendering: Cell<bool>,
    is_mounted: Cell<bool>,
    is_first_render: Cell<bool>,
    is_never_mounted: Cell<bool>,
}

impl FiberCore {
    fn new(root: Rc<FiberRoot>, strict: Option<StrictMode>, mark_dirty: Option<MarkDirty>) -> Self {
        Self {
            id: FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed)),
            root,
            strict,
            mark_dirty,
            cells: RefCell::new(Vec::new()),
            cursor: Cell::new(0),
            pending_effects: RefCell::new(Vec::new()),
            is_rendering: Cell::new(false),
            is_mounted: Cell::new(false),
            is_first_render: Cell::new(true),
            is_never_mounted: Cell::new(true),
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn root(&self) -> &Rc<FiberRoot> {
        &self.root
    }

    pub(crate) fn mark_dirty_handle(&self) -> Option<MarkDirty> {
        self.mark_dirty.clone()
    }

    /// Tells the owner of this instance that its cells changed.
    pub(crate) fn mark_dirty(&self) {
        if let Some(mark_dirty) = &self.mark_dirty {
            mark_dirty();
        }
    }

    pub(crate) fn strict_mode(&self) -> Option<StrictMode> {
        self.strict
    }

    /// Whether development-only double invocation applies to this instance.
    pub(crate) fn is_strict(&self) -> bool {
        IS_DEVELOPMENT && self.strict.is_some()
    }

    pub(crate) fn is_rendering(&self) -> bool {
        self.is_rendering.get()
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.is_mounted.get()
    }

    pub(crate) fn is_first_render(&self) -> bool {
        self.is_first_render.get()
    }

    pub(crate) fn is_never_mounted(&self) -> bool {
        self.is_never_mounted.get()
    }

    pub(crate) fn begin_render(&self) {
        self.cursor.set(0);
        self.pending_effects.borrow_mut().clear();
        self.is_rendering.set(true);
    }

    pub(crate) fn end_render(&self) {
        self.is_rendering.set(false);
    }

    /// Returns the cell at the cursor, allocating it on the first render.
    pub(crate) fn next_cell(&self, create: impl FnOnce() -> HookCell) -> HookCell {
        let index = self.cursor.get();
        self.cursor.set(index + 1);
        if let Some(cell) = self.cells.borrow().get(index) {
            return cell.clone();
        }
        if !self.is_first_render.get() {
            panic!(
                "Rendered more hooks than during the previous render. \
                 Hooks must be called in the exact same order in every render."
            );
        }
        let cell = create();
        self.cells.borrow_mut().push(cell.clone());
        cell
    }

    pub(crate) fn push_effect(&self, task: Rc<EffectTask>) {
        self.pending_effects.borrow_mut().push(task);
    }

    fn finish_render(&self) -> Vec<Rc<EffectTask>> {
        if !self.is_first_render.get() && self.cursor.get() != self.cells.borrow().len() {
            panic!(
                "Rendered fewer hooks than during the previous render. \
                 Hooks must be called in the exact same order in every render."
            );
        }
        self.is_first_render.set(false);
        std::mem::take(&mut *self.pending_effects.borrow_mut())
    }

    fn effect_cells(&self) -> Vec<Rc<EffectCell>> {
        self.cells
            .borrow()
            .iter()
            .filter_map(|cell| match cell {
                HookCell::Effect(effect) => Some(Rc::clone(effect)),
                HookCell::Reducer(_) => None,
            })
            .collect()
    }

    fn run_cleanups(&self, errors: &mut ErrorSink) {
        for cell in self.effect_cells() {
            if let Some(cleanup) = cell.take_cleanup() {
                errors.guard(cleanup);
            }
        }
    }

    fn should_double_commit(&self, first_mount: bool) -> bool {
        if !IS_DEVELOPMENT || !first_mount {
            return false;
        }
        match self.strict {
            Some(StrictMode::Root) => true,
            Some(StrictMode::Child) => !self.root.in_strict_pass(),
            None => false,
        }
    }

    pub(crate) fn commit(&self, tasks: &[Rc<EffectTask>]) -> Result<(), TapError> {
        let first_mount = self.is_never_mounted.replace(false);
        self.is_mounted.set(true);
        let mut errors = ErrorSink::default();

        if self.should_double_commit(first_mount) {
            let _pass = self.root.enter_strict_pass();
            log::trace!(
                "strict double commit of fiber {:?} at version {}",
                self.id,
                self.root.version()
            );
            run_tasks(tasks, &mut errors);
            self.run_cleanups(&mut errors);
            self.root.set_version(self.root.committed_version());
            run_tasks(tasks, &mut errors);
        } else {
            run_tasks(tasks, &mut errors);
        }

        errors.finish()
    }

    pub(crate) fn unmount(&self) -> Result<(), TapError> {
        if !self.is_mounted.replace(false) {
            panic!("Resource not mounted");
        }
        let mut errors = ErrorSink::default();
        self.run_cleanups(&mut errors);
        errors.finish()
    }
}

fn run_tasks(tasks: &[Rc<EffectTask>], errors: &mut ErrorSink) {
    for task in tasks {
        task.run(errors);
    }
}

/// Output of one render plus everything needed to commit it.
pub(crate) struct RenderResult<P, R> {
    pub(crate) output: R,
    pub(crate) props: Rc<P>,
    effect_tasks: Rc<[Rc<EffectTask>]>,
}

impl<P, R: Clone> Clone for RenderResult<P, R> {
    fn clone(&self) -> Self {
        Self {
            output: self.output.clone(),
            props: Rc::clone(&self.props),
            effect_tasks: Rc::clone(&self.effect_tasks),
        }
    }
}

/// An instance of `Resource<P, R>`.
pub(crate) struct ResourceFiber<P, R> {
    core: Rc<FiberCore>,
    resource: Resource<P, R>,
}

impl<P, R> Clone for ResourceFiber<P, R> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            resource: self.resource.clone(),
        }
    }
}

impl<P: 'static, R: 'static> ResourceFiber<P, R> {
    pub(crate) fn new(
        resource: Resource<P, R>,
        root: Rc<FiberRoot>,
        strict: Option<StrictMode>,
    ) -> Self {
        Self::with_mark_dirty(resource, root, strict, None)
    }

    pub(crate) fn with_mark_dirty(
        resource: Resource<P, R>,
        root: Rc<FiberRoot>,
        strict: Option<StrictMode>,
        mark_dirty: Option<MarkDirty>,
    ) -> Self {
        Self {
            core: Rc::new(FiberCore::new(root, strict, mark_dirty)),
            resource,
        }
    }

    pub(crate) fn core(&self) -> &Rc<FiberCore> {
        &self.core
    }

    pub(crate) fn root(&self) -> &Rc<FiberRoot> {
        self.core.root()
    }

    pub(crate) fn resource_id(&self) -> ResourceId {
        self.resource.id()
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.core.is_mounted()
    }

    pub(crate) fn render(&self, props: &Rc<P>) -> RenderResult<P, R> {
        let output = {
            let _scope = RenderScope::enter(&self.core);
            self.resource.call(props)
        };
        let effect_tasks = self.core.finish_render();
        RenderResult {
            output,
            props: Rc::clone(props),
            effect_tasks: effect_tasks.into(),
        }
    }

    pub(crate) fn commit(&self, result: &RenderResult<P, R>) -> Result<(), TapError> {
        self.core.commit(&result.effect_tasks)
    }

    pub(crate) fn unmount(&self) -> Result<(), TapError> {
        self.core.unmount()
    }
}

#[cfg(test)]
#[path = "tests/fiber_tests.rs"]
mod tests;
