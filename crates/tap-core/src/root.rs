//! Version and commit bookkeeping for one independent tree of instances.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::cell::DirtyCell;

/// Re-applies one recorded update (marks its cell dirty, queues its action).
pub(crate) type ApplyUpdate = Rc<dyn Fn()>;

/// How a root treats dispatched updates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum UpdateMode {
    /// Apply on dispatch and record for replay.
    Immediate,
    /// Only record; updates become visible when the root is rewound.
    Deferred,
}

struct ChangelogEntry {
    version: u64,
    apply: ApplyUpdate,
}

pub(crate) struct FiberRoot {
    mode: UpdateMode,
    version: Cell<u64>,
    committed_version: Cell<u64>,
    changelog: RefCell<Vec<ChangelogEntry>>,
    dirty_cells: RefCell<Vec<Rc<dyn DirtyCell>>>,
    on_update: RefCell<Option<Rc<dyn Fn()>>>,
    strict_pass: Cell<bool>,
}

impl FiberRoot {
    pub(crate) fn new(mode: UpdateMode) -> Rc<Self> {
        Rc::new(Self {
            mode,
            version: Cell::new(0),
            committed_version: Cell::new(0),
            changelog: RefCell::new(Vec::new()),
            dirty_cells: RefCell::new(Vec::new()),
            on_update: RefCell::new(None),
            strict_pass: Cell::new(false),
        })
    }

    /// Installs the callback invoked after every accepted update.
    pub(crate) fn set_on_update(&self, on_update: impl Fn() + 'static) {
        *self.on_update.borrow_mut() = Some(Rc::new(on_update));
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.get()
    }

    pub(crate) fn committed_version(&self) -> u64 {
        self.committed_version.get()
    }

    pub(crate) fn has_dirty_cells(&self) -> bool {
        !self.dirty_cells.borrow().is_empty()
    }

    pub(crate) fn mark_cell_dirty(&self, cell: Rc<dyn DirtyCell>) {
        self.dirty_cells.borrow_mut().push(cell);
    }

    /// Offers an update to the root.
    ///
    /// `prepare` receives whether an eager result may be computed now and
    /// returns `None` when the update is a no-op.
    pub(crate) fn dispatch_update(&self, prepare: &dyn Fn(bool) -> Option<ApplyUpdate>) {
        let allow_eager = match self.mode {
            UpdateMode::Immediate => true,
            UpdateMode::Deferred => self.changelog.borrow().is_empty(),
        };
        let Some(apply) = prepare(allow_eager) else {
            return;
        };
        if self.mode == UpdateMode::Immediate {
            apply();
        }

        let version = self.version.get() + 1;
        self.version.set(version);
        self.changelog
            .borrow_mut()
            .push(ChangelogEntry { version, apply });
        log::trace!("root update recorded at version {version}");

        let on_update = self.on_update.borrow().clone();
        if let Some(on_update) = on_update {
            on_update();
        }
    }

    /// Moves the root to `version`, rolling back and replaying as needed.
    pub(crate) fn set_version(&self, version: u64) {
        let current = self.version.get();
        let committed = self.committed_version.get();
        if version >= current {
            self.version.set(version);
            return;
        }

        log::trace!("root rewinds from {current} to {version} (committed {committed})");
        self.rollback_dirty_cells();

        if version < committed {
            self.changelog.borrow_mut().clear();
            self.version.set(version);
            self.committed_version.set(version);
            return;
        }

        let replay: Vec<ApplyUpdate> = {
            let mut changelog = self.changelog.borrow_mut();
            if version > committed {
                changelog.retain(|entry| entry.version <= version);
                self.version.set(version);
            }
            changelog.iter().map(|entry| Rc::clone(&entry.apply)).collect()
        };
        for apply in replay {
            apply();
        }
    }

    /// Promotes every dirty cell and forgets the changelog.
    ///
    /// Returns whether any cell changed.
    pub(crate) fn commit(&self) -> bool {
        let cells = std::mem::take(&mut *self.dirty_cells.borrow_mut());
        for cell in &cells {
            cell.commit();
        }
        self.changelog.borrow_mut().clear();
        self.committed_version.set(self.version.get());
        log::trace!(
            "root committed {} cell(s) at version {}",
            cells.len(),
            self.version.get()
        );
        !cells.is_empty()
    }

    fn rollback_dirty_cells(&self) {
        let cells = std::mem::take(&mut *self.dirty_cells.borrow_mut());
        for cell in cells {
            cell.rollback();
        }
    }

    pub(crate) fn in_strict_pass(&self) -> bool {
        self.strict_pass.get()
    }

    /// Flags the root as running a strict double commit until the guard drops.
    pub(crate) fn enter_strict_pass(self: &Rc<Self>) -> StrictPassGuard {
        let previous = self.strict_pass.replace(true);
        StrictPassGuard {
            root: Rc::clone(self),
            previous,
        }
    }
}

pub(crate) struct StrictPassGuard {
    root: Rc<FiberRoot>,
    previous: bool,
}

impl Drop for StrictPassGuard {
    fn drop(&mut self) {
        self.root.strict_pass.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestCell {
        current: Cell<i32>,
        work_in_progress: Cell<i32>,
        dirty: Cell<bool>,
    }

    impl DirtyCell for TestCell {
        fn commit(&self) {
            self.current.set(self.work_in_progress.get());
            self.dirty.set(false);
        }

        fn rollback(&self) {
            self.work_in_progress.set(self.current.get());
            self.dirty.set(false);
        }
    }

    fn add(root: &Rc<FiberRoot>, cell: &Rc<TestCell>, amount: i32) {
        let apply: ApplyUpdate = {
            let root = Rc::downgrade(root);
            let cell = Rc::clone(cell);
            Rc::new(move || {
                cell.work_in_progress.set(cell.work_in_progress.get() + amount);
                if !cell.dirty.replace(true) {
                    if let Some(root) = root.upgrade() {
                        root.mark_cell_dirty(Rc::clone(&cell) as Rc<dyn DirtyCell>);
                    }
                }
            })
        };
        root.dispatch_update(&|_| Some(Rc::clone(&apply)));
    }

    #[test]
    fn replaying_after_rewind_reproduces_the_committed_value() {
        let root = FiberRoot::new(UpdateMode::Immediate);
        let cell = Rc::new(TestCell::default());
        add(&root, &cell, 5);
        add(&root, &cell, 3);
        assert_eq!(root.version(), 2);
        assert!(root.commit());
        assert_eq!(cell.current.get(), 8);
        assert_eq!(root.committed_version(), 2);

        add(&root, &cell, 1);
        assert_eq!(cell.work_in_progress.get(), 9);

        // Back to the committed version: uncommitted work is replayed.
        root.set_version(2);
        assert_eq!(cell.work_in_progress.get(), 9);
        assert_eq!(root.version(), 3);

        // Before the committed version: only committed state survives.
        root.set_version(1);
        assert_eq!(cell.work_in_progress.get(), 8);
        assert_eq!(cell.current.get(), 8);
        assert_eq!(root.version(), 1);
        assert_eq!(root.committed_version(), 1);
        assert!(!root.has_dirty_cells());
    }

    #[test]
    fn partial_rewind_keeps_entries_up_to_the_target() {
        let root = FiberRoot::new(UpdateMode::Immediate);
        let cell = Rc::new(TestCell::default());
        add(&root, &cell, 1);
        add(&root, &cell, 10);
        add(&root, &cell, 100);
        assert_eq!(cell.work_in_progress.get(), 111);

        root.set_version(2);
        assert_eq!(cell.work_in_progress.get(), 11);
        assert_eq!(root.version(), 2);

        root.set_version(5);
        assert_eq!(root.version(), 5);
        assert_eq!(cell.work_in_progress.get(), 11);
    }

    #[test]
    fn deferred_updates_apply_only_on_rewind() {
        let root = FiberRoot::new(UpdateMode::Deferred);
        let cell = Rc::new(TestCell::default());
        let notified = Rc::new(Cell::new(0));
        let counter = Rc::clone(&notified);
        root.set_on_update(move || counter.set(counter.get() + 1));

        add(&root, &cell, 4);
        add(&root, &cell, 2);
        assert_eq!(cell.work_in_progress.get(), 0);
        assert_eq!(notified.get(), 2);

        root.set_version(root.committed_version());
        assert_eq!(cell.work_in_progress.get(), 6);
        assert!(root.commit());
        assert_eq!(cell.current.get(), 6);
        assert!(!root.commit());
    }

    #[test]
    fn strict_pass_guard_restores_the_flag() {
        let root = FiberRoot::new(UpdateMode::Immediate);
        {
            let _outer = root.enter_strict_pass();
            assert!(root.in_strict_pass());
            {
                let _inner = root.enter_strict_pass();
            }
            assert!(root.in_strict_pass());
        }
        assert!(!root.in_strict_pass());
    }
}
