//! Child instances rendered inside a parent body.
//!
//! Children share the parent's root and call stack: they render while the
//! parent renders, are committed by an effect of the parent and are unmounted
//! by that effect's cleanup.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::cell::Deps;
use crate::collections::map::HashSet;
use crate::effect::{on_cleanup, tap_effect, tap_effect_with};
use crate::error::{raise, ErrorSink};
use crate::execution_context::{current_fiber, get_dev_strict_mode};
use crate::fiber::{MarkDirty, RenderResult, ResourceFiber};
use crate::memo::{tap_const, tap_memo};
use crate::resource::{Element, ResourceKey};

fn new_child<P: 'static, R: 'static>(
    element: &Element<P, R>,
    mark_dirty: Option<MarkDirty>,
) -> ResourceFiber<P, R> {
    let parent = current_fiber();
    ResourceFiber::with_mark_dirty(
        element.resource().clone(),
        Rc::clone(parent.root()),
        get_dev_strict_mode(false),
        mark_dirty,
    )
}

fn unmount_if_mounted<P: 'static, R: 'static>(fiber: &ResourceFiber<P, R>, errors: &mut ErrorSink) {
    if fiber.is_mounted() {
        errors.record(fiber.unmount());
    }
}

fn finish_or_raise(errors: ErrorSink) {
    if let Err(error) = errors.finish() {
        raise(error);
    }
}

/// Renders `element` as a child of the calling instance and returns its
/// output.
///
/// The child instance is kept while the resource and key stay the same;
/// otherwise a fresh instance replaces it and the old one is unmounted on
/// commit.
pub fn tap_resource<P, R>(element: &Element<P, R>) -> R
where
    P: 'static,
    R: Clone + 'static,
{
    let identity = (element.resource().id(), element.key().cloned());
    let fiber = tap_memo(|| new_child(element, current_fiber().mark_dirty_handle()), identity);
    let result = fiber.render(element.shared_props());
    let output = result.output.clone();

    let mounted = fiber.clone();
    tap_effect_with(fiber.core().id(), move || {
        let fiber = mounted.clone();
        on_cleanup(move || {
            let mut errors = ErrorSink::default();
            unmount_if_mounted(&fiber, &mut errors);
            finish_or_raise(errors);
        })
    });
    tap_effect(move || {
        if let Err(error) = fiber.commit(&result) {
            raise(error);
        }
    });

    output
}

enum Next<P, R> {
    Render(RenderResult<P, R>),
    Replace(ResourceFiber<P, R>, RenderResult<P, R>),
    Delete,
}

impl<P, R: Clone> Clone for Next<P, R> {
    fn clone(&self) -> Self {
        match self {
            Next::Render(result) => Next::Render(result.clone()),
            Next::Replace(fiber, result) => Next::Replace(fiber.clone(), result.clone()),
            Next::Delete => Next::Delete,
        }
    }
}

struct Slot<P, R> {
    fiber: ResourceFiber<P, R>,
    next: Next<P, R>,
}

struct RenderedList<R> {
    deps: Rc<dyn Deps>,
    version: u64,
    outputs: Vec<R>,
}

/// Children of one `tap_resources` call site.
struct KeyedList<P, R> {
    slots: RefCell<IndexMap<ResourceKey, Slot<P, R>>>,
    /// Bumped whenever the cells of a child (or of its descendants) change
    /// outside of a render.
    version: Rc<Cell<u64>>,
    mark_dirty: MarkDirty,
    /// Bumped on every render of the children; the commit effect keys on it.
    generation: Cell<u64>,
    rendered: RefCell<Option<RenderedList<R>>>,
}

impl<P: 'static, R: Clone + 'static> KeyedList<P, R> {
    fn new() -> Rc<Self> {
        let parent = current_fiber().mark_dirty_handle();
        let version = Rc::new(Cell::new(0));
        let bump = Rc::clone(&version);
        let mark_dirty: MarkDirty = Rc::new(move || {
            bump.set(bump.get() + 1);
            if let Some(parent) = &parent {
                parent();
            }
        });
        Rc::new(Self {
            slots: RefCell::new(IndexMap::new()),
            version,
            mark_dirty,
            generation: Cell::new(0),
            rendered: RefCell::new(None),
        })
    }

    fn new_child(&self, element: &Element<P, R>) -> ResourceFiber<P, R> {
        new_child(element, Some(Rc::clone(&self.mark_dirty)))
    }

    /// Renders every element and records the commit plan of each slot.
    fn render(&self, elements: &[Element<P, R>]) -> Vec<R> {
        self.generation.set(self.generation.get() + 1);
        let mut seen = HashSet::new();
        let mut outputs = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            let Some(key) = element.key() else {
                panic!("tap_resources did not provide a key for array at index {index}");
            };
            if !seen.insert(key.clone()) {
                panic!("Duplicate key {key} in tap_resources");
            }

            let existing = self.slots.borrow().get(key).map(|slot| slot.fiber.clone());
            match existing {
                None => {
                    let fiber = self.new_child(element);
                    let result = fiber.render(element.shared_props());
                    outputs.push(result.output.clone());
                    self.slots.borrow_mut().insert(
                        key.clone(),
                        Slot {
                            fiber,
                            next: Next::Render(result),
                        },
                    );
                }
                Some(fiber) => {
                    let next = if fiber.resource_id() == element.resource().id() {
                        let result = fiber.render(element.shared_props());
                        outputs.push(result.output.clone());
                        Next::Render(result)
                    } else {
                        let replacement = self.new_child(element);
                        let result = replacement.render(element.shared_props());
                        outputs.push(result.output.clone());
                        Next::Replace(replacement, result)
                    };
                    if let Some(slot) = self.slots.borrow_mut().get_mut(key) {
                        slot.next = next;
                    }
                }
            }
        }

        for (key, slot) in self.slots.borrow_mut().iter_mut() {
            if !seen.contains(key) {
                slot.next = Next::Delete;
            }
        }
        outputs
    }

    /// Applies the recorded plan: deletes, replacements, then commits.
    fn commit(&self) {
        let plan: Vec<_> = self
            .slots
            .borrow()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.fiber.clone(), slot.next.clone()))
            .collect();
        let mut errors = ErrorSink::default();
        for (key, fiber, next) in plan {
            match next {
                Next::Delete => {
                    unmount_if_mounted(&fiber, &mut errors);
                    self.slots.borrow_mut().shift_remove(&key);
                }
                Next::Replace(replacement, result) => {
                    unmount_if_mounted(&fiber, &mut errors);
                    if let Some(slot) = self.slots.borrow_mut().get_mut(&key) {
                        slot.fiber = replacement.clone();
                        slot.next = Next::Render(result.clone());
                    }
                    errors.record(replacement.commit(&result));
                }
                Next::Render(result) => {
                    errors.record(fiber.commit(&result));
                }
            }
        }
        finish_or_raise(errors);
    }

    fn unmount_all(&self) {
        let fibers: Vec<_> = self.slots.borrow().values().map(|slot| slot.fiber.clone()).collect();
        let mut errors = ErrorSink::default();
        for fiber in &fibers {
            unmount_if_mounted(fiber, &mut errors);
        }
        finish_or_raise(errors);
    }

    /// Registers the unmount and commit effects on the calling instance.
    fn tap_lifecycle(self: &Rc<Self>) {
        let mounted = Rc::clone(self);
        tap_effect_with((), move || {
            let list = Rc::clone(&mounted);
            on_cleanup(move || list.unmount_all())
        });

        let committing = Rc::clone(self);
        tap_effect_with(self.generation.get(), move || committing.commit());
    }
}

/// Renders a keyed list of children and returns their outputs in order.
///
/// Surviving keys keep their instance (and state), new keys get fresh
/// instances and keys that disappear are unmounted on commit. A key whose
/// resource changes is treated as a new instance.
///
/// # Panics
///
/// If an element has no key or two elements share a key.
pub fn tap_resources<P, R>(elements: &[Element<P, R>]) -> Vec<R>
where
    P: 'static,
    R: Clone + 'static,
{
    let list = tap_const(KeyedList::<P, R>::new);
    let outputs = list.render(elements);
    list.tap_lifecycle();
    outputs
}

/// Like [`tap_resources`], but the elements are built by `get_elements` and
/// the children are rendered again only when `deps` changes or one of them
/// (or one of their descendants) was updated.
///
/// Otherwise the outputs of the previous render are returned and
/// `get_elements` is not called.
///
/// # Panics
///
/// As [`tap_resources`].
pub fn tap_resources_with<P, R, D>(get_elements: impl FnOnce() -> Vec<Element<P, R>>, deps: D) -> Vec<R>
where
    P: 'static,
    R: Clone + 'static,
    D: Deps,
{
    let list = tap_const(KeyedList::<P, R>::new);
    let deps: Rc<dyn Deps> = Rc::new(deps);
    let version = list.version.get();
    let cached = list
        .rendered
        .borrow()
        .as_ref()
        .filter(|rendered| rendered.version == version && rendered.deps.same_as(deps.as_ref()))
        .map(|rendered| rendered.outputs.clone());

    let outputs = match cached {
        Some(outputs) => outputs,
        None => {
            let outputs = list.render(&get_elements());
            *list.rendered.borrow_mut() = Some(RenderedList {
                deps,
                version,
                outputs: outputs.clone(),
            });
            outputs
        }
    };
    list.tap_lifecycle();
    outputs
}
