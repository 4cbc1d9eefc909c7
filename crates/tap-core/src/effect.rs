//! Side effects that run when a render is committed.

use std::rc::Rc;

use crate::cell::{Deps, EffectCell, HookCell};
use crate::error::ErrorSink;
use crate::execution_context::current_fiber;

/// What an effect leaves behind: an optional cleanup.
#[derive(Default)]
pub struct EffectResult {
    cleanup: Option<Box<dyn FnOnce()>>,
}

impl EffectResult {
    pub fn none() -> Self {
        Self::default()
    }

    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        self.cleanup
    }
}

impl From<()> for EffectResult {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

/// Registers `cleanup` to run before the next mount of the effect and on
/// unmount.
pub fn on_cleanup(cleanup: impl FnOnce() + 'static) -> EffectResult {
    EffectResult {
        cleanup: Some(Box::new(cleanup)),
    }
}

/// A mount queued by a render; runs only if that render is committed.
pub(crate) struct EffectTask {
    cell: Rc<EffectCell>,
    effect: Box<dyn Fn() -> EffectResult>,
    deps: Option<Rc<dyn Deps>>,
}

impl EffectTask {
    /// Cleans up the previous mount, then mounts again.
    pub(crate) fn run(&self, errors: &mut ErrorSink) {
        if let Some(cleanup) = self.cell.take_cleanup() {
            errors.guard(cleanup);
        }
        errors.guard(|| {
            let result = (self.effect)();
            self.cell.set_cleanup(result.into_cleanup());
            self.cell.set_deps(self.deps.clone());
        });
    }
}

fn tap_effect_impl<E>(effect: impl Fn() -> E + 'static, deps: Option<Rc<dyn Deps>>)
where
    E: Into<EffectResult>,
{
    let fiber = current_fiber();
    let cell = fiber
        .next_cell(|| HookCell::Effect(Rc::new(EffectCell::default())))
        .into_effect();
    if !cell.needs_run(deps.as_ref()) {
        return;
    }
    fiber.push_effect(Rc::new(EffectTask {
        cell,
        effect: Box::new(move || effect().into()),
        deps,
    }));
}

/// Runs `effect` after every commit of the calling instance.
pub fn tap_effect<E>(effect: impl Fn() -> E + 'static)
where
    E: Into<EffectResult>,
{
    tap_effect_impl(effect, None);
}

/// Runs `effect` after commits whose `deps` differ from the last mount.
///
/// Use `()` to mount once.
pub fn tap_effect_with<D, E>(deps: D, effect: impl Fn() -> E + 'static)
where
    D: Deps,
    E: Into<EffectResult>,
{
    tap_effect_impl(effect, Some(Rc::new(deps)));
}
