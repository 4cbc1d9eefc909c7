//! Values scoped to the synchronous call stack of bodies.
//!
//! A provider pushes a value for the duration of one closure; any body
//! rendered inside it (at any nesting depth) reads that value. Nothing
//! survives past the closure, so values never cross a scheduled flush.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collections::map::HashMap;

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct ContextId(usize);

thread_local! {
    static PROVIDED: RefCell<HashMap<ContextId, Vec<Rc<dyn Any>>>> = RefCell::new(HashMap::default());
}

/// A context key with a default value.
pub struct ResourceContext<T> {
    id: ContextId,
    default: Rc<T>,
}

impl<T> Clone for ResourceContext<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: Rc::clone(&self.default),
        }
    }
}

impl<T> PartialEq for ResourceContext<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ResourceContext<T> {}

pub fn create_resource_context<T: Clone + 'static>(default: T) -> ResourceContext<T> {
    ResourceContext {
        id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
        default: Rc::new(default),
    }
}

/// Reads the innermost provided value of `context`, or its default.
pub fn tap_context<T: Clone + 'static>(context: &ResourceContext<T>) -> T {
    let provided = PROVIDED.with(|provided| {
        provided
            .borrow()
            .get(&context.id)
            .and_then(|stack| stack.last().cloned())
    });
    match provided.and_then(|value| value.downcast::<T>().ok()) {
        Some(value) => (*value).clone(),
        None => (*context.default).clone(),
    }
}

struct ProviderScope {
    id: ContextId,
}

impl Drop for ProviderScope {
    fn drop(&mut self) {
        PROVIDED.with(|provided| {
            let mut provided = provided.borrow_mut();
            if let Some(stack) = provided.get_mut(&self.id) {
                stack.pop();
                if stack.is_empty() {
                    provided.remove(&self.id);
                }
            }
        });
    }
}

/// Runs `content` with `value` provided for `context`.
pub fn with_context_provider<T: 'static, R>(
    context: &ResourceContext<T>,
    value: T,
    content: impl FnOnce() -> R,
) -> R {
    PROVIDED.with(|provided| {
        provided
            .borrow_mut()
            .entry(context.id)
            .or_default()
            .push(Rc::new(value));
    });
    let _scope = ProviderScope { id: context.id };
    content()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn innermost_provider_wins_and_scopes_unwind() {
        let theme = create_resource_context("light");
        assert_eq!(tap_context(&theme), "light");
        with_context_provider(&theme, "dark", || {
            assert_eq!(tap_context(&theme), "dark");
            with_context_provider(&theme, "contrast", || {
                assert_eq!(tap_context(&theme), "contrast");
            });
            assert_eq!(tap_context(&theme), "dark");
        });
        assert_eq!(tap_context(&theme), "light");

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            with_context_provider(&theme, "dark", || panic!("body failed"));
        }));
        assert!(result.is_err());
        assert_eq!(tap_context(&theme), "light");
    }

    #[test]
    fn contexts_are_independent() {
        let first = create_resource_context(1);
        let second = create_resource_context(2);
        with_context_provider(&first, 10, || {
            assert_eq!(tap_context(&first), 10);
            assert_eq!(tap_context(&second), 2);
        });
        assert!(first != second);
        assert!(first == first.clone());
    }
}
