#![doc = r"Core runtime for fine-grained reactive resources."]
//!
//! A [`Resource`] is a body function; an [`Element`] asks for an instance of
//! it. Bodies call `tap_*` hooks in a fixed order to reach their per-instance
//! cells. Updates are batched by the scheduler, applied through a versioned
//! root and made visible by a commit that also runs effects.
//!
//! Hosts drive instances through [`create_resource`] or
//! [`create_resource_root`]; batched flushes are posted as macrotasks to the
//! current [`Runtime`], and [`flush_resources_sync`] drains them immediately.

pub mod collections;
pub mod platform;
pub mod runtime;

mod cell;
mod context;
mod effect;
mod effect_event;
mod error;
mod execution_context;
mod fiber;
mod handle;
mod memo;
mod nested;
mod reducer;
mod resource;
mod root;
mod scheduler;
mod subscribable;
mod tap_ref;

pub use cell::Deps;
pub use context::{create_resource_context, tap_context, with_context_provider, ResourceContext};
pub use effect::{on_cleanup, tap_effect, tap_effect_with, EffectResult};
pub use effect_event::{tap_effect_event, EffectEvent};
pub use error::TapError;
pub use handle::{create_resource, create_resource_root, ResourceHandle, ResourceOptions, ResourceRoot};
pub use memo::{tap_callback, tap_const, tap_memo};
pub use nested::{tap_resource, tap_resources, tap_resources_with};
pub use platform::RuntimeScheduler;
pub use reducer::{
    tap_reducer, tap_reducer_with_derived_state, tap_reducer_with_init, tap_state, tap_state_with,
    Dispatch, StateSetter, StateUpdate,
};
pub use resource::{resource, with_key, Element, Resource, ResourceId, ResourceKey};
pub use runtime::{current_runtime, DefaultScheduler, Runtime, RuntimeGuard, RuntimeHandle};
pub use scheduler::{flush_resources_sync, MAX_FLUSH_DEPTH};
pub use subscribable::{tap_resource_root, tap_subscribable_resource, SubscribableResource, Unsubscribe};
pub use tap_ref::{tap_ref, TapRef};

/// Development-only auditing (strict double invocation) is compiled in for
/// debug builds.
pub(crate) const IS_DEVELOPMENT: bool = cfg!(debug_assertions);
