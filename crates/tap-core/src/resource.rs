//! Resource descriptors and the elements that request them.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_RESOURCE_ID: AtomicUsize = AtomicUsize::new(1);

/// Identity of a [`Resource`], shared by all of its clones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(usize);

/// Identity key distinguishing siblings created from the same resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Int(i64),
    Str(Rc<str>),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Int(value) => write!(f, "{value}"),
            ResourceKey::Str(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for ResourceKey {
    fn from(value: i64) -> Self {
        ResourceKey::Int(value)
    }
}

impl From<i32> for ResourceKey {
    fn from(value: i32) -> Self {
        ResourceKey::Int(value.into())
    }
}

impl From<usize> for ResourceKey {
    fn from(value: usize) -> Self {
        ResourceKey::Int(value as i64)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        ResourceKey::Str(Rc::from(value))
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        ResourceKey::Str(Rc::from(value))
    }
}

/// A body function producing `R` from props `P`.
///
/// Resources are immutable descriptors. Every clone shares the same
/// [`ResourceId`], which together with an optional key decides whether an
/// existing instance is reused.
pub struct Resource<P, R> {
    id: ResourceId,
    body: Rc<dyn Fn(&P) -> R>,
}

impl<P, R> Clone for Resource<P, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            body: Rc::clone(&self.body),
        }
    }
}

impl<P, R> fmt::Debug for Resource<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource").field("id", &self.id).finish()
    }
}

impl<P: 'static, R: 'static> Resource<P, R> {
    pub fn new(body: impl Fn(&P) -> R + 'static) -> Self {
        Self {
            id: ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            body: Rc::new(body),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Builds an unkeyed element for `props`.
    pub fn element(&self, props: P) -> Element<P, R> {
        Element {
            resource: self.clone(),
            props: Rc::new(props),
            key: None,
        }
    }

    /// Builds an element carrying `key`.
    pub fn keyed(&self, key: impl Into<ResourceKey>, props: P) -> Element<P, R> {
        self.element(props).with_key(key)
    }

    pub(crate) fn call(&self, props: &P) -> R {
        (self.body)(props)
    }
}

impl<R: 'static> Resource<(), R> {
    /// Element for a resource that takes no props.
    pub fn unit(&self) -> Element<(), R> {
        self.element(())
    }
}

/// Shorthand for [`Resource::new`].
pub fn resource<P: 'static, R: 'static>(body: impl Fn(&P) -> R + 'static) -> Resource<P, R> {
    Resource::new(body)
}

/// A request to instantiate or update a resource.
pub struct Element<P, R> {
    resource: Resource<P, R>,
    props: Rc<P>,
    key: Option<ResourceKey>,
}

impl<P, R> Clone for Element<P, R> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            props: Rc::clone(&self.props),
            key: self.key.clone(),
        }
    }
}

impl<P, R> fmt::Debug for Element<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("resource", &self.resource.id)
            .field("key", &self.key)
            .finish()
    }
}

impl<P, R> Element<P, R> {
    pub fn resource(&self) -> &Resource<P, R> {
        &self.resource
    }

    pub fn props(&self) -> &P {
        &self.props
    }

    pub fn key(&self) -> Option<&ResourceKey> {
        self.key.as_ref()
    }

    pub fn with_key(mut self, key: impl Into<ResourceKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub(crate) fn shared_props(&self) -> &Rc<P> {
        &self.props
    }

    /// Whether `other` addresses the same instance: same resource, same key.
    pub(crate) fn same_identity(&self, other: &Element<P, R>) -> bool {
        self.resource.id == other.resource.id && self.key == other.key
    }

    /// Same identity and the same props allocation.
    pub(crate) fn same_element(&self, other: &Element<P, R>) -> bool {
        self.same_identity(other) && Rc::ptr_eq(&self.props, &other.props)
    }
}

/// Returns a copy of `element` tagged with `key`.
pub fn with_key<P, R>(key: impl Into<ResourceKey>, element: &Element<P, R>) -> Element<P, R> {
    element.clone().with_key(key)
}
