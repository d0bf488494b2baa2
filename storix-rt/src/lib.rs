//! A reactive observable store.
//!
//! A [Store] holds a set of named properties declared up front. The
//! declarations form a dependency graph, computed properties derive
//! their value from other properties through a method expression, and
//! observers watch properties or whole subtrees. Every mutation enters
//! a pending buffer, and a flush runs one coordinated change cycle,
//! computes are re-run to a fixpoint, linked paths are mirrored, array
//! splices are announced, dependent child stores are cascaded, and
//! finally observers fire. Writes made by an observer while a cycle is
//! in flight fold into that cycle instead of starting a new one.
use arcstr::ArcStr;
use derive_builder::Builder;
use fxhash::FxHashMap;
use serde_derive::{Deserialize, Serialize};
use std::sync;

mod arrays;
mod pipeline;
mod registry;
mod store;

pub use pipeline::ComputedCycle;
pub use registry::{Accessor, Action, Effect, EffectKind, MethodInfo, Registry, Trigger};
pub use store::{Changes, Client, Store};
pub use storix_core::{MalformedExpression, Value, expr, path, value};

/// A callable resolved by name from computed expressions and
/// observers. Computed methods return the new value, observers
/// usually return `None`.
pub type Method = sync::Arc<dyn Fn(&mut Store, &[Value]) -> Option<Value> + Send + Sync>;

/// Wrap a closure as a [Method].
pub fn method<F>(f: F) -> Method
where
    F: Fn(&mut Store, &[Value]) -> Option<Value> + Send + Sync + 'static,
{
    sync::Arc::new(f)
}

/// One property declaration.
///
/// `computed` implies the property is read only. `observer` names a
/// method invoked with `(new, old, path)` whenever the property or
/// anything beneath it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySpec {
    /// opaque type marker, carried for external consumers
    #[serde(rename = "type", default)]
    pub typ: Option<ArcStr>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub computed: Option<ArcStr>,
    #[serde(default)]
    pub observer: Option<ArcStr>,
    /// the methods named by this property are late bound, suppress
    /// the missing method diagnostic for them
    #[serde(default)]
    pub dynamic_fn: bool,
}

#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct StoreConfig {
    /// Property declarations, in registration order.
    #[builder(default)]
    pub properties: Vec<(ArcStr, PropertySpec)>,
    /// Named methods resolved by computed expressions and observers.
    #[builder(default)]
    pub methods: FxHashMap<ArcStr, Method>,
    /// Defer flushes to an explicit [Store::flush] call instead of
    /// flushing at the public mutator boundary.
    #[builder(default)]
    pub async_effects: bool,
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }
}
