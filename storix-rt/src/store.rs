//! The store, its accessor table, and the pending change buffer.

use crate::{
    Method, PropertySpec, StoreConfig,
    pipeline::ComputedCycle,
    registry::{Action, EffectKind, MethodInfo, Registry, Trigger},
};
use anyhow::{Context, Result};
use arcstr::ArcStr;
use compact_str::ToCompactString;
use enumflags2::BitFlags;
use fxhash::{FxBuildHasher, FxHashMap, FxHashSet};
use indexmap::IndexMap;
use log::{debug, error};
use parking_lot::RwLock;
use std::fmt;
use storix_core::{
    expr::{self, Arg},
    path,
    value::{Object, Value},
};
use triomphe::Arc;

/// An ordered set of path -> value changes. Insertion order is
/// delivery order.
pub type Changes = IndexMap<ArcStr, Value, FxBuildHasher>;

/// A downstream participant in the change cycle. Enqueued clients are
/// flushed (with `from_above` set) after linked path mirroring and
/// before observers run.
pub trait Client {
    fn flush_properties(&mut self, from_above: bool);
}

pub struct Store {
    /// flat map from normalized path to value. Root property entries
    /// double as the nodes of the live tree, deep path entries are a
    /// cache written alongside tree mutations.
    pub(crate) data: Arc<RwLock<Object>>,
    pub(crate) registry: Registry,
    pub(crate) methods: FxHashMap<ArcStr, Method>,
    pub(crate) pending: Option<Changes>,
    pub(crate) old: Option<Changes>,
    pub(crate) invalid: bool,
    pub(crate) initialized: bool,
    pub(crate) from_above: bool,
    pub(crate) async_effects: bool,
    pub(crate) linked_paths: IndexMap<ArcStr, ArcStr, FxBuildHasher>,
    pub(crate) pending_clients: Vec<Box<dyn Client + Send>>,
    // reentrancy state. run_id counts folded batches, interim holds
    // everything folded into the in flight cycle, committing marks
    // the outermost frame while it delivers.
    pub(crate) interim: Option<Changes>,
    pub(crate) interim_old: Option<Changes>,
    pub(crate) run_id: u64,
    pub(crate) effect_stamp: u64,
    pub(crate) committing: bool,
    pub(crate) internal_set: FxHashSet<ArcStr>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Store {{ data: {}, pending: {:?}, invalid: {}, initialized: {} }}",
            self.data_value(),
            self.pending.as_ref().map(|p| p.keys().collect::<Vec<_>>()),
            self.invalid,
            self.initialized
        )
    }
}

impl Store {
    /// Build a store from its configuration. Property registration
    /// happens here, in declaration order; malformed computed
    /// expressions and computed dependency cycles are reported now,
    /// not at first flush.
    pub fn new(cfg: StoreConfig) -> Result<Store> {
        let StoreConfig { properties, methods, async_effects } = cfg;
        let mut t = Store {
            data: Arc::new(RwLock::new(Object::default())),
            registry: Registry::new(),
            methods,
            pending: None,
            old: None,
            invalid: false,
            initialized: false,
            from_above: false,
            async_effects,
            linked_paths: IndexMap::default(),
            pending_clients: Vec::new(),
            interim: None,
            interim_old: None,
            run_id: 0,
            effect_stamp: 0,
            committing: false,
            internal_set: FxHashSet::default(),
        };
        let mut deps: FxHashMap<ArcStr, Vec<ArcStr>> = FxHashMap::default();
        for (name, spec) in &properties {
            t.register_property(name, spec, &mut deps)?
        }
        check_computed_dag(&deps)?;
        Ok(t)
    }

    fn register_property(
        &mut self,
        name: &ArcStr,
        spec: &PropertySpec,
        deps: &mut FxHashMap<ArcStr, Vec<ArcStr>>,
    ) -> Result<()> {
        // computed implies read only
        let read_only = spec.read_only || spec.computed.is_some();
        if let Some(expression) = &spec.computed {
            if !self.registry.has_read_only(name) {
                let sig = expr::parse(expression)
                    .with_context(|| format!("computed expression of property {name}"))?;
                let mut d = Vec::new();
                for arg in sig.args.iter() {
                    if let Arg::Path(p) = arg {
                        d.push(p.root.clone())
                    }
                }
                deps.insert(name.clone(), d);
                self.add_method_effects(
                    EffectKind::Compute,
                    &sig,
                    Some(name.clone()),
                    spec.dynamic_fn,
                    true,
                );
            }
        }
        if read_only && !self.registry.has_read_only(name) {
            self.registry.add_effect(
                EffectKind::ReadOnly,
                Trigger::exact(name.clone()),
                Action::ReadOnly,
            );
            if spec.computed.is_none() {
                self.internal_set.insert(name.clone());
            }
        }
        if let Some(observer) = &spec.observer {
            self.registry.add_effect(
                EffectKind::Observe,
                Trigger::subtree(name.clone()),
                Action::Observer(ArcStr::from(observer.as_str())),
            );
        }
        Ok(())
    }

    fn add_method_effects(
        &mut self,
        kind: EffectKind,
        sig: &expr::Signature,
        target: Option<ArcStr>,
        dynamic: bool,
        on_method_name: bool,
    ) {
        let info = MethodInfo::new(sig.method.clone(), sig.args.clone(), target, dynamic);
        for arg in sig.args.iter() {
            if let Some(trigger) = Trigger::from_arg(arg) {
                self.registry.add_effect(kind, trigger, Action::Method(info.clone()));
            }
        }
        if on_method_name {
            let trigger = Trigger::exact(sig.method.clone());
            self.registry.add_effect(kind, trigger, Action::Method(info));
        }
    }

    /// Register a method observer from a signature expression, e.g.
    /// `_addressChanged(address.*, zip)`. Path arguments become the
    /// observer's triggers; wildcard arguments are delivered as
    /// `{path, value, base}` objects.
    pub fn add_observer_expression(&mut self, expression: &str) -> Result<()> {
        let sig = expr::parse(expression)
            .with_context(|| "observer expression".to_string())?;
        self.add_method_effects(EffectKind::Observe, &sig, None, false, false);
        Ok(())
    }

    pub(crate) fn data_value(&self) -> Value {
        Value::Map(self.data.clone())
    }

    pub(crate) fn flat(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    #[cfg(test)]
    pub(crate) fn flat_for_test(&self, key: &str) -> Option<Value> {
        self.flat(key)
    }

    /// Read a path. `None` on any missing segment.
    pub fn get(&self, path_s: &str) -> Option<Value> {
        path::get(&self.data_value(), path_s)
    }

    /// Read a path from a caller supplied root instead of the store
    /// data.
    pub fn get_in(&self, root: &Value, path_s: &str) -> Option<Value> {
        path::get(root, path_s)
    }

    /// As [Store::get], also yielding the normalized path the walk
    /// resolved.
    pub fn get_with_path(&self, path_s: &str) -> (Option<Value>, ArcStr) {
        let (v, p) = path::get_with_path(&self.data_value(), path_s);
        (v, ArcStr::from(p.as_str()))
    }

    /// Write a path and notify. A write whose root property is read
    /// only is silently dropped; a deep write over a missing
    /// intermediate is a silent no-op.
    pub fn set(&mut self, path_s: &str, value: Value) -> Result<()> {
        if self.read_only_root(path_s) {
            debug!("dropping write to read only property {}", path::root(path_s));
            return Ok(());
        }
        if let Some(key) = self.set_path_or_unmanaged(path_s, &value) {
            if self.set_pending(&key, value) {
                self.invalidate()?
            }
        }
        Ok(())
    }

    /// Bare tree write into a caller supplied root, no notification.
    pub fn set_in(&self, root: &Value, path_s: &str, value: Value) {
        let _ = path::set(root, path_s, value);
    }

    /// Batch write. Read only roots are skipped, one flush at the
    /// end.
    pub fn set_properties<I, S>(&mut self, props: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let mut dirty = false;
        for (p, v) in props {
            let p = p.as_ref();
            if self.read_only_root(p) {
                continue;
            }
            if let Some(key) = self.set_path_or_unmanaged(p, &v) {
                dirty |= self.set_pending(&key, v);
            }
        }
        if dirty {
            self.invalidate()?
        }
        Ok(())
    }

    /// The internal setter for a read only (non computed) property.
    /// Writes to other properties are dropped.
    pub fn set_internal(&mut self, prop: &str, value: Value) -> Result<()> {
        if !self.internal_set.contains(prop) {
            debug!("no internal setter for property {prop}");
            return Ok(());
        }
        let key = ArcStr::from(prop);
        if self.set_pending(&key, value) {
            self.invalidate()?
        }
        Ok(())
    }

    /// Force a notification for a leaf that was mutated outside the
    /// store, reading its current value.
    pub fn notify_path(&mut self, path_s: &str) -> Result<()> {
        let v = self.get(path_s).unwrap_or(Value::Null);
        self.notify_path_value(path_s, v)
    }

    /// Force a notification for a leaf with an explicit value. The
    /// tree is not written, only the cache and the pending buffer.
    pub fn notify_path_value(&mut self, path_s: &str, value: Value) -> Result<()> {
        let key = ArcStr::from(path_s);
        if self.set_pending(&key, value) {
            self.invalidate()?
        }
        Ok(())
    }

    /// Keep `to` and `from` mirrored inside the change cycle, in both
    /// directions.
    pub fn link_paths(&mut self, to: &str, from: &str) {
        self.linked_paths.insert(ArcStr::from(to), ArcStr::from(from));
    }

    pub fn unlink_paths(&mut self, to: &str) {
        self.linked_paths.shift_remove(to);
    }

    /// Enqueue a downstream client for the next cycle's cascade
    /// stage.
    pub fn enqueue_client(&mut self, client: Box<dyn Client + Send>) {
        self.pending_clients.push(client);
    }

    /// Mark the store initialized. Writes buffered before this point
    /// flush now.
    pub fn ready(&mut self) -> Result<()> {
        self.initialized = true;
        if self.pending.is_some() {
            self.flush_batch(false)?
        }
        Ok(())
    }

    /// Run a change cycle if anything is pending. This is the flush
    /// boundary in async mode; in synchronous mode mutators flush on
    /// their own.
    pub fn flush(&mut self) -> Result<()> {
        if !self.initialized {
            return self.ready();
        }
        self.flush_batch(false)
    }

    pub fn has_effect(&self, prop: &str) -> bool {
        self.registry.has_effect(prop, BitFlags::all())
    }

    pub fn has_read_only(&self, prop: &str) -> bool {
        self.registry.has_read_only(prop)
    }

    pub fn has_compute(&self, prop: &str) -> bool {
        self.registry.has_compute(prop)
    }

    /// True while this store is being flushed as part of a parent
    /// store's cascade. Embedding layers use this to suppress
    /// notifying back upward.
    pub fn is_flushing_from_above(&self) -> bool {
        self.from_above
    }

    fn read_only_root(&self, path_s: &str) -> bool {
        self.registry
            .accessor(path::root(path_s))
            .map(|a| a.read_only)
            .unwrap_or(false)
    }

    /// Route a write. Unmanaged roots and deep paths write the tree;
    /// a returned key means the root property is managed and the
    /// caller must enqueue the change through [Store::set_pending].
    pub(crate) fn set_path_or_unmanaged(
        &mut self,
        path_s: &str,
        value: &Value,
    ) -> Option<ArcStr> {
        let root = path::root(path_s);
        let effected = self.registry.has_effect(root, BitFlags::all());
        let deep = path::is_deep(path_s);
        let written = if !effected || deep {
            path::set(&self.data_value(), path_s, value.clone())
        } else {
            Some(path_s.to_compact_string())
        };
        match written {
            Some(p) if effected => Some(ArcStr::from(p.as_str())),
            Some(_) | None => None,
        }
    }

    /// Record a change in the pending buffer.
    ///
    /// The old value is captured only on the first write of a path in
    /// a cycle. Root level container writes invalidate cached deep
    /// entries below them, stale caches must not shadow the new
    /// subtree.
    pub(crate) fn set_pending(&mut self, key: &ArcStr, value: Value) -> bool {
        let old_v = self.flat(key);
        if !Value::should_change(&value, old_v.as_ref()) {
            return false;
        }
        let old = self.old.get_or_insert_default();
        if !old.contains_key(key) {
            old.insert(key.clone(), old_v.unwrap_or(Value::Null));
        }
        if value.is_container() && !path::is_deep(key) {
            self.data.write().retain(|k, _| !path::is_strict_descendant(key, k));
        }
        self.data.write().insert(key.clone(), value.clone());
        self.pending.get_or_insert_default().insert(key.clone(), value);
        true
    }

    /// A flush is needed. In synchronous mode (the default once ready)
    /// run it now, otherwise leave it latched for [Store::flush].
    pub(crate) fn invalidate(&mut self) -> Result<()> {
        self.invalid = true;
        if self.initialized && !self.async_effects {
            self.flush_batch(false)?
        }
        Ok(())
    }
}

impl Client for Store {
    fn flush_properties(&mut self, from_above: bool) {
        if let Err(e) = self.flush_batch(from_above) {
            error!("cascaded flush failed: {e:?}")
        }
    }
}

fn check_computed_dag(deps: &FxHashMap<ArcStr, Vec<ArcStr>>) -> Result<()> {
    // 0 unvisited, 1 on the stack, 2 done
    fn visit(
        n: &ArcStr,
        deps: &FxHashMap<ArcStr, Vec<ArcStr>>,
        state: &mut FxHashMap<ArcStr, u8>,
    ) -> Result<()> {
        match state.get(n).copied().unwrap_or(0) {
            1 => return Err(anyhow::Error::new(ComputedCycle(n.clone()))),
            2 => return Ok(()),
            _ => (),
        }
        state.insert(n.clone(), 1);
        if let Some(ds) = deps.get(n) {
            for d in ds {
                visit(d, deps, state)?
            }
        }
        state.insert(n.clone(), 2);
        Ok(())
    }
    let mut state = FxHashMap::default();
    for n in deps.keys() {
        visit(n, deps, &mut state)?
    }
    Ok(())
}
