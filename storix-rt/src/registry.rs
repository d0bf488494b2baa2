//! The effect registry.
//!
//! Effects are indexed by kind and by the root property of their
//! trigger path, plus a union index over all kinds. The maps are
//! persistent (immutable-chunkmap), so cloning a registry is cheap and
//! a clone taken from a shared parent copies only the buckets it later
//! mutates, per instance effect additions never leak back.

use arcstr::ArcStr;
use enumflags2::{BitFlags, bitflags};
use immutable_chunkmap::map::MapS as Map;
use std::sync::atomic::AtomicU64;
use storix_core::{expr::Arg, path};
use triomphe::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[bitflags]
#[repr(u8)]
pub enum EffectKind {
    Compute,
    Observe,
    ReadOnly,
}

/// What a registered effect fires on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// trigger path, wildcard suffix removed
    pub name: ArcStr,
    /// the trigger is a deep path
    pub structured: bool,
    /// the trigger binds the whole subtree under `name`
    pub wildcard: bool,
}

impl Trigger {
    pub fn exact(name: ArcStr) -> Self {
        let structured = path::is_deep(&name);
        Trigger { name, structured, wildcard: false }
    }

    pub fn subtree(name: ArcStr) -> Self {
        let structured = path::is_deep(&name);
        Trigger { name, structured, wildcard: true }
    }

    pub fn from_arg(a: &Arg) -> Option<Self> {
        match a {
            Arg::Literal(_) => None,
            Arg::Path(p) => Some(Trigger {
                name: p.name.clone(),
                structured: p.structured,
                wildcard: p.wildcard,
            }),
        }
    }

    /// Does a change at `path` fire this trigger? Same rules as
    /// [storix_core::path::matches].
    pub fn matches(&self, path: &str) -> bool {
        if self.wildcard {
            path::is_descendant(&self.name, path) || path::is_descendant(path, &self.name)
        } else {
            self.name.as_str() == path || path::is_descendant(path, &self.name)
        }
    }
}

/// Method signature metadata for compute and method observer effects.
///
/// `last_run` is the dedupe stamp, an effect runs at most once per
/// dispatch pass no matter how many of its trigger paths changed. It
/// is atomic because the descriptor is shared between the kind bucket
/// and the union bucket.
#[derive(Debug)]
pub struct MethodInfo {
    pub method: ArcStr,
    pub args: Arc<[Arg]>,
    /// the property receiving the computed result, `None` for method
    /// observers
    pub target: Option<ArcStr>,
    /// late bound method, suppresses the missing method diagnostic
    pub dynamic: bool,
    pub last_run: AtomicU64,
}

impl MethodInfo {
    pub fn new(
        method: ArcStr,
        args: Arc<[Arg]>,
        target: Option<ArcStr>,
        dynamic: bool,
    ) -> Arc<Self> {
        Arc::new(MethodInfo { method, args, target, dynamic, last_run: AtomicU64::new(0) })
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    /// computed property or method observer
    Method(Arc<MethodInfo>),
    /// simple property observer, called with (new, old, path)
    Observer(ArcStr),
    /// marker effect, rejects public writes to the property
    ReadOnly,
}

#[derive(Debug, Clone)]
pub struct Effect {
    pub kind: EffectKind,
    pub trigger: Trigger,
    pub action: Action,
}

/// Whether reads and writes of a root property are managed by the
/// store. One entry exists for every property with at least one
/// effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accessor {
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct Registry {
    accessors: Map<ArcStr, Accessor>,
    any: Map<ArcStr, Vec<Arc<Effect>>>,
    compute: Map<ArcStr, Vec<Arc<Effect>>>,
    observe: Map<ArcStr, Vec<Arc<Effect>>>,
    read_only: Map<ArcStr, Vec<Arc<Effect>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            accessors: Map::new(),
            any: Map::new(),
            compute: Map::new(),
            observe: Map::new(),
            read_only: Map::new(),
        }
    }

    fn bucket(&self, kind: EffectKind) -> &Map<ArcStr, Vec<Arc<Effect>>> {
        match kind {
            EffectKind::Compute => &self.compute,
            EffectKind::Observe => &self.observe,
            EffectKind::ReadOnly => &self.read_only,
        }
    }

    fn bucket_mut(&mut self, kind: EffectKind) -> &mut Map<ArcStr, Vec<Arc<Effect>>> {
        match kind {
            EffectKind::Compute => &mut self.compute,
            EffectKind::Observe => &mut self.observe,
            EffectKind::ReadOnly => &mut self.read_only,
        }
    }

    fn push(map: &mut Map<ArcStr, Vec<Arc<Effect>>>, root: &ArcStr, eff: Arc<Effect>) {
        match map.get_mut_cow(root) {
            Some(v) => v.push(eff),
            None => {
                map.insert_cow(root.clone(), vec![eff]);
            }
        }
    }

    /// Register an effect. The trigger's root property gets an
    /// accessor entry if it does not have one yet; a `ReadOnly`
    /// registration upgrades the accessor whatever the registration
    /// order was.
    pub fn add_effect(&mut self, kind: EffectKind, trigger: Trigger, action: Action) {
        let root = ArcStr::from(path::root(&trigger.name));
        match self.accessors.get_mut_cow(&root) {
            Some(acc) => {
                if kind == EffectKind::ReadOnly {
                    acc.read_only = true
                }
            }
            None => {
                let acc = Accessor { read_only: kind == EffectKind::ReadOnly };
                self.accessors.insert_cow(root.clone(), acc);
            }
        }
        let eff = Arc::new(Effect { kind, trigger, action });
        Self::push(&mut self.any, &root, eff.clone());
        Self::push(self.bucket_mut(kind), &root, eff);
    }

    pub fn accessor(&self, prop: &str) -> Option<&Accessor> {
        self.accessors.get(prop)
    }

    pub fn effects(&self, kind: EffectKind, root: &str) -> Option<&Vec<Arc<Effect>>> {
        self.bucket(kind).get(root)
    }

    pub fn has_effect(&self, prop: &str, mask: BitFlags<EffectKind>) -> bool {
        if mask == BitFlags::all() {
            return self.any.get(prop).map(|v| !v.is_empty()).unwrap_or(false);
        }
        mask.iter()
            .any(|k| self.bucket(k).get(prop).map(|v| !v.is_empty()).unwrap_or(false))
    }

    pub fn has_read_only(&self, prop: &str) -> bool {
        self.has_effect(prop, EffectKind::ReadOnly.into())
    }

    pub fn has_compute(&self, prop: &str) -> bool {
        self.has_effect(prop, EffectKind::Compute.into())
    }
}
