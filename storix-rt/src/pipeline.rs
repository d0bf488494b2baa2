//! The batched change cycle.
//!
//! A flush drains the pending buffer and drives it to steady state:
//! computes re-run until no new pending appears, linked paths mirror,
//! the batch folds into the in flight cycle, enqueued clients cascade,
//! and observers fire. The reentrancy rule is a state machine over
//! `run_id`/`interim`: every batch folds and bumps `run_id`, inner
//! frames stop there, and the outermost frame keeps delivering until
//! `run_id` holds still across an observer pass.

use crate::{
    registry::{Action, Effect, EffectKind, MethodInfo},
    store::{Changes, Store},
};
use anyhow::Result;
use arcstr::{ArcStr, literal};
use log::{debug, warn};
use poolshark::local::LPooled;
use smallvec::SmallVec;
use std::{fmt, sync::atomic::Ordering};
use storix_core::{expr::Arg, path, value::Value};
use triomphe::Arc;

/// Bound on compute fixpoint passes within one flush. Configurations
/// that still produce pending changes after this many passes are
/// cyclic.
const MAX_COMPUTE_PASSES: usize = 100;

/// The computed properties of this store form a cycle, either detected
/// at registration or by exceeding the fixpoint pass bound during a
/// flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedCycle(pub ArcStr);

impl fmt::Display for ComputedCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "computed property cycle involving {}", self.0)
    }
}

impl std::error::Error for ComputedCycle {}

fn fold(dst: &mut Changes, src: Changes) {
    for (k, v) in src {
        dst.insert(k, v);
    }
}

fn fold_first(dst: &mut Changes, src: Changes) {
    for (k, v) in src {
        dst.entry(k).or_insert(v);
    }
}

impl Store {
    pub(crate) fn flush_batch(&mut self, from_above: bool) -> Result<()> {
        self.invalid = false;
        match self.pending.take() {
            None => {
                self.old = None;
                Ok(())
            }
            Some(changed) => {
                let old = self.old.take().unwrap_or_default();
                self.properties_changed(changed, old, from_above)
            }
        }
    }

    fn properties_changed(
        &mut self,
        changed: Changes,
        old: Changes,
        from_above: bool,
    ) -> Result<()> {
        let (changed, old) = self.run_computed(changed, old)?;
        let changed = self.mirror_linked(changed);
        // fold this batch into the in flight cycle
        self.run_id += 1;
        fold(self.interim.get_or_insert_default(), changed);
        fold_first(self.interim_old.get_or_insert_default(), old);
        if self.committing {
            // an outer frame is delivering, it will pick this up
            return Ok(());
        }
        self.committing = true;
        self.deliver(from_above);
        self.committing = false;
        self.invalid = false;
        Ok(())
    }

    /// Stages 4 and 5, run by the outermost frame only. Each pass
    /// snapshots `run_id`; observer writes re-enter
    /// [Store::properties_changed], fold, and bump it, so another pass
    /// delivers them before this call returns.
    fn deliver(&mut self, from_above: bool) {
        loop {
            let run = self.run_id;
            let changed = self.interim.take().unwrap_or_default();
            let old = self.interim_old.take().unwrap_or_default();
            debug!("delivering {} changed paths", changed.len());
            let prev = self.from_above;
            self.from_above = from_above;
            self.flush_clients();
            self.run_observers(&changed, &old);
            self.from_above = prev;
            if self.run_id == run {
                break;
            }
        }
    }

    /// Stage 1. Re-run computes over each wave of pending changes
    /// until a pass produces none.
    fn run_computed(
        &mut self,
        mut changed: Changes,
        mut old: Changes,
    ) -> Result<(Changes, Changes)> {
        let mut input = changed.clone();
        let mut passes = 0;
        while !input.is_empty() {
            passes += 1;
            if passes > MAX_COMPUTE_PASSES {
                let prop = input.keys().next().cloned().unwrap_or_else(|| literal!("?"));
                return Err(anyhow::Error::new(ComputedCycle(prop)));
            }
            self.effect_stamp += 1;
            let stamp = self.effect_stamp;
            self.dispatch_computes(&input, stamp);
            match self.pending.take() {
                None => break,
                Some(pending) => {
                    if let Some(pold) = self.old.take() {
                        fold_first(&mut old, pold);
                    }
                    for (k, v) in pending.iter() {
                        changed.insert(k.clone(), v.clone());
                    }
                    input = pending;
                }
            }
        }
        Ok((changed, old))
    }

    fn dispatch_computes(&mut self, input: &Changes, stamp: u64) {
        for (path_key, _) in input.iter() {
            let root = path::root(path_key);
            let mut effects: LPooled<Vec<Arc<Effect>>> = LPooled::take();
            match self.registry.effects(EffectKind::Compute, root) {
                None => continue,
                Some(v) => {
                    effects.extend(v.iter().filter(|e| e.trigger.matches(path_key)).cloned())
                }
            }
            for eff in effects.iter() {
                if let Action::Method(info) = &eff.action {
                    if info.last_run.swap(stamp, Ordering::Relaxed) != stamp {
                        self.run_method(info, path_key, input);
                    }
                }
            }
        }
    }

    /// Stage 2. For every changed path below one side of a linked
    /// pair, write the translated path on the other side and add it to
    /// the batch. Mirroring is cache level, the tree holds one copy.
    fn mirror_linked(&mut self, mut changed: Changes) -> Changes {
        if self.linked_paths.is_empty() {
            return changed;
        }
        let mut extra: LPooled<Vec<(ArcStr, Value)>> = LPooled::take();
        for (to, from) in self.linked_paths.iter() {
            for (p, v) in changed.iter() {
                if path::is_descendant(to, p) {
                    let q = path::translate(to, from, p);
                    extra.push((ArcStr::from(q.as_str()), v.clone()));
                }
                if path::is_descendant(from, p) {
                    let q = path::translate(from, to, p);
                    extra.push((ArcStr::from(q.as_str()), v.clone()));
                }
            }
        }
        for (q, v) in extra.drain(..) {
            self.data.write().insert(q.clone(), v.clone());
            changed.insert(q, v);
        }
        changed
    }

    /// Stage 4. Cascade enqueued clients, then forget them.
    fn flush_clients(&mut self) {
        if self.pending_clients.is_empty() {
            return;
        }
        let mut clients = std::mem::take(&mut self.pending_clients);
        for c in clients.iter_mut() {
            c.flush_properties(true)
        }
    }

    /// Stage 5. Fire observers for every path in the finalized batch,
    /// in batch order; a method observer runs at most once per pass.
    fn run_observers(&mut self, changed: &Changes, old: &Changes) {
        self.effect_stamp += 1;
        let stamp = self.effect_stamp;
        for (path_key, value) in changed.iter() {
            let root = path::root(path_key);
            let mut effects: LPooled<Vec<Arc<Effect>>> = LPooled::take();
            match self.registry.effects(EffectKind::Observe, root) {
                None => continue,
                Some(v) => {
                    effects.extend(v.iter().filter(|e| e.trigger.matches(path_key)).cloned())
                }
            }
            for eff in effects.iter() {
                match &eff.action {
                    Action::ReadOnly => (),
                    Action::Observer(name) => {
                        let method = match self.methods.get(name) {
                            Some(m) => m.clone(),
                            None => {
                                warn!("observer method {name} is not defined on this store");
                                continue;
                            }
                        };
                        let old_v = old.get(path_key).cloned().unwrap_or(Value::Null);
                        let args =
                            [value.clone(), old_v, Value::String(path_key.clone())];
                        method(self, &args);
                    }
                    Action::Method(info) => {
                        if info.last_run.swap(stamp, Ordering::Relaxed) != stamp {
                            self.run_method(info, path_key, changed);
                        }
                    }
                }
            }
        }
    }

    fn run_method(&mut self, info: &MethodInfo, changed_path: &str, props: &Changes) {
        let method = match self.methods.get(&info.method) {
            Some(m) => m.clone(),
            None => {
                if !info.dynamic {
                    warn!("method {} is not defined on this store", info.method)
                }
                return;
            }
        };
        let args = self.marshal_args(info, changed_path, props);
        let result = method(self, &args);
        if let Some(target) = &info.target {
            self.set_property_from_computation(target, result.unwrap_or(Value::Null));
        }
    }

    fn set_property_from_computation(&mut self, target: &ArcStr, value: Value) {
        if self.registry.has_effect(target, enumflags2::BitFlags::all()) {
            self.set_pending(target, value);
        } else {
            self.data.write().insert(target.clone(), value);
        }
    }

    fn arg_value(&self, p: &str, props: &Changes) -> Value {
        path::get(&self.data_value(), p)
            .or_else(|| props.get(p).cloned())
            .unwrap_or(Value::Null)
    }

    fn marshal_args(
        &self,
        info: &MethodInfo,
        changed_path: &str,
        props: &Changes,
    ) -> SmallVec<[Value; 4]> {
        info.args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(l) => l.to_value(),
                Arg::Path(pa) => {
                    if pa.wildcard {
                        if path::is_strict_descendant(&pa.name, changed_path) {
                            let value = self.arg_value(changed_path, props);
                            let base = path::get(&self.data_value(), &pa.name)
                                .unwrap_or(Value::Null);
                            Value::object([
                                (literal!("path"), Value::String(ArcStr::from(changed_path))),
                                (literal!("value"), value),
                                (literal!("base"), base),
                            ])
                        } else {
                            let v = self.arg_value(&pa.name, props);
                            Value::object([
                                (literal!("path"), Value::String(pa.name.clone())),
                                (literal!("value"), v.clone()),
                                (literal!("base"), v),
                            ])
                        }
                    } else if pa.structured {
                        self.arg_value(&pa.name, props)
                    } else {
                        self.flat(&pa.name).unwrap_or(Value::Null)
                    }
                }
            })
            .collect()
    }
}
