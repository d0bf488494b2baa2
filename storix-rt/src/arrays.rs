//! Array mutators and splice notification.
//!
//! Each mutator resolves its array through the path engine, mutates it
//! in place, and announces the change as a single splice record
//! `{index, addedCount, removed, object, type}` under `<path>.splices`
//! followed by `<path>.length`. Missing or non array paths are silent
//! no-ops.

use crate::store::Store;
use anyhow::Result;
use arcstr::{ArcStr, literal};
use compact_str::format_compact;
use parking_lot::RwLock;
use smallvec::{SmallVec, smallvec};
use storix_core::{path, value::Value};
use triomphe::Arc;

impl Store {
    fn resolve_array(&self, path_s: &str) -> Option<(Arc<RwLock<Vec<Value>>>, ArcStr)> {
        let (v, np) = path::get_with_path(&self.data_value(), path_s);
        match v {
            Some(Value::Array(a)) => Some((a, ArcStr::from(np.as_str()))),
            Some(_) | None => None,
        }
    }

    /// Append values, returning the new length.
    pub fn push<I: IntoIterator<Item = Value>>(
        &mut self,
        path_s: &str,
        values: I,
    ) -> Result<Option<usize>> {
        let Some((arr, apath)) = self.resolve_array(path_s) else { return Ok(None) };
        let (start, len) = {
            let mut a = arr.write();
            let start = a.len();
            a.extend(values);
            (start, a.len())
        };
        if len > start {
            self.emit_splice(&apath, Value::Array(arr), start, len - start, Vec::new())?;
        }
        Ok(Some(len))
    }

    /// Remove and return the last element. The splice record carries
    /// the length before the pop as its index, even where that
    /// diverges from the removed element's position.
    pub fn pop(&mut self, path_s: &str) -> Result<Option<Value>> {
        let Some((arr, apath)) = self.resolve_array(path_s) else { return Ok(None) };
        let (ret, len_before) = {
            let mut a = arr.write();
            let len = a.len();
            (a.pop(), len)
        };
        let Some(ret) = ret else { return Ok(None) };
        self.emit_splice(&apath, Value::Array(arr), len_before, 0, vec![ret.clone()])?;
        Ok(Some(ret))
    }

    /// Remove and return the first element.
    pub fn shift(&mut self, path_s: &str) -> Result<Option<Value>> {
        let Some((arr, apath)) = self.resolve_array(path_s) else { return Ok(None) };
        let ret = {
            let mut a = arr.write();
            if a.is_empty() { None } else { Some(a.remove(0)) }
        };
        let Some(ret) = ret else { return Ok(None) };
        self.emit_splice(&apath, Value::Array(arr), 0, 0, vec![ret.clone()])?;
        Ok(Some(ret))
    }

    /// Prepend values, returning the new length.
    pub fn unshift<I: IntoIterator<Item = Value>>(
        &mut self,
        path_s: &str,
        values: I,
    ) -> Result<Option<usize>> {
        let Some((arr, apath)) = self.resolve_array(path_s) else { return Ok(None) };
        let (added, len) = {
            let mut a = arr.write();
            let mut i = 0;
            for v in values {
                a.insert(i, v);
                i += 1;
            }
            (i, a.len())
        };
        if added > 0 {
            self.emit_splice(&apath, Value::Array(arr), 0, added, Vec::new())?;
        }
        Ok(Some(len))
    }

    /// Remove `delete_count` elements at `start` (negative counts from
    /// the end) and insert `items` there. Returns the removed
    /// elements.
    pub fn splice(
        &mut self,
        path_s: &str,
        start: i64,
        delete_count: i64,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let Some((arr, apath)) = self.resolve_array(path_s) else { return Ok(Vec::new()) };
        let added = items.len();
        let (start, removed) = {
            let mut a = arr.write();
            let len = a.len() as i64;
            let start = if start < 0 { (len + start).max(0) } else { start.min(len) } as usize;
            let dc = delete_count.clamp(0, len - start as i64) as usize;
            let removed: Vec<Value> = a.splice(start..start + dc, items).collect();
            (start, removed)
        };
        if added > 0 || !removed.is_empty() {
            self.emit_splice(&apath, Value::Array(arr), start, added, removed.clone())?;
        }
        Ok(removed)
    }

    /// Remove the first element equal to `value`.
    pub fn splice_by_value(&mut self, path_s: &str, value: &Value) -> Result<Option<Value>> {
        let Some((arr, _)) = self.resolve_array(path_s) else { return Ok(None) };
        let idx = arr.read().iter().position(|v| v == value);
        match idx {
            None => Ok(None),
            Some(i) => Ok(self.splice(path_s, i as i64, 1, Vec::new())?.into_iter().next()),
        }
    }

    /// Re-emit splice records for an array that was already mutated
    /// outside the store.
    pub fn notify_splices(&mut self, path_s: &str, splices: Vec<Value>) -> Result<()> {
        let Some((_, apath)) = self.resolve_array(path_s) else { return Ok(()) };
        self.notify_splices_impl(&apath, SmallVec::from_vec(splices))
    }

    fn emit_splice(
        &mut self,
        apath: &ArcStr,
        object: Value,
        index: usize,
        added: usize,
        removed: Vec<Value>,
    ) -> Result<()> {
        let record = Value::object([
            (literal!("index"), Value::from(index)),
            (literal!("addedCount"), Value::from(added)),
            (literal!("removed"), Value::from(removed)),
            (literal!("object"), object),
            (literal!("type"), Value::from("splice")),
        ]);
        self.notify_splices_impl(apath, smallvec![record])
    }

    fn notify_splices_impl(
        &mut self,
        apath: &ArcStr,
        splices: SmallVec<[Value; 1]>,
    ) -> Result<()> {
        let spl_key = ArcStr::from(format_compact!("{apath}.splices").as_str());
        let len_key = ArcStr::from(format_compact!("{apath}.length").as_str());
        let envelope =
            Value::object([(literal!("indexSplices"), Value::from_iter(splices))]);
        let mut dirty = self.set_pending(&spl_key, envelope.clone());
        let len = self.resolve_array(apath).map(|(a, _)| a.read().len()).unwrap_or(0);
        dirty |= self.set_pending(&len_key, Value::from(len));
        // release the records right away, they can hold large removed
        // slices and must not live past this cycle
        if let Value::Map(m) = &envelope {
            m.write().insert(literal!("indexSplices"), Value::Null);
        }
        if dirty {
            self.invalidate()?
        }
        Ok(())
    }
}
