use arcstr::ArcStr;
use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use triomphe::Arc;

/// The map representation behind `Value::Map`. Insertion order is
/// preserved, it is observable through change notification order.
pub type Object = IndexMap<ArcStr, Value, FxBuildHasher>;

/// A dynamic value held by the store.
///
/// Scalars are plain copies. `Array` and `Map` share their contents
/// through `Arc`, cloning a container value clones the handle, never
/// the tree. That identity sharing is load bearing, the store's data
/// cache and the live tree hold the same container, so in place
/// mutation is visible from both sides.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(ArcStr),
    Array(Arc<RwLock<Vec<Value>>>),
    Map(Arc<RwLock<Object>>),
}

impl Value {
    /// Create an empty map value
    pub fn map() -> Self {
        Value::Map(Arc::new(RwLock::new(Object::default())))
    }

    /// Create an empty array value
    pub fn array() -> Self {
        Value::Array(Arc::new(RwLock::new(Vec::new())))
    }

    /// Create a map value from key/value pairs
    pub fn object<I: IntoIterator<Item = (ArcStr, Value)>>(pairs: I) -> Self {
        Value::Map(Arc::new(RwLock::new(Object::from_iter(pairs))))
    }

    pub fn is_container(&self) -> bool {
        match self {
            Value::Array(_) | Value::Map(_) => true,
            Value::Null
            | Value::Bool(_)
            | Value::I64(_)
            | Value::F64(_)
            | Value::String(_) => false,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<RwLock<Vec<Value>>>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Arc<RwLock<Object>>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Container identity comparison. Scalars are never identical.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (_, _) => false,
        }
    }

    /// Would assigning `new` over `old` count as a change?
    ///
    /// Containers always change, regardless of identity. A missing old
    /// value compares as `Null`. Scalars change when unequal, numbers
    /// compare numerically across `I64`/`F64`, and NaN over NaN is not
    /// a change.
    pub fn should_change(new: &Value, old: Option<&Value>) -> bool {
        if new.is_container() {
            return true;
        }
        !new.same_scalar(old.unwrap_or(&Value::Null))
    }

    fn same_scalar(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Value::I64(a), Value::F64(b)) | (Value::F64(b), Value::I64(a)) => {
                *a as f64 == *b
            }
            (_, _) => false,
        }
    }
}

// Structural equality, containers compare by contents. Used by tests
// and splice_by_value, never by change detection.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::I64(a), Value::F64(b)) | (Value::F64(b), Value::I64(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Arc::ptr_eq(a, b) || *a.read() == *b.read()
            }
            (Value::Map(a), Value::Map(b)) => {
                Arc::ptr_eq(a, b) || {
                    let (a, b) = (a.read(), b.read());
                    a.len() == b.len()
                        && a.iter().all(|(k, v)| b.get(k).map(|o| v == o).unwrap_or(false))
                }
            }
            (_, _) => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I64(i) => write!(f, "{i}"),
            Value::F64(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.read().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?
                    }
                    write!(f, "{v}")?
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.read().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?
                    }
                    write!(f, "{k}: {v}")?
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::I64(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(ArcStr::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(ArcStr::from(v))
    }
}

impl From<ArcStr> for Value {
    fn from(v: ArcStr) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(v)))
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::Array(Arc::new(RwLock::new(Vec::from_iter(iter))))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn changes(new: &Value, old: Option<&Value>) -> bool {
        Value::should_change(new, old)
    }

    #[test]
    fn scalar_change_detection() {
        let s = Value::from("x");
        assert!(!changes(&s, Some(&Value::from("x"))));
        assert!(changes(&s, Some(&Value::from("y"))));
        assert!(changes(&s, Some(&Value::Null)));
        assert!(changes(&Value::from(1), Some(&Value::from(2))));
        assert!(!changes(&Value::from(1), Some(&Value::from(1.0))));
        assert!(!changes(&Value::Null, None));
        assert!(!changes(&Value::Null, Some(&Value::Null)));
        assert!(changes(&Value::from("x"), None));
    }

    #[test]
    fn nan_is_not_a_change() {
        let nan = Value::F64(f64::NAN);
        assert!(!changes(&nan, Some(&Value::F64(f64::NAN))));
        assert!(changes(&nan, Some(&Value::F64(0.))));
        assert!(changes(&Value::F64(0.), Some(&nan)));
    }

    #[test]
    fn containers_always_change() {
        let a = Value::array();
        assert!(changes(&a, Some(&a.clone())));
        assert!(changes(&a, None));
        let m = Value::map();
        assert!(changes(&m, Some(&m.clone())));
    }

    #[test]
    fn structural_eq_vs_identity() {
        let a = Value::from(vec![Value::from(1), Value::from(2)]);
        let b = Value::from(vec![Value::from(1), Value::from(2)]);
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }
}
