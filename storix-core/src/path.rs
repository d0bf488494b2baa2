//! Dotted path operations over the value tree.
//!
//! A path like `a.b.2.c` addresses into nested maps and arrays,
//! numeric segments index arrays. A trailing `.*` marks a wildcard
//! binding to the base path and its whole subtree.

use crate::value::Value;
use compact_str::{CompactString, ToCompactString, format_compact};
use std::fmt::Write;

/// One segment of an unnormalized path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part<'a> {
    Key(&'a str),
    Index(usize),
}

/// Join parts with `.`. Keys that already contain dots pass through
/// unchanged, `[Key("a.b"), Key("c")]` normalizes to `a.b.c`.
pub fn normalize(parts: &[Part]) -> CompactString {
    let mut buf = CompactString::default();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            buf.push('.');
        }
        match p {
            Part::Key(k) => buf.push_str(k),
            Part::Index(i) => write!(buf, "{i}").expect("infallible"),
        }
    }
    buf
}

/// The first segment of the path, the property it is rooted at.
pub fn root(path: &str) -> &str {
    match path.find('.') {
        Some(i) => &path[..i],
        None => path,
    }
}

pub fn is_deep(path: &str) -> bool {
    path.contains('.')
}

/// True if `candidate` is `parent` itself or lies below it.
pub fn is_descendant(parent: &str, candidate: &str) -> bool {
    candidate == parent || is_strict_descendant(parent, candidate)
}

/// True if `candidate` lies strictly below `parent`.
pub fn is_strict_descendant(parent: &str, candidate: &str) -> bool {
    candidate.len() > parent.len()
        && candidate.as_bytes()[parent.len()] == b'.'
        && candidate.starts_with(parent)
}

/// `Some(base)` if the path carries a wildcard suffix.
pub fn strip_wildcard(path: &str) -> Option<&str> {
    path.strip_suffix(".*")
}

/// Does an effect registered at `effect_path` fire for a change at
/// `path`?
///
/// Exact paths match themselves and any ancestor (replacing a subtree
/// re-evaluates everything below it). Wildcards additionally match
/// every descendant of their base, but never the base's peers.
pub fn matches(effect_path: &str, path: &str) -> bool {
    match (strip_wildcard(effect_path), strip_wildcard(path)) {
        (Some(eb), Some(pb)) => is_descendant(eb, pb) || is_descendant(pb, eb),
        (Some(eb), None) => is_descendant(eb, path) || is_descendant(path, eb),
        (None, Some(pb)) => is_descendant(pb, effect_path) || is_descendant(effect_path, pb),
        (None, None) => effect_path == path || is_descendant(path, effect_path),
    }
}

/// Replace a leading `from` prefix in `path` with `to`, the caller
/// guarantees `path` descends from `from`.
pub fn translate(from: &str, to: &str, path: &str) -> CompactString {
    format_compact!("{to}{}", &path[from.len()..])
}

fn step(v: &Value, seg: &str) -> Option<Value> {
    match v {
        Value::Map(m) => m.read().get(seg).cloned(),
        Value::Array(a) => {
            if seg == "length" {
                Some(Value::I64(a.read().len() as i64))
            } else {
                let i: usize = seg.parse().ok()?;
                a.read().get(i).cloned()
            }
        }
        Value::Null
        | Value::Bool(_)
        | Value::I64(_)
        | Value::F64(_)
        | Value::String(_) => None,
    }
}

/// Walk `path` from `root`. `None` on any missing segment.
pub fn get(root: &Value, path: &str) -> Option<Value> {
    let mut cur = root.clone();
    for seg in path.split('.') {
        cur = step(&cur, seg)?;
    }
    Some(cur)
}

/// As [get], but also yield the normalized path the walk resolved.
pub fn get_with_path(root: &Value, path: &str) -> (Option<Value>, CompactString) {
    (get(root, path), path.to_compact_string())
}

fn assign(v: &Value, seg: &str, value: Value) -> bool {
    match v {
        Value::Map(m) => {
            m.write().insert(arcstr::ArcStr::from(seg), value);
            true
        }
        Value::Array(a) => match seg.parse::<usize>() {
            Err(_) => false,
            Ok(i) => {
                let mut a = a.write();
                if i >= a.len() {
                    a.resize(i + 1, Value::Null);
                }
                a[i] = value;
                true
            }
        },
        Value::Null
        | Value::Bool(_)
        | Value::I64(_)
        | Value::F64(_)
        | Value::String(_) => false,
    }
}

/// Walk all but the last segment of `path` from `root` and assign the
/// leaf. `None` (and no write) when an intermediate segment is
/// missing, otherwise the normalized path that was written.
pub fn set(root: &Value, path: &str, value: Value) -> Option<CompactString> {
    let mut cur = root.clone();
    let mut it = path.split('.').peekable();
    loop {
        let seg = it.next()?;
        if it.peek().is_none() {
            return if assign(&cur, seg, value) {
                Some(path.to_compact_string())
            } else {
                None
            };
        }
        cur = step(&cur, seg)?;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use arcstr::literal;
    use proptest::prelude::*;

    fn tree() -> Value {
        let inner = Value::object([
            (literal!("b"), Value::from(1)),
            (
                literal!("list"),
                Value::from(vec![Value::from(10), Value::from(20)]),
            ),
        ]);
        Value::object([(literal!("a"), inner)])
    }

    #[test]
    fn roots_and_depth() {
        assert_eq!(root("a.b.c"), "a");
        assert_eq!(root("a"), "a");
        assert!(is_deep("a.b"));
        assert!(!is_deep("a"));
        assert!(is_descendant("a.b", "a.b"));
        assert!(is_descendant("a.b", "a.b.c"));
        assert!(!is_descendant("a.b", "a.bc"));
        assert!(!is_descendant("a.b", "a"));
    }

    #[test]
    fn matching() {
        // exact and ancestor
        assert!(matches("a", "a"));
        assert!(!matches("a", "a.b"));
        assert!(matches("a.b", "a"));
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "a.b.c"));
        // wildcards cover base and subtree, not peers
        assert!(matches("a.*", "a"));
        assert!(matches("a.*", "a.b"));
        assert!(matches("a.*", "a.b.c"));
        assert!(!matches("a.*", "b"));
        assert!(matches("a.b.*", "a"));
        assert!(!matches("a.b.*", "a.c"));
    }

    #[test]
    fn normalization() {
        assert_eq!(
            normalize(&[Part::Key("a.b"), Part::Index(2), Part::Key("c")]),
            "a.b.2.c"
        );
        assert_eq!(normalize(&[Part::Key("a")]), "a");
    }

    #[test]
    fn get_walks() {
        let t = tree();
        assert_eq!(get(&t, "a.b"), Some(Value::from(1)));
        assert_eq!(get(&t, "a.list.1"), Some(Value::from(20)));
        assert_eq!(get(&t, "a.list.length"), Some(Value::from(2)));
        assert_eq!(get(&t, "a.missing.x"), None);
        assert_eq!(get(&t, "a.list.7"), None);
        assert_eq!(get(&t, "a.b.c"), None);
    }

    #[test]
    fn set_walks() {
        let t = tree();
        assert_eq!(set(&t, "a.b", Value::from(2)).as_deref(), Some("a.b"));
        assert_eq!(get(&t, "a.b"), Some(Value::from(2)));
        // leaf creation is allowed, missing intermediates are not
        assert!(set(&t, "a.c", Value::from(3)).is_some());
        assert!(set(&t, "a.missing.x", Value::from(3)).is_none());
        assert_eq!(get(&t, "a.missing.x"), None);
        // arrays extend with null holes
        assert!(set(&t, "a.list.3", Value::from(30)).is_some());
        assert_eq!(get(&t, "a.list.2"), Some(Value::Null));
        assert_eq!(get(&t, "a.list.length"), Some(Value::from(4)));
        // non numeric segments against an array miss
        assert!(set(&t, "a.list.x", Value::from(1)).is_none());
    }

    fn seg() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,4}"
    }

    proptest! {
        #[test]
        fn normalize_splits_back(segs in prop::collection::vec(seg(), 1..6)) {
            let parts: Vec<Part> = segs.iter().map(|s| Part::Key(s)).collect();
            let p = normalize(&parts);
            let back: Vec<&str> = p.split('.').collect();
            prop_assert_eq!(back, segs.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        }

        #[test]
        fn translate_round_trips(
            from in seg(), to in seg(), rest in prop::collection::vec(seg(), 0..4)
        ) {
            let mut path = from.clone();
            for s in &rest {
                path.push('.');
                path.push_str(s);
            }
            let there = translate(&from, &to, &path);
            prop_assert!(is_descendant(&to, &there));
            let back = translate(&to, &from, &there);
            prop_assert_eq!(back.as_str(), path.as_str());
        }

        #[test]
        fn descendants_match_wildcards(
            base in seg(), rest in prop::collection::vec(seg(), 0..4)
        ) {
            let mut path = base.clone();
            for s in &rest {
                path.push('.');
                path.push_str(s);
            }
            let wild = format!("{base}.*");
            prop_assert!(is_descendant(&base, &path));
            prop_assert!(matches(&wild, &path));
        }
    }
}
