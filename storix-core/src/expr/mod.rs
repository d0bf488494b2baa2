//! Method signature expressions.
//!
//! A computed property or method observer is declared by an expression
//! like `_computeFullName(firstName, address.city, 'sep', 3)`. Parsing
//! produces a [Signature] describing how to marshal live data into the
//! call, argument paths become dependencies of the effect.

use crate::{path, value::Value};
use anyhow::{Result, bail};
use arcstr::ArcStr;
use compact_str::CompactString;
use std::fmt;
use triomphe::Arc;

pub mod parser;

/// The expression could not be parsed. Raised at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedExpression(pub ArcStr);

impl fmt::Display for MalformedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed method expression {:?}", self.0)
    }
}

impl std::error::Error for MalformedExpression {}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(ArcStr),
    Num(f64),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Num(n) => Value::F64(*n),
        }
    }
}

/// A non literal argument referencing a path in the data tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathArg {
    /// the referenced path, wildcard suffix removed
    pub name: ArcStr,
    /// the property the path is rooted at
    pub root: ArcStr,
    /// the argument is a deep path
    pub structured: bool,
    /// the argument ended in `.*` and is delivered as a
    /// `{path, value, base}` object at call time
    pub wildcard: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(Literal),
    Path(PathArg),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub method: ArcStr,
    pub args: Arc<[Arg]>,
    /// every argument is a literal
    pub static_fn: bool,
}

fn unescape(s: &str) -> CompactString {
    let mut out = CompactString::default();
    let mut it = s.chars();
    while let Some(c) = it.next() {
        if c == '\\' {
            if let Some(c) = it.next() {
                out.push(c)
            }
        } else {
            out.push(c)
        }
    }
    out
}

fn classify(raw: &str) -> Result<Arg> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("empty argument")
    }
    let arg = unescape(trimmed);
    let mut it = arg.chars();
    let first = match it.next() {
        Some(c) => c,
        None => bail!("empty argument"),
    };
    let probe = if first == '-' { it.next() } else { Some(first) };
    if probe.map(|c| c.is_ascii_digit()).unwrap_or(false) {
        return Ok(Arg::Literal(Literal::Num(arg.parse().unwrap_or(f64::NAN))));
    }
    if first == '\'' || first == '"' {
        let rest = &arg[first.len_utf8()..];
        let inner = match rest.char_indices().last() {
            Some((i, _)) => &rest[..i],
            None => "",
        };
        return Ok(Arg::Literal(Literal::Str(ArcStr::from(inner))));
    }
    let structured = path::is_deep(&arg);
    let (name, wildcard) = match path::strip_wildcard(&arg) {
        Some(base) => (base, true),
        None => (arg.as_str(), false),
    };
    Ok(Arg::Path(PathArg {
        name: ArcStr::from(name),
        root: ArcStr::from(path::root(&arg)),
        structured,
        wildcard,
    }))
}

/// Parse a method signature expression.
pub fn parse(s: &str) -> Result<Signature> {
    let malformed = || anyhow::Error::new(MalformedExpression(ArcStr::from(s)));
    let (method, raw_args) = match parser::parse_signature(s) {
        Ok(r) => r,
        Err(e) => return Err(malformed().context(format!("{e}"))),
    };
    let mut args = Vec::with_capacity(raw_args.len());
    // a lone whitespace argument list is an empty one
    if !(raw_args.len() == 1 && raw_args[0].trim().is_empty()) {
        for raw in &raw_args {
            match classify(raw) {
                Ok(a) => args.push(a),
                Err(e) => return Err(malformed().context(format!("{e}"))),
            }
        }
    }
    let static_fn = args.iter().all(|a| matches!(a, Arg::Literal(_)));
    Ok(Signature { method, args: Arc::from(args), static_fn })
}
