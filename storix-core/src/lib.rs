//! Core building blocks of the storix reactive store.
//!
//! This crate holds the pieces with no runtime state of their own, the
//! dynamic [value::Value] model, the dotted [path] engine, and the
//! method signature [expr] parser. The store itself, effect registry,
//! and the batched change pipeline live in storix-rt.

pub mod expr;
pub mod path;
pub mod value;

pub use expr::{Arg, Literal, MalformedExpression, PathArg, Signature};
pub use value::{Object, Value};
