// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The dynamically-typed value model: a cty-style tagged union plus a
//! path-indexed mark side-channel. Every operation is a total function that
//! returns a new value; values themselves are immutable.

pub mod conformance;
pub mod marks;

use std::collections::BTreeMap;
use std::fmt;

pub use conformance::{conforms, ConformanceError};
pub use marks::{Mark, MarkTable, MarkedValue, Path, PathStep};

/// A cty-style static type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Number,
    String,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Tuple(Vec<Type>),
    Object(BTreeMap<String, Type>),
    Dynamic,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Number => write!(f, "number"),
            Type::String => write!(f, "string"),
            Type::List(t) => write!(f, "list({t})"),
            Type::Set(t) => write!(f, "set({t})"),
            Type::Map(t) => write!(f, "map({t})"),
            Type::Tuple(ts) => {
                write!(f, "tuple([")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "])")
            }
            Type::Object(attrs) => {
                write!(f, "object({{")?;
                for (i, (name, t)) in attrs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}={t}")?;
                }
                write!(f, "}})")
            }
            Type::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// A value of the dynamic type system. `Null` and `Unknown` carry the static
/// type they are a stand-in for, since "no value yet" still has a shape.
///
/// `PartialEq` is raw structural equality (including between e.g. two
/// distinct `Unknown` of the same type) — useful for tests and internal
/// bookkeeping. [`Value::equals`] is the language-level equality that
/// propagates unknown-ness instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(Type),
    Unknown(Type),
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn null(ty: Type) -> Value {
        Value::Null(ty)
    }

    pub fn unknown(ty: Type) -> Value {
        Value::Unknown(ty)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Value::Unknown(_))
    }

    /// Whether this value or anything nested within it is unknown.
    pub fn contains_unknown(&self) -> bool {
        match self {
            Value::Unknown(_) => true,
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
                items.iter().any(Value::contains_unknown)
            }
            Value::Map(items) | Value::Object(items) => {
                items.values().any(Value::contains_unknown)
            }
            _ => false,
        }
    }

    /// The static type this value conforms to, as far as it is known from
    /// the value alone (no schema needed). `Null`/`Unknown` report the type
    /// they were constructed with.
    pub fn implied_type(&self) -> Type {
        match self {
            Value::Null(t) | Value::Unknown(t) => t.clone(),
            Value::Bool(_) => Type::Bool,
            Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::List(items) => Type::List(Box::new(
                items
                    .first()
                    .map(Value::implied_type)
                    .unwrap_or(Type::Dynamic),
            )),
            Value::Set(items) => Type::Set(Box::new(
                items
                    .first()
                    .map(Value::implied_type)
                    .unwrap_or(Type::Dynamic),
            )),
            Value::Map(items) => Type::Map(Box::new(
                items
                    .values()
                    .next()
                    .map(Value::implied_type)
                    .unwrap_or(Type::Dynamic),
            )),
            Value::Tuple(items) => Type::Tuple(items.iter().map(Value::implied_type).collect()),
            Value::Object(attrs) => Type::Object(
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.implied_type()))
                    .collect(),
            ),
        }
    }

    /// Structural equality. Per the data model this is undefined when
    /// unknowns participate: the result is itself a "known unknown" boolean,
    /// modeled here as `None`.
    pub fn equals(&self, other: &Value) -> Option<bool> {
        if self.contains_unknown() || other.contains_unknown() {
            return None;
        }
        Some(values_structurally_equal(self, other))
    }
}

fn values_structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null(_), Value::Null(_)) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(a, b)| values_structurally_equal(a, b))
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|a| y.iter().any(|b| values_structurally_equal(a, b)))
        }
        (Value::Map(x), Value::Object(y)) | (Value::Object(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|v2| values_structurally_equal(v, v2)))
        }
        (Value::Map(x), Value::Map(y)) | (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|v2| values_structurally_equal(v, v2)))
        }
        _ => false,
    }
}
