// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Conformance checking: does a value match a schema-implied type, and if
//! not, which paths disagree and how.

use std::fmt;

use super::marks::{Path, PathStep};
use super::{Type, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceError {
    pub path: Path,
    pub message: String,
}

impl fmt::Display for ConformanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.0.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(root)");
        }
        for step in &self.0 {
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Verifies that `value` conforms to `ty`, returning every path-qualified
/// disagreement rather than stopping at the first one, so callers can report
/// all of them at once the way a provider-bug diagnostic should.
pub fn conforms(value: &Value, ty: &Type) -> Result<(), Vec<ConformanceError>> {
    let mut errors = Vec::new();
    check(value, ty, &Path::root(), &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check(value: &Value, ty: &Type, path: &Path, errors: &mut Vec<ConformanceError>) {
    if matches!(ty, Type::Dynamic) {
        return;
    }
    match value {
        Value::Null(_) | Value::Unknown(_) => {
            // Null and unknown conform to any type: their declared type is
            // informational, not a constraint to re-check here.
        }
        Value::Bool(_) => mismatch_unless(matches!(ty, Type::Bool), "bool", ty, path, errors),
        Value::Number(_) => mismatch_unless(matches!(ty, Type::Number), "number", ty, path, errors),
        Value::String(_) => mismatch_unless(matches!(ty, Type::String), "string", ty, path, errors),
        Value::List(items) => match ty {
            Type::List(elem) | Type::Set(elem) => {
                for (i, item) in items.iter().enumerate() {
                    check(item, elem, &path.push(PathStep::Index(i)), errors);
                }
            }
            Type::Tuple(elems) => check_tuple(items, elems, path, errors),
            _ => errors.push(mismatch(ty, "list", path)),
        },
        Value::Set(items) => match ty {
            Type::Set(elem) | Type::List(elem) => {
                for (i, item) in items.iter().enumerate() {
                    check(item, elem, &path.push(PathStep::Index(i)), errors);
                }
            }
            _ => errors.push(mismatch(ty, "set", path)),
        },
        Value::Tuple(items) => match ty {
            Type::Tuple(elems) => check_tuple(items, elems, path, errors),
            Type::List(elem) | Type::Set(elem) => {
                for (i, item) in items.iter().enumerate() {
                    check(item, elem, &path.push(PathStep::Index(i)), errors);
                }
            }
            _ => errors.push(mismatch(ty, "tuple", path)),
        },
        Value::Map(items) => match ty {
            Type::Map(elem) => {
                for (k, v) in items {
                    check(v, elem, &path.push(PathStep::Attr(k.clone())), errors);
                }
            }
            Type::Object(attrs) => check_object(items, attrs, path, errors),
            _ => errors.push(mismatch(ty, "map", path)),
        },
        Value::Object(attrs_val) => match ty {
            Type::Object(attrs) => check_object(attrs_val, attrs, path, errors),
            Type::Map(elem) => {
                for (k, v) in attrs_val {
                    check(v, elem, &path.push(PathStep::Attr(k.clone())), errors);
                }
            }
            _ => errors.push(mismatch(ty, "object", path)),
        },
    }
}

fn check_tuple(items: &[Value], elems: &[Type], path: &Path, errors: &mut Vec<ConformanceError>) {
    if items.len() != elems.len() {
        errors.push(ConformanceError {
            path: path.clone(),
            message: format!(
                "tuple has {} elements, but {} were expected",
                items.len(),
                elems.len()
            ),
        });
        return;
    }
    for (i, (item, elem_ty)) in items.iter().zip(elems).enumerate() {
        check(item, elem_ty, &path.push(PathStep::Index(i)), errors);
    }
}

fn check_object(
    attrs_val: &std::collections::BTreeMap<String, Value>,
    attrs: &std::collections::BTreeMap<String, Type>,
    path: &Path,
    errors: &mut Vec<ConformanceError>,
) {
    for (name, ty) in attrs {
        match attrs_val.get(name) {
            Some(v) => check(v, ty, &path.push(PathStep::Attr(name.clone())), errors),
            None => errors.push(ConformanceError {
                path: path.push(PathStep::Attr(name.clone())),
                message: "attribute is required".to_string(),
            }),
        }
    }
    for name in attrs_val.keys() {
        if !attrs.contains_key(name) {
            errors.push(ConformanceError {
                path: path.push(PathStep::Attr(name.clone())),
                message: "unexpected attribute".to_string(),
            });
        }
    }
}

fn mismatch_unless(
    ok: bool,
    found: &str,
    ty: &Type,
    path: &Path,
    errors: &mut Vec<ConformanceError>,
) {
    if !ok {
        errors.push(ConformanceError {
            path: path.clone(),
            message: format!("{found} value does not conform to {ty}"),
        });
    }
}

fn mismatch(ty: &Type, found: &str, path: &Path) -> ConformanceError {
    ConformanceError {
        path: path.clone(),
        message: format!("{found} value does not conform to {ty}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn conforms_accepts_matching_object() {
        let ty = Type::Object(BTreeMap::from([("name".to_string(), Type::String)]));
        let value = Value::Object(BTreeMap::from([(
            "name".to_string(),
            Value::String("x".to_string()),
        )]));
        assert!(conforms(&value, &ty).is_ok());
    }

    #[test]
    fn conforms_reports_missing_required_attribute() {
        let ty = Type::Object(BTreeMap::from([("name".to_string(), Type::String)]));
        let value = Value::Object(BTreeMap::new());
        let errors = conforms(&value, &ty).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("required"));
    }

    #[test]
    fn null_and_unknown_conform_to_anything() {
        let ty = Type::Object(BTreeMap::from([("name".to_string(), Type::String)]));
        assert!(conforms(&Value::Null(ty.clone()), &ty).is_ok());
        assert!(conforms(&Value::Unknown(ty.clone()), &ty).is_ok());
    }
}
