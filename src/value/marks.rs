// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Marks: path-tagged annotations (sensitive, deprecated) that survive
//! derivations but never live inside the value's type itself. Kept as a
//! side-channel table from path to mark set, so metadata rides alongside
//! the domain value rather than inside it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::Value;

/// One step into a value: a collection index or an object/map attribute
/// name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathStep {
    Index(usize),
    Attr(String),
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Index(i) => write!(f, "[{i}]"),
            PathStep::Attr(name) => write!(f, ".{name}"),
        }
    }
}

/// A path from the root of a value down to a nested element. The empty path
/// refers to the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(pub Vec<PathStep>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn push(&self, step: PathStep) -> Path {
        let mut steps = self.0.clone();
        steps.push(step);
        Path(steps)
    }

    /// Whether `self` is `other`, or a path below it (used to decide whether
    /// a mark at `other` should apply to a value read from `self`).
    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mark {
    Sensitive,
    Deprecated,
}

pub type MarkSet = BTreeSet<Mark>;

/// Marks attached at specific paths within a value.
pub type MarkTable = BTreeMap<Path, MarkSet>;

/// A value together with the marks attached to it and its descendants.
#[derive(Debug, Clone)]
pub struct MarkedValue {
    pub value: Value,
    pub marks: MarkTable,
}

impl MarkedValue {
    pub fn unmarked(value: Value) -> Self {
        MarkedValue {
            value,
            marks: MarkTable::new(),
        }
    }

    /// Splits this value into its bare `Value` and the table of marks that
    /// applied to it, per path. Inverse of [`MarkedValue::mark_with_paths`].
    pub fn unmark_deep(self) -> (Value, MarkTable) {
        (self.value, self.marks)
    }

    /// Reattaches a mark table to a bare value.
    pub fn mark_with_paths(value: Value, marks: MarkTable) -> MarkedValue {
        MarkedValue { value, marks }
    }

    pub fn contains_marked(&self) -> bool {
        self.marks.values().any(|set| !set.is_empty())
    }

    pub fn has_mark_at(&self, path: &Path, mark: Mark) -> bool {
        self.marks
            .iter()
            .any(|(p, set)| path.starts_with(p) && set.contains(&mark))
    }

    pub fn is_sensitive(&self) -> bool {
        self.marks
            .values()
            .any(|set| set.contains(&Mark::Sensitive))
    }

    /// Unions another value's marks into this one, as happens when two
    /// values are combined by an operation (e.g. a merge or a function
    /// call): marks accumulate, they never get dropped silently.
    pub fn union_marks(&mut self, other: &MarkTable) {
        for (path, marks) in other {
            self.marks.entry(path.clone()).or_default().extend(marks);
        }
    }

    /// Marks required at the crate/provider boundary: sensitive marks on
    /// values that would be serialized to a plugin raise an error instead of
    /// being silently stripped; deprecated marks are preserved and
    /// re-reported. This models "strip before the call, re-apply from the
    /// caller's original marks unioned with the schema's declared marks."
    pub fn marks_for_provider_boundary(&self) -> Result<(), Path> {
        for (path, set) in &self.marks {
            if set.contains(&Mark::Sensitive) {
                return Err(path.clone());
            }
        }
        Ok(())
    }
}
