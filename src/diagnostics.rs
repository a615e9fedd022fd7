// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostics are data, not control flow: unlike a `CoreError`, a
//! diagnostic rides alongside a successful or partially-successful result so
//! that unrelated graph branches can keep making progress (§7 partial
//! failure semantics).

use std::fmt;

use crate::addr::ResourceInstanceAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A source range in the configuration, when the diagnostic can be
/// attributed to one. Parsing and positions are owned by the (out of scope)
/// configuration front-end; this core only carries the range through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub filename: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Typed extra payload distinguishing *why* a diagnostic fired, so callers
/// can filter (e.g. hide sensitive-caused diagnostics from plain-text logs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticExtra {
    pub sensitive_cause: bool,
    pub unknown_cause: bool,
    pub check_rule: Option<ResourceInstanceAddr>,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub source_range: Option<SourceRange>,
    pub extra: DiagnosticExtra,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            source_range: None,
            extra: DiagnosticExtra::default(),
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            source_range: None,
            extra: DiagnosticExtra::default(),
        }
    }

    pub fn with_extra(mut self, extra: DiagnosticExtra) -> Self {
        self.extra = extra;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        write!(f, "{level}: {}: {}", self.summary, self.detail)
    }
}

/// An accumulator of diagnostics produced over a walk; shared by reference
/// and extended from any worker (mirrors the append-only nature of the
/// teacher's metrics counters being updated from any block-processing task).
#[derive(Debug, Default, Clone)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics(Vec::new())
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }
}
