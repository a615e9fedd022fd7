// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Reference parsing: turns a dotted reference string into a structured
//! [`Reference`]. The full HCL-aware traversal parser lives in the
//! configuration front-end (out of scope); this parser covers the reference
//! forms the evaluator itself needs to resolve (§4.4).

use std::str::FromStr;

use crate::addr::{ConfigResourceAddr, ModulePath, OutputAddr, ResourceInstanceAddr};
use crate::error::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Module,
    Root,
    Cwd,
}

/// Whether a resource reference names a repeated (count/for_each) resource
/// block or a singly-declared one — determines whether resolving it without
/// an instance key yields a collection or a single value (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionMode {
    Single,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Count,
    Each,
    Var(String),
    Local(String),
    Path(PathKind),
    Workspace,
    /// A reference to this module's own output (rare outside check blocks).
    Output(OutputAddr),
    /// A reference to a child module instance's output: `module.x[.y].name`.
    ModuleOutput(OutputAddr),
    ResourceCollection(ConfigResourceAddr, RepetitionMode),
    ResourceInstance(ResourceInstanceAddr),
}

/// Parses a reference string as it would appear in configuration, relative
/// to `module`. `repetition` supplies, for resource references without an
/// explicit instance key, whether the target resource block uses
/// `count`/`for_each` — information that in a full implementation comes from
/// the configuration tree, an external collaborator here.
pub fn parse_reference(
    raw: &str,
    module: &ModulePath,
    repetition: impl Fn(&ConfigResourceAddr) -> RepetitionMode,
) -> Result<Reference, EvalError> {
    let raw = raw.trim();
    if raw == "count.index" {
        return Ok(Reference::Count);
    }
    if raw == "each.key" || raw == "each.value" {
        return Ok(Reference::Each);
    }
    if raw == "terraform.workspace" {
        return Ok(Reference::Workspace);
    }
    if let Some(name) = raw.strip_prefix("path.") {
        let kind = match name {
            "module" => PathKind::Module,
            "root" => PathKind::Root,
            "cwd" => PathKind::Cwd,
            other => {
                return Err(EvalError::UnparsableReference(format!("path.{other}")));
            }
        };
        return Ok(Reference::Path(kind));
    }
    if let Some(name) = raw.strip_prefix("var.") {
        return Ok(Reference::Var(name.to_string()));
    }
    if let Some(name) = raw.strip_prefix("local.") {
        return Ok(Reference::Local(name.to_string()));
    }
    if let Some(name) = raw.strip_prefix("output.") {
        return Ok(Reference::Output(OutputAddr {
            module: module.clone(),
            name: name.to_string(),
        }));
    }

    // `module.NAME[key]. ...` is ambiguous between "a resource living inside
    // that module instance" (remainder has a dot: `type.name`) and
    // "that module instance's own output" (remainder is a bare identifier).
    // Walk the module-step prefix off first so both forms share one parser.
    if raw.starts_with("module.") {
        let (child_module, remainder) = consume_module_steps(raw, module)?;
        if !remainder.contains('.') {
            return Ok(Reference::ModuleOutput(OutputAddr {
                module: child_module,
                name: remainder.to_string(),
            }));
        }
        if let Ok(addr) = ResourceInstanceAddr::from_str(raw) {
            if raw_has_explicit_key(remainder) {
                return Ok(Reference::ResourceInstance(addr));
            }
            let mode = repetition(&addr.config);
            return Ok(Reference::ResourceCollection(addr.config, mode));
        }
        return Err(EvalError::UnparsableReference(raw.to_string()));
    }

    // Otherwise this must be a resource (or resource instance) reference in
    // the current module. Try the full instance form first
    // ("type.name[key]"), then fall back to the bare configuration-resource
    // form ("type.name").
    let qualified = if module.is_root() {
        raw.to_string()
    } else {
        format!("{module}.{raw}")
    };
    if let Ok(addr) = ResourceInstanceAddr::from_str(&qualified) {
        if matches!(addr.key, crate::addr::InstanceKey::None) && raw_has_explicit_key(raw) {
            return Ok(Reference::ResourceInstance(addr));
        }
        if raw_has_explicit_key(raw) {
            return Ok(Reference::ResourceInstance(addr));
        }
        let mode = repetition(&addr.config);
        return Ok(Reference::ResourceCollection(addr.config, mode));
    }

    Err(EvalError::UnparsableReference(raw.to_string()))
}

fn raw_has_explicit_key(raw: &str) -> bool {
    raw.contains('[')
}

/// Consumes one or more `module.NAME[key].` prefixes from `raw`, relative to
/// `current`, returning the resulting child module path and whatever string
/// remains after the last module step.
fn consume_module_steps<'a>(
    raw: &'a str,
    current: &ModulePath,
) -> Result<(ModulePath, &'a str), EvalError> {
    let mut module = current.clone();
    let mut rest = raw;
    loop {
        let Some(after_module) = rest.strip_prefix("module.") else {
            break;
        };
        let end = after_module
            .find(|c: char| c == '.' || c == '[')
            .ok_or_else(|| EvalError::UnparsableReference(raw.to_string()))?;
        let name = &after_module[..end];
        let mut remainder = &after_module[end..];
        let key = if let Some(bracketed) = remainder.strip_prefix('[') {
            let close = bracketed
                .find(']')
                .ok_or_else(|| EvalError::UnparsableReference(raw.to_string()))?;
            let inner = &bracketed[..close];
            remainder = &bracketed[close + 1..];
            if let Some(quoted) = inner.strip_prefix('"').and_then(|i| i.strip_suffix('"')) {
                crate::addr::InstanceKey::String(quoted.to_string())
            } else {
                crate::addr::InstanceKey::Int(
                    inner
                        .parse()
                        .map_err(|_| EvalError::UnparsableReference(raw.to_string()))?,
                )
            }
        } else {
            crate::addr::InstanceKey::None
        };
        module = module.child(name, key);
        rest = remainder
            .strip_prefix('.')
            .ok_or_else(|| EvalError::UnparsableReference(raw.to_string()))?;
    }
    Ok((module, rest))
}
