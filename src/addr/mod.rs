// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical addresses: module instances, resource instances, providers,
//! outputs and locals. Addresses are immutable and comparable; their
//! canonical string form round-trips (`Display`/`FromStr`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A single step of a module path: the module call name plus an optional
/// `count`/`for_each` instance key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleStep {
    pub name: String,
    pub key: InstanceKey,
}

impl fmt::Display for ModuleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module.{}{}", self.name, self.key)
    }
}

/// Ordered sequence of module calls from the root module to the module
/// instance that owns an object. The root module is the empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModulePath(pub Vec<ModuleStep>);

impl ModulePath {
    pub fn root() -> Self {
        ModulePath(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, name: impl Into<String>, key: InstanceKey) -> Self {
        let mut steps = self.0.clone();
        steps.push(ModuleStep {
            name: name.into(),
            key,
        });
        ModulePath(steps)
    }

    /// The parent module path, or `None` if this is already the root.
    pub fn parent(&self) -> Option<ModulePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(ModulePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "");
        }
        let rendered: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", rendered.join("."))
    }
}

/// An instance key from `count` (integer) or `for_each` (string), or no key
/// at all for resources/modules without repetition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum InstanceKey {
    #[default]
    None,
    Int(i64),
    String(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::None => Ok(()),
            InstanceKey::Int(i) => write!(f, "[{i}]"),
            InstanceKey::String(s) => write!(f, "[{s:?}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceMode {
    Managed,
    Data,
}

impl fmt::Display for ResourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceMode::Managed => write!(f, "resource"),
            ResourceMode::Data => write!(f, "data"),
        }
    }
}

/// A resource address without an instance key — identifies a configuration
/// position ("this resource block"), independent of `count`/`for_each`
/// expansion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigResourceAddr {
    pub module: ModulePath,
    pub mode: ResourceMode,
    pub resource_type: String,
    pub name: String,
}

impl fmt::Display for ConfigResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        if matches!(self.mode, ResourceMode::Data) {
            write!(f, "data.")?;
        }
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// A fully expanded resource instance address: a configuration resource plus
/// an instance key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceInstanceAddr {
    pub config: ConfigResourceAddr,
    pub key: InstanceKey,
}

impl ResourceInstanceAddr {
    pub fn new(config: ConfigResourceAddr, key: InstanceKey) -> Self {
        Self { config, key }
    }

    pub fn module(&self) -> &ModulePath {
        &self.config.module
    }
}

impl fmt::Display for ResourceInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.config, self.key)
    }
}

impl FromStr for ResourceInstanceAddr {
    type Err = AddrParseError;

    /// Minimal parser for the canonical `module.a[0].resource_type.name["k"]`
    /// form. Sufficient for internal round-tripping and test fixtures; the
    /// full HCL-aware parser lives in the configuration front-end, which is
    /// out of scope for this core.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut module_steps = Vec::new();
        let mut rest = s;
        loop {
            let Some(after_module) = rest.strip_prefix("module.") else {
                break;
            };
            let (name, remainder) = split_ident_and_key(after_module)?;
            let (key, remainder) = take_key(remainder)?;
            let remainder = remainder
                .strip_prefix('.')
                .ok_or(AddrParseError::Malformed)?;
            module_steps.push(ModuleStep { name, key });
            rest = remainder;
        }

        let mut mode = ResourceMode::Managed;
        if let Some(after_data) = rest.strip_prefix("data.") {
            mode = ResourceMode::Data;
            rest = after_data;
        }

        let (resource_type, rest) = split_ident_and_key(rest)?;
        let rest = rest.strip_prefix('.').ok_or(AddrParseError::Malformed)?;
        let (name, rest) = split_ident_and_key(rest)?;
        let (key, rest) = take_key(rest)?;
        if !rest.is_empty() {
            return Err(AddrParseError::Malformed);
        }

        Ok(ResourceInstanceAddr {
            config: ConfigResourceAddr {
                module: ModulePath(module_steps),
                mode,
                resource_type,
                name,
            },
            key,
        })
    }
}

fn split_ident_and_key(s: &str) -> Result<(String, &str), AddrParseError> {
    let end = s
        .find(|c: char| c == '.' || c == '[')
        .unwrap_or(s.len());
    if end == 0 {
        return Err(AddrParseError::Malformed);
    }
    Ok((s[..end].to_string(), &s[end..]))
}

fn take_key(s: &str) -> Result<(InstanceKey, &str), AddrParseError> {
    if let Some(rest) = s.strip_prefix('[') {
        let close = rest.find(']').ok_or(AddrParseError::Malformed)?;
        let inner = &rest[..close];
        let key = if let Some(stripped) = inner.strip_prefix('"').and_then(|i| i.strip_suffix('"'))
        {
            InstanceKey::String(stripped.to_string())
        } else {
            InstanceKey::Int(inner.parse().map_err(|_| AddrParseError::Malformed)?)
        };
        Ok((key, &rest[close + 1..]))
    } else {
        Ok((InstanceKey::None, s))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("malformed address")]
    Malformed,
}

/// Fully-qualified provider type: `hostname/namespace/type`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderSource {
    pub hostname: String,
    pub namespace: String,
    pub type_name: String,
}

impl fmt::Display for ProviderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_name)
    }
}

/// Address of a (possibly aliased, possibly per-instance) provider
/// configuration. Two addresses are equal iff all components match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderAddr {
    pub source: ProviderSource,
    pub module: ModulePath,
    pub alias: Option<String>,
    pub key: InstanceKey,
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "provider[\"{}\"]", self.source)?;
        if let Some(alias) = &self.alias {
            write!(f, ".{alias}")?;
        }
        write!(f, "{}", self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputAddr {
    pub module: ModulePath,
    pub name: String,
}

impl fmt::Display for OutputAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "output.{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalAddr {
    pub module: ModulePath,
    pub name: String,
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "local.{}", self.name)
    }
}

/// An opaque key identifying one deposed object among possibly several for
/// the same resource instance. Generated fresh whenever create-before-destroy
/// deposes a current object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeposedKey(pub String);

impl DeposedKey {
    /// Generates a fresh opaque key using `rand`, for in-memory bookkeeping
    /// where the identifier never needs to be cryptographically unguessable.
    pub fn new_random() -> Self {
        use rand::Rng;
        let bytes: [u8; 8] = rand::thread_rng().gen();
        DeposedKey(hex_encode(&bytes))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl fmt::Display for DeposedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which generation of a resource instance object a change or query targets:
/// the current object, or one specific deposed object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Generation {
    Current,
    Deposed(DeposedKey),
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Current => write!(f, "current"),
            Generation::Deposed(key) => write!(f, "deposed({key})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_resource_addr() {
        let addr = ResourceInstanceAddr {
            config: ConfigResourceAddr {
                module: ModulePath::root(),
                mode: ResourceMode::Managed,
                resource_type: "test_instance".to_string(),
                name: "foo".to_string(),
            },
            key: InstanceKey::None,
        };
        let rendered = addr.to_string();
        assert_eq!(rendered, "test_instance.foo");
        let parsed: ResourceInstanceAddr = rendered.parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn round_trips_module_instance_with_string_key() {
        let addr = ResourceInstanceAddr {
            config: ConfigResourceAddr {
                module: ModulePath::root().child("boop", InstanceKey::Int(1)),
                mode: ResourceMode::Data,
                resource_type: "http".to_string(),
                name: "check".to_string(),
            },
            key: InstanceKey::String("east".to_string()),
        };
        let rendered = addr.to_string();
        assert_eq!(rendered, r#"module.boop[1].data.http.check["east"]"#);
        let parsed: ResourceInstanceAddr = rendered.parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn module_parent_of_root_is_none() {
        assert!(ModulePath::root().parent().is_none());
    }
}
