// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Resource/provider schemas: nested attribute/block structures with type
//! constraints, computed/optional/required flags, and sensitivity. Immutable
//! once fetched from a provider and cached per provider (§4.5).

use std::collections::BTreeMap;

use crate::value::Type;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSchema {
    pub ty: Type,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    pub description: String,
}

impl AttributeSchema {
    pub fn required(ty: Type) -> Self {
        AttributeSchema {
            ty,
            required: true,
            optional: false,
            computed: false,
            sensitive: false,
            description: String::new(),
        }
    }

    pub fn optional(ty: Type) -> Self {
        AttributeSchema {
            ty,
            required: false,
            optional: true,
            computed: false,
            sensitive: false,
            description: String::new(),
        }
    }

    pub fn computed(ty: Type) -> Self {
        AttributeSchema {
            ty,
            required: false,
            optional: false,
            computed: true,
            sensitive: false,
            description: String::new(),
        }
    }

    pub fn optional_computed(ty: Type) -> Self {
        AttributeSchema {
            ty,
            required: false,
            optional: true,
            computed: true,
            sensitive: false,
            description: String::new(),
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// An attribute is only ever computed by the provider (never set by the
    /// user) when it is `computed` but not `optional`.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingMode {
    Single,
    List,
    Set,
    Map,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedBlockSchema {
    pub nesting: NestingMode,
    pub block: Block,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub block_types: BTreeMap<String, NestedBlockSchema>,
}

impl Block {
    /// The type this block implies: an object type with one field per
    /// attribute, and one field per nested block type (wrapped according to
    /// its nesting mode).
    pub fn implied_type(&self) -> Type {
        let mut fields: BTreeMap<String, Type> = self
            .attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.ty.clone()))
            .collect();
        for (name, nested) in &self.block_types {
            let inner = nested.block.implied_type();
            let ty = match nested.nesting {
                NestingMode::Single | NestingMode::Group => inner,
                NestingMode::List => Type::List(Box::new(inner)),
                NestingMode::Set => Type::Set(Box::new(inner)),
                NestingMode::Map => Type::Map(Box::new(inner)),
            };
            fields.insert(name.clone(), ty);
        }
        Type::Object(fields)
    }

    /// Every attribute path (as dotted names) that is `computed` and not
    /// `optional` — used by `ignore_changes = "all"` to decide which
    /// attributes must be reverted to the prior value unconditionally.
    pub fn computed_only_attribute_names(&self) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|(_, attr)| attr.is_computed_only())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub block: Block,
    pub version: u64,
}

impl Schema {
    pub fn implied_type(&self) -> Type {
        self.block.implied_type()
    }
}

/// The set of schemas a provider declares: one per managed resource type,
/// one per data source, the provider's own configuration block, and
/// provisioners it bundles.
#[derive(Debug, Clone, Default)]
pub struct ProviderSchemas {
    pub provider_config: Block,
    pub resource_types: BTreeMap<String, Schema>,
    pub data_sources: BTreeMap<String, Schema>,
    pub provider_meta: Option<Block>,
}
