// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! A `Scope` binds reference resolution to one evaluation site: a module
//! instance, optionally a `self` resource instance, and the `count`/`each`
//! bindings active at that site (§4.4).

use crate::addr::{ModulePath, ResourceInstanceAddr};
use crate::value::{MarkedValue, Value};

#[derive(Debug, Clone)]
pub enum RepetitionBinding {
    None,
    Count(i64),
    Each { key: String, value: MarkedValue },
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub module: ModulePath,
    pub self_addr: Option<ResourceInstanceAddr>,
    pub repetition: RepetitionBinding,
}

impl Scope {
    pub fn for_module(module: ModulePath) -> Self {
        Scope {
            module,
            self_addr: None,
            repetition: RepetitionBinding::None,
        }
    }

    pub fn for_resource_instance(addr: ResourceInstanceAddr, repetition: RepetitionBinding) -> Self {
        Scope {
            module: addr.module().clone(),
            self_addr: Some(addr),
            repetition,
        }
    }

    pub fn count_index(&self) -> Option<Value> {
        match &self.repetition {
            RepetitionBinding::Count(i) => Some(Value::Number(*i as f64)),
            _ => None,
        }
    }

    pub fn each_key(&self) -> Option<Value> {
        match &self.repetition {
            RepetitionBinding::Each { key, .. } => Some(Value::String(key.clone())),
            _ => None,
        }
    }

    pub fn each_value(&self) -> Option<MarkedValue> {
        match &self.repetition {
            RepetitionBinding::Each { value, .. } => Some(value.clone()),
            _ => None,
        }
    }
}
