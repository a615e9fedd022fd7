// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The provider registry and plugin contract (§4.5, §6). Providers are
//! reached through a trait object so the concrete plugin transport (RPC wire
//! format) stays an external collaborator's concern: a thin async trait
//! split from whatever mechanism actually talks to the backing
//! implementation.

pub mod functions;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::addr::{InstanceKey, ProviderAddr};
use crate::diagnostics::Diagnostics;
use crate::error::ProviderError;
use crate::schema::{Block, ProviderSchemas};
use crate::value::{MarkedValue, Value};
pub use functions::{FunctionBridge, FunctionSpec};

/// An error surfaced by `CallFunction`, preserving the offending argument
/// index the way an "argument error" must for the function bridge to map it
/// back to a function-parameter diagnostic (§4.5, §8).
#[derive(Debug, Clone)]
pub struct FunctionCallError {
    pub argument_index: Option<usize>,
    pub message: String,
}

impl fmt::Display for FunctionCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub struct ReadResourceResult {
    pub new_state: Value,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

pub struct PlanResourceChangeResult {
    pub planned_state: Value,
    pub planned_private: Vec<u8>,
    pub requires_replace: Vec<crate::value::Path>,
    pub legacy_type_system: bool,
    pub diagnostics: Diagnostics,
}

pub struct ApplyResourceChangeResult {
    pub new_state: Value,
    pub private: Vec<u8>,
    pub legacy_type_system: bool,
    pub diagnostics: Diagnostics,
}

pub struct ReadDataSourceResult {
    pub state: Value,
    pub diagnostics: Diagnostics,
}

/// The plugin contract every provider implements (§6). Out-of-process
/// dispatch (the RPC wire format) lives behind this trait, outside the scope
/// of this core.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn get_provider_schema(&self) -> Result<ProviderSchemas, ProviderError>;

    async fn get_functions(&self) -> Result<BTreeMap<String, FunctionSpec>, ProviderError>;

    async fn configure_provider(&self, config: MarkedValue) -> Result<Diagnostics, ProviderError>;

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Diagnostics, ProviderError>;

    async fn validate_data_resource_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Diagnostics, ProviderError>;

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        raw: Vec<u8>,
        version: u64,
    ) -> Result<Value, ProviderError>;

    async fn read_resource(
        &self,
        resource_type: &str,
        prior_state: Value,
        private: Vec<u8>,
        provider_meta: Option<Value>,
    ) -> Result<ReadResourceResult, ProviderError>;

    async fn plan_resource_change(
        &self,
        resource_type: &str,
        config: Value,
        prior_state: Value,
        proposed_new_state: Value,
        prior_private: Vec<u8>,
        provider_meta: Option<Value>,
    ) -> Result<PlanResourceChangeResult, ProviderError>;

    async fn apply_resource_change(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
        planned_state: Value,
        planned_private: Vec<u8>,
        provider_meta: Option<Value>,
    ) -> Result<ApplyResourceChangeResult, ProviderError>;

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
        provider_meta: Option<Value>,
    ) -> Result<ReadDataSourceResult, ProviderError>;

    async fn call_function(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, FunctionCallError>;

    /// Best-effort cooperative cancellation of any in-flight RPC. Legacy
    /// providers that predate a context-aware interface simply ignore this:
    /// the engine passes a cancellation signal unconditionally, and legacy
    /// providers are allowed to no-op it.
    async fn stop(&self) -> Result<(), ProviderError>;

    async fn close(&self) -> Result<(), ProviderError>;

    /// Whether this provider advertises the legacy SDK type system, under
    /// which several conformance errors are downgraded to warnings (§4.6,
    /// §7).
    fn legacy_type_system(&self) -> bool {
        false
    }
}

/// Provider configuration block, re-exported for callers building a factory.
pub type ProviderConfigSchema = Block;

/// Constructs a provider instance on demand: the registry never constructs
/// a provider itself, it only calls through this trait.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn new_instance(&self) -> Result<Arc<dyn Provider>, ProviderError>;
}

type CachedProvider = Arc<OnceCell<Result<Arc<dyn Provider>, Arc<ProviderError>>>>;

/// A shared `(provider-address, instance-key) -> provider` map with
/// at-most-once construction per key, even across concurrent first-requests
/// (§4.5, §8 "At-most-once provider init").
#[derive(Default)]
pub struct ProviderRegistry {
    cache: DashMap<(ProviderAddr, InstanceKey), CachedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the cached provider for `(addr, key)`, invoking `factory`
    /// exactly once per key for the lifetime of this registry — even if the
    /// factory previously failed, the failure itself is cached so a busy
    /// walk doesn't retry-storm a provider that's already known to be
    /// broken.
    pub async fn get_or_init(
        &self,
        addr: ProviderAddr,
        key: InstanceKey,
        factory: &dyn ProviderFactory,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let cell = self
            .cache
            .entry((addr.clone(), key))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let result = cell
            .get_or_init(|| async {
                factory
                    .new_instance()
                    .await
                    .map_err(Arc::new)
            })
            .await;
        result
            .clone()
            .map_err(|e| ProviderError::FactoryFailed(addr, e.to_string()))
    }

    /// Closes every provider that was actually constructed during this
    /// walk. Construction failures have nothing to close.
    pub async fn close_all(&self) {
        for entry in self.cache.iter() {
            if let Some(Ok(provider)) = entry.value().get() {
                if let Err(err) = provider.close().await {
                    tracing::warn!(provider = %entry.key().0, error = %err, "provider close failed");
                }
            }
        }
    }

    /// Issues `Stop` to every provider that has been constructed so far, for
    /// the cancellation watcher (§4.7 step 3).
    pub async fn stop_all(&self) {
        for entry in self.cache.iter() {
            if let Some(Ok(provider)) = entry.value().get() {
                if let Err(err) = provider.stop().await {
                    tracing::warn!(provider = %entry.key().0, error = %err, "provider stop failed");
                }
            }
        }
    }

    pub fn constructed_count(&self) -> usize {
        self.cache
            .iter()
            .filter(|e| matches!(e.value().get(), Some(Ok(_))))
            .count()
    }
}
