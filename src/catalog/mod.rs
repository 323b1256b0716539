// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider catalog
//!
//! Static descriptors for every known backend: capabilities, parameter ranges
//! and model lists. Pure data; resolution logic lives in `chat::context`.
//!
//! ```rust,ignore
//! use palaver::catalog::{ProviderCatalog, ProviderKind};
//!
//! let catalog = ProviderCatalog::builtin();
//! let anthropic = catalog.get(ProviderKind::Anthropic);
//! println!("{} models", anthropic.models.len());
//! ```

pub mod builtin;
pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

pub use schema::{ModelDescriptor, NumberRange, ProviderDescriptor, ProviderKind, WireFormat};

/// Every provider descriptor, indexed by kind.
///
/// Descriptors are shared behind `Arc` so resolved contexts can hold them
/// without copying the model lists.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: HashMap<ProviderKind, Arc<ProviderDescriptor>>,
}

impl ProviderCatalog {
    /// Catalog with the built-in descriptor for every `ProviderKind`.
    pub fn builtin() -> Self {
        let providers = ProviderKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(builtin::descriptor(*kind))))
            .collect();
        Self { providers }
    }

    /// Replace the descriptor for `provider.kind`.
    pub fn with_provider(mut self, provider: ProviderDescriptor) -> Self {
        self.providers.insert(provider.kind, Arc::new(provider));
        self
    }

    /// Descriptor for `kind`. Every kind is always present.
    pub fn get(&self, kind: ProviderKind) -> Arc<ProviderDescriptor> {
        match self.providers.get(&kind) {
            Some(provider) => Arc::clone(provider),
            None => Arc::new(builtin::descriptor(kind)),
        }
    }

    /// Descriptors in `ProviderKind::ALL` order.
    pub fn providers(&self) -> Vec<Arc<ProviderDescriptor>> {
        ProviderKind::ALL.iter().map(|kind| self.get(*kind)).collect()
    }

    /// Find which provider lists a model with this wire name.
    pub fn find_model(&self, name: &str) -> Option<(ProviderKind, ModelDescriptor)> {
        ProviderKind::ALL.iter().find_map(|kind| {
            self.providers
                .get(kind)
                .and_then(|p| p.model(name))
                .map(|m| (*kind, m.clone()))
        })
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
