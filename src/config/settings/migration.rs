// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use serde_json::Value;

use crate::catalog::ProviderKind;

/// Rewrite older settings layouts into the current one.
///
/// Earlier files stored provider ids in lowercase (`"openai"`); the current
/// format uses the canonical id (`"OpenAI"`). Unknown ids are left alone so
/// deserialization reports them.
pub(super) fn migrate_on_load(mut value: Value) -> Value {
    if let Some(provider) = value.pointer_mut("/defaults/provider") {
        if let Some(raw) = provider.as_str() {
            if let Ok(kind) = raw.parse::<ProviderKind>() {
                *provider = Value::String(kind.as_str().to_string());
            }
        }
    }

    if let Some(Value::Object(providers)) = value.get_mut("providers") {
        let keys: Vec<String> = providers.keys().cloned().collect();
        for key in keys {
            let lowered = key.to_lowercase();
            if lowered != key && !providers.contains_key(&lowered) {
                if let Some(entry) = providers.remove(&key) {
                    providers.insert(lowered, entry);
                }
            }
        }
    }

    value
}

/// Deep-merge two JSON values.
/// `base` is existing file content, `overlay` is serialized current struct.
/// Overlay values take priority.
pub(super) fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = if let Some(base_val) = base_map.remove(&key) {
                    deep_merge(base_val, overlay_val)
                } else {
                    overlay_val
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_base, overlay) => overlay,
    }
}
