//! Cache key codec.
//!
//! A cache key is a fixed five-element JSON array:
//!
//! ```text
//! ["muninn", <model>, <operation>, <args | null>, { "infinite": bool, "optimisticUpdate": bool }]
//! ```
//!
//! The first element distinguishes muninn keys from unrelated entries that
//! share the same host cache. [`parse_key`] never fails: anything that is not
//! a muninn key yields `None` and is left alone by every consumer.
//!
//! Key equality is structural. `serde_json::Map` keeps object keys sorted, so
//! the compact string form of a key is canonical and usable as a map key.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::QueryOperation;

/// Namespace prefix of every muninn cache key.
pub const QUERY_KEY_PREFIX: &str = "muninn";

/// Number of elements in an encoded key.
const KEY_LEN: usize = 5;

/// Per-query flags stored in the last key element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFlags {
    /// Paginated ("infinite") query.
    #[serde(default)]
    pub infinite: bool,
    /// Whether the query accepts optimistic updates.
    #[serde(default)]
    pub optimistic_update: bool,
}

impl Default for KeyFlags {
    fn default() -> Self {
        Self {
            infinite: false,
            optimistic_update: true,
        }
    }
}

impl KeyFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }

    pub fn optimistic_update(mut self, enabled: bool) -> Self {
        self.optimistic_update = enabled;
        self
    }

    /// Flags as they are stored: infinite queries never take optimistic updates,
    /// since paginated result shapes cannot be patched generically.
    pub fn effective(self) -> Self {
        Self {
            infinite: self.infinite,
            optimistic_update: self.optimistic_update && !self.infinite,
        }
    }
}

/// Decoded cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub model: String,
    pub operation: QueryOperation,
    /// Query arguments; `None` when the query was issued without arguments.
    pub args: Option<Value>,
    pub flags: KeyFlags,
}

impl CacheKey {
    /// Key with default flags (`infinite = false`, `optimisticUpdate = true`).
    pub fn new(
        model: impl Into<String>,
        operation: impl Into<QueryOperation>,
        args: Option<Value>,
    ) -> Self {
        Self {
            model: model.into(),
            operation: operation.into(),
            args: args.filter(|a| !a.is_null()),
            flags: KeyFlags::default(),
        }
    }

    /// Replace the flags, normalising them with [`KeyFlags::effective`].
    pub fn with_flags(mut self, flags: KeyFlags) -> Self {
        self.flags = flags.effective();
        self
    }

    /// Encode into the five-element array stored in the host cache.
    pub fn to_value(&self) -> Value {
        json!([
            QUERY_KEY_PREFIX,
            self.model,
            self.operation.as_str(),
            self.args.clone().unwrap_or(Value::Null),
            self.flags,
        ])
    }

    /// Decode a raw host-cache key. Returns `None` for anything that is not a
    /// muninn key; never panics.
    pub fn parse(candidate: &Value) -> Option<Self> {
        let parts = candidate.as_array()?;
        if parts.len() < KEY_LEN || parts[0].as_str() != Some(QUERY_KEY_PREFIX) {
            return None;
        }

        let model = parts[1].as_str()?;
        let operation = parts[2].as_str()?;
        let args = match &parts[3] {
            Value::Null => None,
            other => Some(other.clone()),
        };
        let flags = parse_flags(&parts[4]);

        Some(Self {
            model: model.to_string(),
            operation: QueryOperation::from(operation),
            args,
            flags,
        })
    }

    /// Compact string form, stable for structurally equal keys.
    pub fn canonical(key: &Value) -> String {
        key.to_string()
    }
}

/// Build the encoded key for a `(model, operation, args)` triple.
///
/// `flags` defaults to `infinite = false, optimisticUpdate = true`. An infinite
/// query always gets `optimisticUpdate = false`.
pub fn build_key(
    model: &str,
    operation: impl Into<QueryOperation>,
    args: Option<Value>,
    flags: Option<KeyFlags>,
) -> Value {
    CacheKey::new(model, operation, args)
        .with_flags(flags.unwrap_or_default())
        .to_value()
}

/// Decode a raw host-cache key. See [`CacheKey::parse`].
pub fn parse_key(candidate: &Value) -> Option<CacheKey> {
    CacheKey::parse(candidate)
}

/// Whether the raw key carries the muninn prefix and shape.
pub fn is_query_key(candidate: &Value) -> bool {
    parse_key(candidate).is_some()
}

// Missing or malformed flags mean "no optimistic updates".
fn parse_flags(value: &Value) -> KeyFlags {
    let flag = |name: &str| value.get(name).and_then(Value::as_bool).unwrap_or(false);
    KeyFlags {
        infinite: flag("infinite"),
        optimistic_update: flag("optimisticUpdate"),
    }
    .effective()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let key = build_key("User", "findMany", Some(json!({"where": {"id": "1"}})), None);
        let parts = key.as_array().unwrap();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], json!("muninn"));
        assert_eq!(parts[1], json!("User"));
        assert_eq!(parts[2], json!("findMany"));
        assert_eq!(parts[3], json!({"where": {"id": "1"}}));
        assert_eq!(parts[4], json!({"infinite": false, "optimisticUpdate": true}));
    }

    #[test]
    fn missing_args_encode_as_null() {
        let key = build_key("User", "count", None, None);
        assert_eq!(key[3], Value::Null);
        assert_eq!(parse_key(&key).unwrap().args, None);
    }

    #[test]
    fn flags_without_fields_disable_optimistic_updates() {
        let key = json!(["muninn", "User", "findMany", null, {}]);
        let parsed = parse_key(&key).unwrap();
        assert!(!parsed.flags.optimistic_update);
        assert!(!parsed.flags.infinite);
    }

    #[test]
    fn extra_trailing_elements_are_tolerated() {
        let key = json!(["muninn", "User", "findMany", null, {"optimisticUpdate": true}, "extra"]);
        assert!(parse_key(&key).is_some());
    }

    #[test]
    fn non_string_model_is_not_a_key() {
        let key = json!(["muninn", 42, "findMany", null, {}]);
        assert!(parse_key(&key).is_none());
    }

    #[test]
    fn canonical_form_ignores_object_key_order() {
        let a: Value =
            serde_json::from_str(r#"["muninn","User","findMany",{"b":1,"a":2},{}]"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"["muninn","User","findMany",{"a":2,"b":1},{}]"#).unwrap();
        assert_eq!(CacheKey::canonical(&a), CacheKey::canonical(&b));
    }
}
