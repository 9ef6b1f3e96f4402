//! Deterministic cache keys.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::DEFAULT_CACHE_VERSION;
use crate::jobs::Metadata;

/// Number of hex characters of the parameter digest kept in the key.
const PARAM_HASH_LEN: usize = 8;

/// Identity of one generation: template, style profile, parameters, model
/// and schema version.
///
/// Two keys whose parameter maps hold the same pairs render to the same
/// string no matter the insertion order.
///
/// ```rust
/// use huginn::cache::CacheKey;
/// use serde_json::json;
///
/// let params = json!({"tone": "formal", "length": 500});
/// let key = CacheKey::new("blog", "concise", params.as_object().unwrap().clone(), "gpt-4");
/// assert_eq!(key.to_string(), "content:v1:blog:concise:gpt-4:d0d94eb4");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub template_id: String,
    pub style_profile: String,
    pub parameters: Metadata,
    pub model_name: String,
    pub version: String,
}

impl CacheKey {
    pub fn new(
        template_id: impl Into<String>,
        style_profile: impl Into<String>,
        parameters: Metadata,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            style_profile: style_profile.into(),
            parameters,
            model_name: model_name.into(),
            version: DEFAULT_CACHE_VERSION.to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// First 8 hex chars of SHA-256 over the canonical parameter JSON.
    pub fn param_hash(&self) -> String {
        let canonical = canonical_json(&Value::Object(self.parameters.clone()));
        let digest = Sha256::digest(canonical.as_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(PARAM_HASH_LEN);
        hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "content:{}:{}:{}:{}:{}",
            self.version,
            self.template_id,
            self.style_profile,
            self.model_name,
            self.param_hash()
        )
    }
}

/// Compact JSON with object keys sorted at every depth.
///
/// Scalars use serde_json's own formatting; only object key order is
/// normalized, so the output does not depend on whether the map type
/// preserves insertion order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
