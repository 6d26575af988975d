//! Content-addressed result cache keys and backends.
//!
//! A key is the SHA-256 of the operation type, the sorted input references,
//! and the config serialized with every object's keys in sorted order. Input
//! permutations and config field order therefore collapse to one key.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use cf_core::{Error, OperationType, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compute the key of `op_type` applied to `inputs` with `config`.
    pub fn compute(op_type: OperationType, inputs: &[String], config: &serde_json::Value) -> Self {
        let mut sorted: Vec<&str> = inputs.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(op_type.as_str().as_bytes());
        hasher.update([0u8]);
        for input in sorted {
            // Length prefix keeps ["ab", "c"] and ["a", "bc"] apart.
            hasher.update((input.len() as u64).to_be_bytes());
            hasher.update(input.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(canonical_json(config).as_bytes());

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize `value` as compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", serde_json::Value::String(key.clone()));
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// The recorded outcome of a cached step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResult {
    pub output_files: Vec<String>,
}

/// Shared memo of step outputs.
///
/// Writes are idempotent overwrites: the same key always maps to the same
/// computation, so concurrent writers need no coordination.
pub trait ResultCache: Send + Sync {
    /// A live entry for `key`, if any.
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>>;

    /// Record the outputs of `op_type` under `key`.
    fn put(&self, key: &CacheKey, op_type: OperationType, outputs: &[String]) -> Result<()>;

    /// Forget `key`.
    fn invalidate(&self, key: &CacheKey) -> Result<()>;
}

/// In-process [`ResultCache`] with a fixed TTL.
#[derive(Debug)]
pub struct MemoryResultCache {
    entries: DashMap<CacheKey, (CachedResult, Instant)>,
    ttl: Duration,
}

impl MemoryResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| *expires > Instant::now());
        before - self.entries.len()
    }
}

impl ResultCache for MemoryResultCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.value().1 <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value().0.clone()))
    }

    fn put(&self, key: &CacheKey, _op_type: OperationType, outputs: &[String]) -> Result<()> {
        let expires = Instant::now().checked_add(self.ttl).ok_or_else(|| {
            Error::Validation(format!("cache ttl of {}s is out of range", self.ttl.as_secs()))
        })?;
        let result = CachedResult {
            output_files: outputs.to_vec(),
        };
        self.entries.insert(key.clone(), (result, expires));
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn refs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn input_order_does_not_matter() {
        let cfg = json!({"text": "hi"});
        assert_eq!(
            CacheKey::compute(OperationType::Join, &refs(&["3", "1", "2"]), &cfg),
            CacheKey::compute(OperationType::Join, &refs(&["1", "2", "3"]), &cfg),
        );
    }

    #[test]
    fn config_field_order_does_not_matter() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": {"y": 2, "x": [1, {"q": 1, "p": 2}]}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"b": {"x": [1, {"p": 2, "q": 1}], "y": 2}, "a": 1}"#).unwrap();
        assert_eq!(
            CacheKey::compute(OperationType::TextOverlay, &refs(&["1"]), &a),
            CacheKey::compute(OperationType::TextOverlay, &refs(&["1"]), &b),
        );
    }

    #[test]
    fn different_inputs_differ() {
        let cfg = json!({});
        let base = CacheKey::compute(OperationType::Join, &refs(&["a", "b"]), &cfg);
        assert_ne!(base, CacheKey::compute(OperationType::Subtitles, &refs(&["a", "b"]), &cfg));
        assert_ne!(base, CacheKey::compute(OperationType::Join, &refs(&["a", "c"]), &cfg));
        let reencode = json!({"reencode": true});
        assert_ne!(base, CacheKey::compute(OperationType::Join, &refs(&["a", "b"]), &reencode));
        assert_ne!(
            CacheKey::compute(OperationType::Join, &refs(&["ab", "c"]), &cfg),
            CacheKey::compute(OperationType::Join, &refs(&["a", "bc"]), &cfg),
        );
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
    }

    #[test]
    fn canonical_form() {
        let v = json!({"b": "x\"y", "a": [true, null, 1.5]});
        assert_eq!(canonical_json(&v), r#"{"a":[true,null,1.5],"b":"x\"y"}"#);
    }

    #[test]
    fn key_is_hex_sha256() {
        let key = CacheKey::compute(OperationType::Join, &refs(&["a"]), &json!({}));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn out_of_range_ttl_is_rejected() {
        let cache = MemoryResultCache::new(Duration::MAX);
        let key = CacheKey::compute(OperationType::Join, &refs(&["a", "b"]), &json!({}));
        let err = cache.put(&key, OperationType::Join, &refs(&["out.mp4"])).unwrap_err();
        assert!(err.is_validation());
        assert!(cache.is_empty());
    }

    #[test]
    fn memory_cache_round_trip_and_expiry() {
        let cache = MemoryResultCache::new(Duration::from_secs(60));
        let key = CacheKey::compute(OperationType::Join, &refs(&["a", "b"]), &json!({}));
        assert!(cache.get(&key).unwrap().is_none());

        cache.put(&key, OperationType::Join, &refs(&["out.mp4"])).unwrap();
        assert_eq!(cache.get(&key).unwrap().unwrap().output_files, vec!["out.mp4"]);

        cache.invalidate(&key).unwrap();
        assert!(cache.get(&key).unwrap().is_none());

        let expired = MemoryResultCache::new(Duration::ZERO);
        expired.put(&key, OperationType::Join, &refs(&["out.mp4"])).unwrap();
        assert!(expired.get(&key).unwrap().is_none());
        assert_eq!(expired.purge_expired(), 0);
    }
}
