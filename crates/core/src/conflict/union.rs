//! Merge policy for JSON lists of entries.
//!
//! Both sides must be JSON arrays of objects. Entries are unioned by a key
//! field, local entries first so a local entry wins over a remote one with the
//! same key. When an ordering field is configured the result is sorted by it,
//! newest first; entries whose field is missing or unparseable go last and
//! keep their relative order.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, info};

use super::{ConflictResolver, LocalSide, RemoteSide, Resolution};
use crate::errors::ConflictError;

const JSON: &str = "application/json";

/// Union-by-key resolver for JSON arrays.
#[derive(Debug, Clone)]
pub struct UnionByKey {
    key: String,
    order_by: Option<String>,
}

impl UnionByKey {
    /// Deduplicate entries on the `key` field.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            order_by: None,
        }
    }

    /// Sort the merged list by `field`, newest first.
    ///
    /// RFC 3339 strings and numbers are understood.
    pub fn ordered_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Merge two JSON documents.
    pub fn merge(&self, local: &str, remote: &str) -> Result<String, ConflictError> {
        let local = parse_entries("local", local)?;
        let remote = parse_entries("remote", remote)?;
        let (local_len, remote_len) = (local.len(), remote.len());

        let mut merged: Vec<Value> = Vec::with_capacity(local_len + remote_len);
        for entry in local.into_iter().chain(remote) {
            let duplicate = match entry.get(&self.key) {
                Some(key) => merged.iter().any(|e| e.get(&self.key) == Some(key)),
                None => false,
            };
            if !duplicate {
                merged.push(entry);
            }
        }

        if let Some(field) = &self.order_by {
            merged.sort_by(|a, b| newest_first(sort_key(a, field), sort_key(b, field)));
        }

        debug!(
            local = local_len,
            remote = remote_len,
            merged = merged.len(),
            "merged entry lists"
        );
        serde_json::to_string(&merged).map_err(|e| ConflictError::InvalidContent {
            side: "merged",
            detail: e.to_string(),
        })
    }
}

fn parse_entries(side: &'static str, raw: &str) -> Result<Vec<Value>, ConflictError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(entries)) => Ok(entries),
        Ok(_) => Err(ConflictError::InvalidContent {
            side,
            detail: "expected a JSON array".into(),
        }),
        Err(e) => Err(ConflictError::InvalidContent {
            side,
            detail: e.to_string(),
        }),
    }
}

fn sort_key(entry: &Value, field: &str) -> Option<f64> {
    match entry.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64),
        _ => None,
    }
}

fn newest_first(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl ConflictResolver for UnionByKey {
    async fn resolve(
        &self,
        local: LocalSide<'_>,
        remote: RemoteSide,
    ) -> Result<Resolution, ConflictError> {
        info!(path = local.path(), key = %self.key, "resolving conflict: union by key");
        let local_content = local.content()?;
        let remote_content = remote.content().await?;
        let merged = self.merge(&local_content, &remote_content)?;
        Ok(Resolution::new(merged, JSON))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(raw: &str) -> Vec<String> {
        let parsed: Vec<Value> = serde_json::from_str(raw).unwrap();
        parsed
            .iter()
            .map(|e| e["value"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_union_dedupes_by_key() {
        let local = json!([{"value": "milk", "done": true}, {"value": "eggs"}]).to_string();
        let remote = json!([{"value": "milk", "done": false}, {"value": "bread"}]).to_string();

        let merged = UnionByKey::new("value").merge(&local, &remote).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&merged).unwrap();

        assert_eq!(values(&merged), vec!["milk", "eggs", "bread"]);
        // Local wins on duplicate keys.
        assert_eq!(parsed[0]["done"], json!(true));
    }

    #[test]
    fn test_orders_newest_first() {
        let local = json!([
            {"value": "a", "created": "2024-01-01T00:00:00Z"},
            {"value": "b"}
        ])
        .to_string();
        let remote = json!([
            {"value": "c", "created": "2024-03-01T00:00:00Z"},
            {"value": "d", "created": "2024-02-01T00:00:00+00:00"}
        ])
        .to_string();

        let merged = UnionByKey::new("value")
            .ordered_by("created")
            .merge(&local, &remote)
            .unwrap();
        assert_eq!(values(&merged), vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let local = json!([{"value": "x", "created": 2}, {"value": "y", "created": 2}]).to_string();
        let remote = json!([{"value": "z", "created": 3}]).to_string();
        let policy = UnionByKey::new("value").ordered_by("created");
        assert_eq!(
            policy.merge(&local, &remote).unwrap(),
            policy.merge(&local, &remote).unwrap()
        );
        assert_eq!(values(&policy.merge(&local, &remote).unwrap()), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_rejects_non_arrays() {
        let err = UnionByKey::new("value").merge("{}", "[]").unwrap_err();
        assert!(matches!(err, ConflictError::InvalidContent { side: "local", .. }));

        let err = UnionByKey::new("value").merge("[]", "nope").unwrap_err();
        assert!(matches!(err, ConflictError::InvalidContent { side: "remote", .. }));
    }
}
