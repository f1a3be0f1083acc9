//! Deterministic record identity.
//!
//! Every record is named by a UUID v5 over (run namespace, source record
//! key). The namespace is minted once per run and persisted as
//! `transaction_id` in the workspace metadata, so a resumed run derives
//! the same uuids and resume-by-artifact works.

use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct Identity {
    namespace: Uuid,
}

impl Identity {
    pub fn new(namespace: Uuid) -> Self {
        Self { namespace }
    }

    /// Mint a fresh run namespace. Time-ordered, so concurrent runs on the
    /// same host stay distinct.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    pub fn namespace(&self) -> Uuid {
        self.namespace
    }

    /// Pure derivation: `uuid5(namespace, source_record_key)`.
    pub fn of(&self, source_record_key: &str) -> Uuid {
        Uuid::new_v5(&self.namespace, source_record_key.as_bytes())
    }

    /// Walk arbitrarily nested JSON and insert `uuid` wherever an object
    /// carries a `source_record_key`. Descends into all child objects and
    /// array elements. Idempotent: re-assigning rewrites the same values.
    pub fn assign(&self, data: &mut Value) {
        match data {
            Value::Array(items) => {
                for item in items {
                    self.assign(item);
                }
            }
            Value::Object(map) => {
                let key = map
                    .get("source_record_key")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(key) = key {
                    map.insert(
                        "uuid".to_string(),
                        Value::String(self.of(&key).to_string()),
                    );
                }
                for (_, child) in map.iter_mut() {
                    self.assign(child);
                }
            }
            _ => {}
        }
    }
}
