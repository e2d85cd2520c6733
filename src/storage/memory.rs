use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use super::{sanitize_collection, DocumentStore, RawUpdate};

/// In-process document store. Used by tests and for throwaway servers.
#[derive(Default)]
pub struct MemoryDocumentStore {
    map: RwLock<HashMap<String, Vec<JsonValue>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_raw(&self, collection: &str) -> Result<Vec<JsonValue>> {
        Ok(self.map.read().get(&sanitize_collection(collection)).cloned().unwrap_or_default())
    }

    async fn write_raw(&self, collection: &str, docs: Vec<JsonValue>) -> Result<()> {
        self.map.write().insert(sanitize_collection(collection), docs);
        Ok(())
    }

    async fn update_raw(&self, collection: &str, apply: RawUpdate<'_>) -> Result<()> {
        let key = sanitize_collection(collection);
        let mut map = self.map.write();
        let mut docs = map.get(&key).cloned().unwrap_or_default();
        if apply(&mut docs)? {
            map.insert(key, docs);
        }
        Ok(())
    }
}
