use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{sanitize_collection, DocumentStore, RawUpdate};

/// Document store keeping each collection as `<root>/<collection>.json`.
///
/// Writes go to a temp file that is renamed over the target, so a crash never leaves
/// a half-written collection. A single mutex serialises file access for the store.
pub struct FileDocumentStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileDocumentStore {
    /// Create a store rooted at `root`, creating the folder if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create or access data folder: {}", root.display()))?;
        Ok(Self { root, lock: Mutex::new(()) })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_collection(collection)))
    }

    // Callers hold `self.lock`.
    fn load(&self, path: &Path) -> Result<Vec<JsonValue>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    // Callers hold `self.lock`.
    fn store(&self, path: &Path, docs: &[JsonValue]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_vec_pretty(docs)?;
        fs::write(&tmp, &text).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn read_raw(&self, collection: &str) -> Result<Vec<JsonValue>> {
        let path = self.collection_path(collection);
        let _guard = self.lock.lock();
        self.load(&path)
    }

    async fn write_raw(&self, collection: &str, docs: Vec<JsonValue>) -> Result<()> {
        let path = self.collection_path(collection);
        let _guard = self.lock.lock();
        self.store(&path, &docs)?;
        debug!(collection = collection, count = docs.len(), "store.write");
        Ok(())
    }

    async fn update_raw(&self, collection: &str, apply: RawUpdate<'_>) -> Result<()> {
        let path = self.collection_path(collection);
        let _guard = self.lock.lock();
        let mut docs = self.load(&path)?;
        if apply(&mut docs)? {
            self.store(&path, &docs)?;
            debug!(collection = collection, count = docs.len(), "store.update");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn collections_persist_across_instances() {
        let tmp = tempdir().unwrap();
        {
            let store = FileDocumentStore::new(tmp.path()).unwrap();
            store.write_raw("users", vec![json!({"email": "ana@nexus.test"})]).await.unwrap();
        }
        let store = FileDocumentStore::new(tmp.path()).unwrap();
        let docs = store.read_raw("users").await.unwrap();
        assert_eq!(docs, vec![json!({"email": "ana@nexus.test"})]);
        assert!(tmp.path().join("users.json").exists());
        assert!(!tmp.path().join("users.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_or_blank_file_reads_empty() {
        let tmp = tempdir().unwrap();
        let store = FileDocumentStore::new(tmp.path()).unwrap();
        assert!(store.read_raw("orders").await.unwrap().is_empty());
        std::fs::write(tmp.path().join("orders.json"), "  \n").unwrap();
        assert!(store.read_raw("orders").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = tempdir().unwrap();
        let store = FileDocumentStore::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("orders.json"), "{not json").unwrap();
        assert!(store.read_raw("orders").await.is_err());
    }

    #[tokio::test]
    async fn update_is_persisted_only_when_applied() {
        let tmp = tempdir().unwrap();
        let store = FileDocumentStore::new(tmp.path()).unwrap();
        store
            .update_raw("users", Box::new(|docs: &mut Vec<JsonValue>| {
                docs.push(json!({"email": "ana@nexus.test"}));
                Ok(true)
            }))
            .await
            .unwrap();
        store
            .update_raw("users", Box::new(|docs: &mut Vec<JsonValue>| {
                docs.clear();
                Ok(false)
            }))
            .await
            .unwrap();
        let reopened = FileDocumentStore::new(tmp.path()).unwrap();
        assert_eq!(reopened.read_raw("users").await.unwrap(), vec![json!({"email": "ana@nexus.test"})]);
    }

    #[tokio::test]
    async fn collection_names_cannot_escape_the_root() {
        let tmp = tempdir().unwrap();
        let store = FileDocumentStore::new(tmp.path().join("data")).unwrap();
        store.write_raw("../outside", vec![json!(1)]).await.unwrap();
        assert!(tmp.path().join("data").join("___outside.json").exists());
        assert!(!tmp.path().join("outside.json").exists());
    }
}
