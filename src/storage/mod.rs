//!
//! nexusfarma document store
//! -------------------------
//! Named collections of JSON documents. Every collection is read and written as a
//! whole array, the same way the application keeps its users, products and orders.
//!
//! Key responsibilities:
//! - A small async `DocumentStore` seam so the backing service can be swapped.
//! - Typed `read_collection` / `write_collection` / `update_collection` helpers over serde.
//! - A file-backed store (one JSON file per collection) and an in-memory store.
//!
//! Reads, writes and updates of one collection are atomic with respect to each other.
//! Read-modify-write must go through `update_collection`; a separate read then write
//! loses concurrent changes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

mod file;
mod memory;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;

/// Collection holding local user records (principals).
pub const USERS: &str = "users";
/// Collection holding identity-provider records (password hashes).
pub const IDENTITIES: &str = "identities";
/// Collection holding outstanding password reset codes.
pub const PASSWORD_RESETS: &str = "password_resets";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read every document of a collection. A collection that was never written reads as empty.
    async fn read_raw(&self, collection: &str) -> Result<Vec<JsonValue>>;
    /// Replace the whole collection with `docs`.
    async fn write_raw(&self, collection: &str, docs: Vec<JsonValue>) -> Result<()>;
    /// Run `apply` on the current documents while holding the store lock. The documents
    /// are written back only when `apply` returns `Ok(true)`.
    async fn update_raw(&self, collection: &str, apply: RawUpdate<'_>) -> Result<()>;
}

/// In-place edit of one collection, run under the store lock.
pub type RawUpdate<'a> = Box<dyn FnOnce(&mut Vec<JsonValue>) -> Result<bool> + Send + 'a>;

fn decode<T: DeserializeOwned>(collection: &str, raw: Vec<JsonValue>) -> Result<Vec<T>> {
    raw.into_iter()
        .enumerate()
        .map(|(i, v)| {
            serde_json::from_value::<T>(v)
                .with_context(|| format!("decoding document {} of collection '{}'", i, collection))
        })
        .collect()
}

fn encode<T: Serialize>(collection: &str, items: &[T]) -> Result<Vec<JsonValue>> {
    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        docs.push(serde_json::to_value(item).with_context(|| format!("encoding document for '{}'", collection))?);
    }
    Ok(docs)
}

pub async fn read_collection<T: DeserializeOwned>(store: &dyn DocumentStore, collection: &str) -> Result<Vec<T>> {
    decode(collection, store.read_raw(collection).await?)
}

pub async fn write_collection<T: Serialize>(store: &dyn DocumentStore, collection: &str, items: &[T]) -> Result<()> {
    store.write_raw(collection, encode(collection, items)?).await
}

/// Atomic read-modify-write of a typed collection. When `edit` returns `Err` nothing is
/// written and the error is handed back unchanged.
pub async fn update_collection<T, R, E, F>(store: &dyn DocumentStore, collection: &str, edit: F) -> Result<R, E>
where
    T: DeserializeOwned + Serialize,
    R: Send,
    E: From<anyhow::Error> + Send,
    F: FnOnce(&mut Vec<T>) -> Result<R, E> + Send,
{
    let mut outcome: Option<Result<R, E>> = None;
    let slot = &mut outcome;
    store
        .update_raw(
            collection,
            Box::new(move |docs: &mut Vec<JsonValue>| {
                let mut items: Vec<T> = decode(collection, std::mem::take(docs))?;
                let result = edit(&mut items);
                let changed = result.is_ok();
                if changed {
                    *docs = encode(collection, &items)?;
                }
                *slot = Some(result);
                Ok(changed)
            }),
        )
        .await?;
    match outcome {
        Some(result) => result,
        None => Err(anyhow::anyhow!("update of collection '{}' did not run", collection).into()),
    }
}

/// Restrict collection names to `[A-Za-z0-9_]` so they are always safe file stems.
pub(crate) fn sanitize_collection(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
