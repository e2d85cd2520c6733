//! Process-wide collaborator clients.
//!
//! The registry is built once at startup and passed to whoever needs a client. Each
//! client is created lazily on first use, at most once, and shared afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::info;

use crate::identity::{IdentityProvider, LocalIdentityProvider, LogMailer, UserDirectory};
use crate::storage::{DocumentStore, FileDocumentStore, MemoryDocumentStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// One JSON file per collection under this folder.
    File(PathBuf),
    /// Nothing survives a restart.
    Memory,
}

pub struct ClientRegistry {
    backend: StoreBackend,
    store: OnceCell<Arc<dyn DocumentStore>>,
    identity: OnceCell<Arc<dyn IdentityProvider>>,
}

impl ClientRegistry {
    pub fn new(backend: StoreBackend) -> Self {
        Self { backend, store: OnceCell::new(), identity: OnceCell::new() }
    }

    /// Registry whose store is already built, e.g. a test double.
    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(store);
        Self { backend: StoreBackend::Memory, store: cell, identity: OnceCell::new() }
    }

    pub fn store(&self) -> Result<Arc<dyn DocumentStore>> {
        self.store
            .get_or_try_init(|| {
                let store: Arc<dyn DocumentStore> = match &self.backend {
                    StoreBackend::File(root) => Arc::new(FileDocumentStore::new(root)?),
                    StoreBackend::Memory => Arc::new(MemoryDocumentStore::new()),
                };
                info!(target: "startup", backend = ?self.backend, "document store initialised");
                Ok(store)
            })
            .cloned()
    }

    pub fn identity_provider(&self) -> Result<Arc<dyn IdentityProvider>> {
        self.identity
            .get_or_try_init(|| {
                let store = self.store()?;
                let provider: Arc<dyn IdentityProvider> = Arc::new(LocalIdentityProvider::new(store, Arc::new(LogMailer)));
                info!(target: "startup", "identity provider initialised");
                Ok(provider)
            })
            .cloned()
    }

    pub fn directory(&self) -> Result<UserDirectory> {
        Ok(UserDirectory::new(self.identity_provider()?, self.store()?))
    }
}
