// Remote object store boundary
// Playback probes and loads through it; uploads write and delete through it.

pub mod http;

use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

pub use http::HttpStore;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap existence check before committing to a full load.
    async fn probe(&self, url: &str) -> Result<bool, StoreError>;

    async fn load(&self, url: &str) -> Result<Vec<u8>, StoreError>;

    /// Stores `bytes` at `path` and returns the public URL.
    async fn upload(
        &self,
        bytes: Arc<[u8]>,
        path: &str,
        content_type: &str,
    ) -> Result<String, StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;
}
