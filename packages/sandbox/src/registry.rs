// ABOUTME: In-memory registry owning the authoritative set of live sandboxes
// ABOUTME: Single reader/writer lock; no runtime I/O happens under the lock

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::templates::Template;

/// A live sandbox: a started container plus its lifetime metadata.
///
/// Records are immutable after insertion. The container handle is opaque
/// outside the Docker provider.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: String,
    pub container_id: String,
    pub template: Template,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Map from sandbox id to record, behind a single reader/writer lock.
///
/// All mutations take the writer, all reads take a reader. Callers must do
/// slow runtime calls after releasing the lock, never inside it.
#[derive(Debug, Default)]
pub struct SandboxRegistry {
    inner: RwLock<HashMap<String, Sandbox>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under a fresh id. Returns false (and leaves the map
    /// untouched) if the id is already taken.
    pub async fn insert(&self, record: Sandbox) -> bool {
        let mut map = self.inner.write().await;
        if map.contains_key(&record.id) {
            return false;
        }
        map.insert(record.id.clone(), record);
        true
    }

    pub async fn lookup(&self, id: &str) -> Option<Sandbox> {
        self.inner.read().await.get(id).cloned()
    }

    /// Remove and return the record, if present. Idempotent: a second call
    /// for the same id observes absence.
    pub async fn remove(&self, id: &str) -> Option<Sandbox> {
        self.inner.write().await.remove(id)
    }

    /// Snapshot of ids whose expiry is at or before `now`.
    pub async fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.inner
            .read()
            .await
            .values()
            .filter(|sb| sb.expires_at <= now)
            .map(|sb| sb.id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
