use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{kind_for_path, PlatformError, ResourceProvider, StyleLookup};
use crate::model::Resource;

/// In-memory resource and style catalog
#[derive(Default)]
pub struct InMemoryResources {
    resources: RwLock<HashMap<i64, Resource>>,
    styles: RwLock<HashMap<i64, String>>,
    sequence: AtomicI64,
}

impl InMemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uploaded file and return its id
    pub fn insert(&self, path: &str) -> Result<i64, PlatformError> {
        self.store(path, None)
    }

    pub fn insert_style(&self, id: i64, content: impl Into<String>) {
        self.styles.write().insert(id, content.into());
    }

    fn store(&self, path: &str, job_id: Option<i64>) -> Result<i64, PlatformError> {
        let kind = kind_for_path(path)?;
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.resources.write().insert(
            id,
            Resource {
                id,
                path: path.to_string(),
                kind,
                job_id,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl ResourceProvider for InMemoryResources {
    async fn get(&self, id: i64) -> Result<Resource, PlatformError> {
        self.resources
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("resource {id}")))
    }

    async fn find_by_job(&self, job_id: i64) -> Result<Vec<Resource>, PlatformError> {
        let mut found: Vec<Resource> = self
            .resources
            .read()
            .values()
            .filter(|r| r.job_id == Some(job_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    async fn add(&self, path: &str, job_id: Option<i64>) -> Result<i64, PlatformError> {
        self.store(path, job_id)
    }
}

#[async_trait]
impl StyleLookup for InMemoryResources {
    async fn style_content(&self, id: i64) -> Result<Option<String>, PlatformError> {
        Ok(self.styles.read().get(&id).cloned())
    }
}
