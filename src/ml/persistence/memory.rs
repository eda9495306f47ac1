use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Artifact, ArtifactKey, ArtifactStore};

/// In-process store for tests
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactKey, Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.artifacts.read().await.contains_key(key))
    }

    async fn load(&self, key: &ArtifactKey) -> Result<Option<Artifact>> {
        Ok(self.artifacts.read().await.get(key).cloned())
    }

    async fn save(&self, key: &ArtifactKey, artifact: &Artifact) -> Result<()> {
        self.artifacts.write().await.insert(key.clone(), artifact.clone());
        Ok(())
    }
}
