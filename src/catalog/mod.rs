//! Volume Catalog
//!
//! Durable store for the volume record and its replicas. The controller
//! writes the full record after every committed mutation and reads it back
//! once at startup.

mod sqlite;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::CatalogConfig;
use crate::controller::Volume;
use crate::error::{Error, Result};
use crate::state::Replica;

pub use sqlite::SqliteCatalog;

/// Everything persisted for one volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub volume: Volume,
    /// Ordered by address
    pub replicas: Vec<Replica>,
}

/// Durable, linearizable store for volume state
#[async_trait]
pub trait VolumeCatalog: Send + Sync {
    /// Load the record for a volume, if one was ever stored
    async fn load(&self, volume_name: &str) -> Result<Option<VolumeRecord>>;

    /// Replace the stored record for a volume
    async fn store(&self, record: &VolumeRecord) -> Result<()>;
}

/// Catalog kept in process memory
#[derive(Default)]
pub struct MemoryCatalog {
    volumes: RwLock<HashMap<String, VolumeRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolumeCatalog for MemoryCatalog {
    async fn load(&self, volume_name: &str) -> Result<Option<VolumeRecord>> {
        Ok(self.volumes.read().await.get(volume_name).cloned())
    }

    async fn store(&self, record: &VolumeRecord) -> Result<()> {
        self.volumes
            .write()
            .await
            .insert(record.volume.name.clone(), record.clone());
        Ok(())
    }
}

/// Open the catalog backend named in the configuration
pub fn open_catalog(config: &CatalogConfig, data_dir: &Path) -> Result<Arc<dyn VolumeCatalog>> {
    match config.backend.as_str() {
        "memory" => {
            tracing::warn!("Using in-memory catalog; volume state is lost on restart");
            Ok(Arc::new(MemoryCatalog::new()))
        }
        "sqlite" => {
            let path = config
                .path
                .clone()
                .unwrap_or_else(|| data_dir.join("catalog.db"));
            tracing::info!("Opening catalog at {}", path.display());
            Ok(Arc::new(SqliteCatalog::open(&path)?))
        }
        other => Err(Error::Config(format!("unknown catalog backend '{}'", other))),
    }
}
