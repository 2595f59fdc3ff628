//! SQLite Catalog
//!
//! Persists volume and replica records as JSON documents.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{VolumeCatalog, VolumeRecord};
use crate::controller::Volume;
use crate::error::{Error, Result};
use crate::state::Replica;

/// Catalog backed by a local SQLite database
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Create or open the catalog database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Catalog that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS volumes (
                name TEXT PRIMARY KEY,
                id TEXT NOT NULL,
                revision INTEGER NOT NULL,
                document TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS replicas (
                volume TEXT NOT NULL,
                address TEXT NOT NULL,
                state TEXT NOT NULL,
                document TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (volume, address)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl VolumeCatalog for SqliteCatalog {
    async fn load(&self, volume_name: &str) -> Result<Option<VolumeRecord>> {
        let conn = self.conn.lock().await;

        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM volumes WHERE name = ?1",
                params![volume_name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(document) = document else {
            return Ok(None);
        };
        let volume: Volume = serde_json::from_str(&document)?;

        let mut stmt = conn.prepare(
            "SELECT document FROM replicas WHERE volume = ?1 ORDER BY address",
        )?;
        let rows = stmt.query_map(params![volume_name], |row| row.get::<_, String>(0))?;

        let mut replicas = Vec::new();
        for row in rows {
            let replica: Replica = serde_json::from_str(&row?)?;
            replicas.push(replica);
        }

        Ok(Some(VolumeRecord { volume, replicas }))
    }

    async fn store(&self, record: &VolumeRecord) -> Result<()> {
        let revision = i64::try_from(record.volume.revision).map_err(|_| {
            Error::Catalog(format!(
                "volume {} revision {} does not fit the catalog",
                record.volume.name, record.volume.revision
            ))
        })?;
        let volume_doc = serde_json::to_string(&record.volume)?;
        let mut replica_docs = Vec::with_capacity(record.replicas.len());
        for replica in &record.replicas {
            replica_docs.push((replica, serde_json::to_string(replica)?));
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO volumes (name, id, revision, document) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(name) DO UPDATE SET
                id = ?2, revision = ?3, document = ?4, updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                record.volume.name,
                record.volume.id.to_string(),
                revision,
                volume_doc
            ],
        )?;

        tx.execute(
            "DELETE FROM replicas WHERE volume = ?1",
            params![record.volume.name],
        )?;
        for (replica, document) in replica_docs {
            tx.execute(
                "INSERT INTO replicas (volume, address, state, document) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.volume.name,
                    replica.address,
                    replica.state.to_string(),
                    document
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
