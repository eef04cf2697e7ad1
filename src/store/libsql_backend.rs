//! libSQL backend: async `RecordStore` implementation.
//!
//! Each collection is stored as position-ordered rows in one `records` table,
//! with the positional fields JSON-encoded. `put_all` deletes and re-inserts
//! a collection inside a single transaction, so a failed write leaves the
//! previous contents intact.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{Collection, RecordStore, Row};

/// libSQL record store.
///
/// Stores a single connection that is reused for all operations. Writes are
/// serialized through `write_lock` because transactions cannot nest on one
/// connection.
pub struct LibSqlRecordStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlRecordStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Record store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }
}

fn unavailable(collection: Collection, reason: String) -> StoreError {
    StoreError::Unavailable {
        collection: collection.as_str(),
        reason,
    }
}

/// Decode the JSON field array of one stored row.
///
/// Undecodable payloads come back as an empty leading field followed by the
/// raw text. No record codec accepts an empty key, so the typed layer sets the
/// row aside as malformed instead of the whole read failing.
fn decode_fields(collection: Collection, raw: String) -> Row {
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(fields) => fields,
        Err(e) => {
            warn!(collection = %collection, "Undecodable stored row: {e}");
            vec![String::new(), raw]
        }
    }
}

#[async_trait]
impl RecordStore for LibSqlRecordStore {
    async fn get_all(&self, collection: Collection) -> Result<Vec<Row>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT fields FROM records WHERE collection = ?1 ORDER BY position ASC",
                params![collection.as_str()],
            )
            .await
            .map_err(|e| unavailable(collection, format!("get_all: {e}")))?;

        let mut out = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let raw: String = row
                        .get(0)
                        .map_err(|e| unavailable(collection, format!("get_all row: {e}")))?;
                    out.push(decode_fields(collection, raw));
                }
                Ok(None) => break,
                Err(e) => return Err(unavailable(collection, format!("get_all: {e}"))),
            }
        }

        debug!(collection = %collection, rows = out.len(), "Collection read");
        Ok(out)
    }

    async fn put_all(&self, collection: Collection, rows: &[Row]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let name = collection.as_str();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| unavailable(collection, format!("put_all begin: {e}")))?;

        tx.execute("DELETE FROM records WHERE collection = ?1", params![name])
            .await
            .map_err(|e| unavailable(collection, format!("put_all clear: {e}")))?;

        for (position, row) in rows.iter().enumerate() {
            let fields = serde_json::to_string(row)
                .map_err(|e| unavailable(collection, format!("put_all encode: {e}")))?;
            tx.execute(
                "INSERT INTO records (collection, position, fields) VALUES (?1, ?2, ?3)",
                params![name, position as i64, fields],
            )
            .await
            .map_err(|e| unavailable(collection, format!("put_all insert: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| unavailable(collection, format!("put_all commit: {e}")))?;

        info!(collection = %collection, rows = rows.len(), "Collection replaced");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
