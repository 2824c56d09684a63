//! SQLite-backed document and signer stores
//!
//! Connections come from an r2d2 pool and every call runs on the blocking
//! thread pool. Check-then-write operations run in an IMMEDIATE transaction,
//! which takes the database write lock up front: an `archive` cannot
//! interleave with an in-flight `add_version` on the same document, while
//! reads on other entities proceed on other connections (WAL).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, info};

use super::memory::validate_title;
use super::schema;
use super::{DocumentVersionStore, SignerStore};
use crate::error::{EngineError, Result};
use crate::model::{Document, NewVersion, Signer, SignerInfo, SignerName, SignerState, Version};

pub type DbPool = Pool<SqliteConnectionManager>;

pub const DEFAULT_POOL_SIZE: u32 = 8;

/// How long a writer waits for the database lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open or create `signflow.db` in the data directory
    pub fn open(data_dir: &Path) -> Result<Self> {
        Self::open_with_pool_size(data_dir, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size(data_dir: &Path, pool_size: u32) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| EngineError::Storage(format!("Failed to create {}: {}", data_dir.display(), e)))?;
        let db_path = data_dir.join("signflow.db");
        info!("Opening SQLite database at {:?} (pool size {})", db_path, pool_size);

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
        });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| EngineError::Storage(format!("Failed to open SQLite: {}", e)))?;

        Self::with_pool(pool)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every in-memory connection is its own database, so the pool holds one.
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())
            .map_err(|e| EngineError::Storage(format!("Failed to open in-memory SQLite: {}", e)))?;
        Self::with_pool(pool)
    }

    fn with_pool(pool: DbPool) -> Result<Self> {
        schema::init_schema(&*pool.get()?)?;
        Ok(Self { pool })
    }

    /// Run `f` on a pooled connection off the async worker threads
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| EngineError::Storage(format!("Storage task failed: {}", e)))?
    }
}

/// Transaction holding the write lock from its first statement
fn write_tx(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Storage(format!("Bad timestamp {:?}: {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_state(raw: &str) -> Result<SignerState> {
    SignerState::parse(raw).ok_or_else(|| EngineError::Storage(format!("Bad signer state {:?}", raw)))
}

struct DocumentRow {
    id: String,
    file_name: String,
    archived_date: Option<String>,
}

impl DocumentRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            file_name: row.get("file_name")?,
            archived_date: row.get("archived_date")?,
        })
    }
}

struct SignerRow {
    id: String,
    document_id: String,
    display_name: String,
    email: String,
    state: String,
    archived_from: Option<String>,
    created_date: String,
    signed_date: Option<String>,
    signature_image: Option<Vec<u8>>,
}

impl SignerRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            display_name: row.get("display_name")?,
            email: row.get("email")?,
            state: row.get("state")?,
            archived_from: row.get("archived_from")?,
            created_date: row.get("created_date")?,
            signed_date: row.get("signed_date")?,
            signature_image: row.get("signature_image")?,
        })
    }

    fn into_signer(self) -> Result<Signer> {
        Ok(Signer {
            state: parse_state(&self.state)?,
            archived_from: self.archived_from.as_deref().map(parse_state).transpose()?,
            created_date: parse_ts(&self.created_date)?,
            signed_date: parse_opt_ts(self.signed_date)?,
            id: self.id,
            document_id: self.document_id,
            display_name: self.display_name,
            email: self.email,
            signature_image: self.signature_image,
        })
    }
}

fn load_versions(conn: &Connection, document_id: &str) -> Result<Vec<Version>> {
    let mut stmt = conn.prepare(
        "SELECT id, add_date, preview, file_path FROM versions WHERE document_id = ? ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![document_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut versions = Vec::new();
    for row in rows {
        let (id, add_date, preview, file_path) = row?;
        versions.push(Version {
            id,
            add_date: parse_ts(&add_date)?,
            preview,
            file_path,
        });
    }
    Ok(versions)
}

fn load_document(conn: &Connection, document_id: &str) -> Result<Document> {
    let row = conn
        .query_row(
            "SELECT id, file_name, archived_date FROM documents WHERE id = ?",
            params![document_id],
            DocumentRow::from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("document", document_id))?;

    Ok(Document {
        versions: load_versions(conn, &row.id)?,
        archived_date: parse_opt_ts(row.archived_date)?,
        id: row.id,
        file_name: row.file_name,
    })
}

fn insert_version(conn: &Connection, document_id: &str, version: &Version) -> Result<()> {
    conn.execute(
        "INSERT INTO versions (id, document_id, seq, add_date, preview, file_path)
         VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM versions WHERE document_id = ?2), ?3, ?4, ?5)",
        params![
            version.id,
            document_id,
            version.add_date.to_rfc3339(),
            version.preview,
            version.file_path
        ],
    )?;
    Ok(())
}

fn load_signer(conn: &Connection, signer_id: &str) -> Result<Signer> {
    conn.query_row(
        "SELECT * FROM signers WHERE id = ?",
        params![signer_id],
        SignerRow::from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("signer", signer_id))?
    .into_signer()
}

fn query_signers(conn: &Connection, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Signer>> {
    let sql = format!("SELECT * FROM signers {} ORDER BY created_seq", filter);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, SignerRow::from_row)?;
    let signers = rows
        .map(|r| r.map_err(EngineError::from).and_then(SignerRow::into_signer))
        .collect();
    signers
}

/// Write back the mutable columns of a signer
fn save_signer(conn: &Connection, signer: &Signer) -> Result<()> {
    conn.execute(
        "UPDATE signers SET state = ?2, archived_from = ?3, signed_date = ?4, signature_image = ?5
         WHERE id = ?1",
        params![
            signer.id,
            signer.state.as_str(),
            signer.archived_from.map(|s| s.as_str()),
            signer.signed_date.map(|d| d.to_rfc3339()),
            signer.signature_image
        ],
    )?;
    Ok(())
}

// =============================================================================
// Documents
// =============================================================================

/// Fail unless the document exists and is not archived
fn ensure_active(conn: &Connection, document_id: &str) -> Result<()> {
    let archived: Option<Option<String>> = conn
        .query_row(
            "SELECT archived_date FROM documents WHERE id = ?",
            params![document_id],
            |row| row.get(0),
        )
        .optional()?;
    match archived {
        None => Err(EngineError::not_found("document", document_id)),
        Some(Some(_)) => Err(EngineError::NotFound(format!("document {} is archived", document_id))),
        Some(None) => Ok(()),
    }
}

#[async_trait]
impl DocumentVersionStore for SqliteStore {
    async fn create(&self, file_name: &str, initial_version: NewVersion) -> Result<Document> {
        let file_name = validate_title(file_name)?;
        initial_version.validate()?;
        let version = initial_version.into_version();
        let document_id = uuid::Uuid::new_v4().to_string();

        let document = self
            .run(move |conn| {
                let tx = write_tx(conn)?;
                tx.execute(
                    "INSERT INTO documents (id, file_name, archived_date, created_seq)
                     VALUES (?1, ?2, NULL, (SELECT COALESCE(MAX(created_seq), 0) + 1 FROM documents))",
                    params![document_id, file_name],
                )?;
                insert_version(&tx, &document_id, &version)?;
                tx.commit()?;
                load_document(conn, &document_id)
            })
            .await?;

        info!(document_id = %document.id, file_name = %document.file_name, "Created document");
        Ok(document)
    }

    async fn rename(&self, document_id: &str, new_title: &str) -> Result<Document> {
        let title = validate_title(new_title)?;
        let document_id = document_id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE documents SET file_name = ? WHERE id = ?",
                params![title, document_id],
            )?;
            if changed == 0 {
                return Err(EngineError::not_found("document", &document_id));
            }
            load_document(conn, &document_id)
        })
        .await
    }

    async fn add_version(&self, document_id: &str, version: NewVersion) -> Result<Document> {
        version.validate()?;
        let version = version.into_version();
        let id = document_id.to_string();
        let document = self
            .run(move |conn| {
                let tx = write_tx(conn)?;
                ensure_active(&tx, &id)?;
                insert_version(&tx, &id, &version)?;
                tx.commit()?;
                load_document(conn, &id)
            })
            .await?;
        debug!(document_id, versions = document.versions.len(), "Appended version");
        Ok(document)
    }

    async fn archive(&self, document_id: &str) -> Result<Document> {
        let document_id = document_id.to_string();
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            if load_document(&tx, &document_id)?.is_archived() {
                return Err(EngineError::InvalidState(format!(
                    "document {} is already archived",
                    document_id
                )));
            }
            tx.execute(
                "UPDATE documents SET archived_date = ? WHERE id = ?",
                params![Utc::now().to_rfc3339(), document_id],
            )?;
            tx.commit()?;
            load_document(conn, &document_id)
        })
        .await
    }

    async fn unarchive(&self, document_id: &str) -> Result<Document> {
        let document_id = document_id.to_string();
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            if !load_document(&tx, &document_id)?.is_archived() {
                return Err(EngineError::InvalidState(format!(
                    "document {} is not archived",
                    document_id
                )));
            }
            tx.execute(
                "UPDATE documents SET archived_date = NULL WHERE id = ?",
                params![document_id],
            )?;
            tx.commit()?;
            load_document(conn, &document_id)
        })
        .await
    }

    async fn list(&self, archived: bool) -> Result<Vec<Document>> {
        let filter = if archived {
            "archived_date IS NOT NULL"
        } else {
            "archived_date IS NULL"
        };
        self.run(move |conn| {
            let ids: Vec<String> = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT id FROM documents WHERE {} ORDER BY created_seq",
                    filter
                ))?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            ids.iter().map(|id| load_document(conn, id)).collect()
        })
        .await
    }

    async fn get_by_id(&self, document_id: &str) -> Result<Document> {
        let document_id = document_id.to_string();
        self.run(move |conn| load_document(conn, &document_id)).await
    }
}

// =============================================================================
// Signers
// =============================================================================

impl SqliteStore {
    async fn update_signer<F>(&self, signer_id: &str, f: F) -> Result<Signer>
    where
        F: FnOnce(&mut Signer) -> Result<()> + Send + 'static,
    {
        let signer_id = signer_id.to_string();
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            let mut signer = load_signer(&tx, &signer_id)?;
            f(&mut signer)?;
            save_signer(&tx, &signer)?;
            tx.commit()?;
            Ok(signer)
        })
        .await
    }
}

#[async_trait]
impl SignerStore for SqliteStore {
    async fn attach(&self, document_id: &str, info: SignerInfo) -> Result<Signer> {
        info.validate()?;
        let signer = info.into_signer(document_id);
        let row = signer.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO signers (id, document_id, display_name, email, state, archived_from,
                                      created_seq, created_date, signed_date, signature_image)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL,
                         (SELECT COALESCE(MAX(created_seq), 0) + 1 FROM signers), ?6, NULL, NULL)",
                params![
                    row.id,
                    row.document_id,
                    row.display_name,
                    row.email,
                    row.state.as_str(),
                    row.created_date.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;

        info!(signer_id = %signer.id, document_id, "Attached signer");
        Ok(signer)
    }

    async fn get(&self, signer_id: &str) -> Result<Signer> {
        let signer_id = signer_id.to_string();
        self.run(move |conn| load_signer(conn, &signer_id)).await
    }

    async fn mark_signed(
        &self,
        signer_id: &str,
        signature_image: Vec<u8>,
        signed_date: DateTime<Utc>,
    ) -> Result<Signer> {
        self.update_signer(signer_id, move |s| s.sign(signature_image, signed_date))
            .await
    }

    async fn clear_signature(&self, signer_id: &str) -> Result<Signer> {
        self.update_signer(signer_id, |s| s.clear_signature()).await
    }

    async fn archive(&self, signer_id: &str) -> Result<Signer> {
        self.update_signer(signer_id, |s| s.archive()).await
    }

    async fn unarchive(&self, signer_id: &str) -> Result<Signer> {
        self.update_signer(signer_id, |s| s.unarchive()).await
    }

    async fn hard_delete(&self, signer_id: &str) -> Result<()> {
        let id = signer_id.to_string();
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            load_signer(&tx, &id)?.ensure_deletable()?;
            tx.execute("DELETE FROM signers WHERE id = ?", params![id])?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        info!(signer_id, "Deleted archived signer");
        Ok(())
    }

    async fn list_by_document(&self, document_id: &str, archived: bool) -> Result<Vec<Signer>> {
        let filter = if archived {
            "WHERE document_id = ?1 AND state = 'archived'"
        } else {
            "WHERE document_id = ?1 AND state != 'archived'"
        };
        let document_id = document_id.to_string();
        self.run(move |conn| query_signers(conn, filter, &[&document_id as &dyn rusqlite::ToSql]))
            .await
    }

    async fn list_all(&self) -> Result<Vec<Signer>> {
        self.run(|conn| query_signers(conn, "", &[])).await
    }

    async fn list_archived(&self) -> Result<Vec<Signer>> {
        self.run(|conn| query_signers(conn, "WHERE state = 'archived'", &[]))
            .await
    }

    async fn get_by_email(&self, email: &str) -> Result<SignerName> {
        let email = email.trim().to_lowercase();
        self.run(move |conn| {
            conn.query_row(
                "SELECT display_name FROM signers WHERE email = ? ORDER BY created_seq DESC LIMIT 1",
                params![email],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|display_name| SignerName { display_name })
            .ok_or_else(|| EngineError::NotFound("no signer with this email".into()))
        })
        .await
    }
}
