//! Vector store using SQLite
//!
//! Collections of `(id, text, metadata, embedding)` entries. Embeddings are stored as BLOBs
//! and similarity is computed in Rust after metadata filters have been pushed down to SQL.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::embedding::{blob_to_embedding, cosine_similarity, embedding_to_blob, Embedder};
use crate::core::error::{Error, Result, SqliteResultExt};
use crate::core::identity::new_id;
use crate::core::row::{to_sql, Row};
use crate::core::schema::SchemaViolation;

pub const VECTOR_DB_FILE: &str = "vectors.db";

/// Metadata filter applied before ranking.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    Eq(String, Value),
    In(String, Vec<Value>),
    And(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// Compile to an SQL condition over the `metadata` column, pushing bind values.
    fn to_sql(&self, binds: &mut Vec<rusqlite::types::Value>) -> String {
        match self {
            Self::Eq(field, value) => {
                binds.push(json_path(field).into());
                binds.push(to_sql(value));
                "json_extract(metadata, ?) = ?".to_string()
            }
            Self::In(_, values) if values.is_empty() => "0".to_string(),
            Self::In(field, values) => {
                // One JSON array parameter keeps large id sets under SQLite's variable limit.
                binds.push(json_path(field).into());
                binds.push(Value::Array(values.clone()).to_string().into());
                "json_extract(metadata, ?) IN (SELECT value FROM json_each(?))".to_string()
            }
            Self::And(filters) if filters.is_empty() => "1".to_string(),
            Self::And(filters) => {
                let parts: Vec<String> = filters.iter().map(|f| f.to_sql(binds)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
    }
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// One ranked match.
#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub metadata: Row,
    /// Cosine similarity, higher is closer.
    pub score: f32,
    /// `1 - score`, lower is closer.
    pub distance: f32,
}

/// Collection catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub embedder: String,
    pub dimension: usize,
    pub created_at: i64,
    pub entries: usize,
}

pub struct VectorStore {
    conn: Mutex<Connection>,
    embedder: Box<dyn Embedder>,
    active: RwLock<Option<String>>,
}

impl VectorStore {
    /// Open or create the store inside `dir`.
    pub fn open(dir: &Path, embedder: Box<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| Error::Io {
            operation: "open_vector_store",
            source,
        })?;
        let path = dir.join(VECTOR_DB_FILE);
        let conn = Connection::open(&path).op("open_vector_store")?;
        Self::init(conn, embedder)
    }

    /// Open in-memory store (for testing)
    pub fn open_in_memory(embedder: Box<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory().op("open_vector_store")?;
        Self::init(conn, embedder)
    }

    fn init(conn: Connection, embedder: Box<dyn Embedder>) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                embedder TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,  -- JSON object
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, id),
                FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
            );
            "#,
        )
        .op("open_vector_store")?;

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            active: RwLock::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the collection if absent and make it the active one.
    pub fn set_collection(&self, name: &str) -> Result<()> {
        self.ensure_collection(name)?;
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(name.to_string());
        Ok(())
    }

    pub fn active_collection(&self) -> Option<String> {
        self.active.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Create the collection if absent; returns `true` when it was created.
    pub fn ensure_collection(&self, name: &str) -> Result<bool> {
        const OP: &str = "set_collection";
        let expected = self.embedder.name();
        let conn = self.lock();

        let existing: Option<String> = conn
            .query_row(
                "SELECT embedder FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .op(OP)?;

        match existing {
            Some(found) if found == expected => Ok(false),
            Some(found) => Err(Error::schema(
                OP,
                SchemaViolation::EmbedderMismatch {
                    collection: name.to_string(),
                    expected,
                    found,
                },
            )),
            None => {
                conn.execute(
                    "INSERT INTO collections (name, embedder, dimension, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        name,
                        expected,
                        self.embedder.dimension() as i64,
                        chrono::Utc::now().timestamp()
                    ],
                )
                .op(OP)?;
                info!(collection = name, embedder = %expected, "created vector collection");
                Ok(true)
            }
        }
    }

    fn require_active(&self, operation: &'static str) -> Result<String> {
        self.active_collection()
            .ok_or_else(|| Error::not_found(operation, "active collection", "<none>"))
    }

    /// Insert into the active collection.
    pub fn batch_insert(
        &self,
        texts: &[String],
        metadatas: &[Row],
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let collection = self.require_active("batch_insert")?;
        self.batch_insert_into(&collection, texts, metadatas, ids)
    }

    /// Embed and store a batch. Everything is embedded before the single write
    /// transaction, so a failed call leaves the collection untouched.
    pub fn batch_insert_into(
        &self,
        collection: &str,
        texts: &[String],
        metadatas: &[Row],
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        const OP: &str = "batch_insert";

        if texts.len() != metadatas.len() {
            return Err(Error::validation(
                OP,
                "metadatas",
                format!("{} texts but {} metadata entries", texts.len(), metadatas.len()),
            ));
        }
        let ids: Vec<String> = match ids {
            Some(ids) if ids.len() != texts.len() => {
                return Err(Error::validation(
                    OP,
                    "ids",
                    format!("{} texts but {} ids", texts.len(), ids.len()),
                ));
            }
            Some(ids) => ids.to_vec(),
            None => texts.iter().map(|_| new_id()).collect(),
        };
        if texts.is_empty() {
            return Ok(ids);
        }

        self.require_collection(OP, collection)?;

        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self.embedder.embed_batch(&refs)?;

        let mut conn = self.lock();
        let tx = conn.transaction().op(OP)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO entries (collection, id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .op(OP)?;
            for (((id, text), metadata), embedding) in
                ids.iter().zip(texts).zip(metadatas).zip(&embeddings)
            {
                let metadata_json = serde_json::to_string(metadata).map_err(|source| Error::Json {
                    operation: OP,
                    source,
                })?;
                stmt.execute(params![
                    collection,
                    id,
                    text,
                    metadata_json,
                    embedding_to_blob(embedding)
                ])
                .op(OP)?;
            }
        }
        tx.commit().op(OP)?;

        debug!(collection, count = ids.len(), "inserted vector entries");
        Ok(ids)
    }

    /// Query the active collection.
    pub fn query(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>> {
        let collection = self.require_active("query")?;
        self.query_collection(&collection, query_text, top_k, filter)
    }

    /// Nearest entries to `query_text`, most similar first. Asking for more than the
    /// collection holds returns what is available.
    pub fn query_collection(
        &self,
        collection: &str,
        query_text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>> {
        const OP: &str = "query";
        self.require_collection(OP, collection)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query_text)?;

        let mut binds: Vec<rusqlite::types::Value> = vec![collection.to_string().into()];
        let mut sql =
            "SELECT id, text, metadata, embedding FROM entries WHERE collection = ?".to_string();
        if let Some(filter) = filter {
            sql.push_str(" AND ");
            sql.push_str(&filter.to_sql(&mut binds));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).op(OP)?;
        let rows = stmt
            .query_map(params_from_iter(binds.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })
            .op(OP)?;

        let mut matches = Vec::new();
        for row in rows {
            let (id, text, metadata_json, blob) = row.op(OP)?;
            let metadata: Row = serde_json::from_str(&metadata_json).map_err(|source| Error::Json {
                operation: OP,
                source,
            })?;
            let score = cosine_similarity(&query_embedding, &blob_to_embedding(&blob));
            matches.push(VectorMatch {
                id,
                text,
                metadata,
                score,
                distance: 1.0 - score,
            });
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    fn require_collection(&self, operation: &'static str, collection: &str) -> Result<()> {
        let exists: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .op(operation)?;
        match exists {
            Some(_) => Ok(()),
            None => Err(Error::not_found(operation, "collection", collection)),
        }
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let n: i64 = self
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .op("count")?;
        Ok(n as usize)
    }

    /// All entry ids of a collection.
    pub fn ids(&self, collection: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM entries WHERE collection = ?1 ORDER BY id")
            .op("ids")?;
        let rows = stmt.query_map(params![collection], |row| row.get(0)).op("ids")?;
        rows.collect::<std::result::Result<Vec<String>, _>>().op("ids")
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        const OP: &str = "list_collections";
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT c.name, c.embedder, c.dimension, c.created_at, COUNT(e.id)
                FROM collections c
                LEFT JOIN entries e ON e.collection = c.name
                GROUP BY c.name
                ORDER BY c.name
                "#,
            )
            .op(OP)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CollectionInfo {
                    name: row.get(0)?,
                    embedder: row.get(1)?,
                    dimension: row.get::<_, i64>(2)? as usize,
                    created_at: row.get(3)?,
                    entries: row.get::<_, i64>(4)? as usize,
                })
            })
            .op(OP)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().op(OP)
    }
}
