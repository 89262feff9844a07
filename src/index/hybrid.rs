//! Hybrid index - one relational table and one vector collection kept in step
//!
//! Every logical row lives in both stores under the same identity. The relational copy holds
//! all columns; the vector copy embeds the semantic field and keeps the remaining columns
//! (identity included) as metadata. A hybrid query evaluates a relational predicate to get
//! the admissible identities, then ranks only those by semantic similarity.
//!
//! Writes are best effort across the two stores: each store's write is atomic on its own,
//! but nothing spans both. A vector failure after the relational commit surfaces as
//! [`Error::PartialWrite`] carrying the committed identities; [`HybridIndex::find_orphans`]
//! reports any such drift later.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::chunker;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::identity::new_id;
use crate::core::row::{identity_text, Row};
use crate::core::schema::{is_identifier, FieldRole, SchemaViolation, TableSchema};
use crate::store::embedding::{Embedder, HtpEmbedder};
use crate::store::relational::RelationalStore;
use crate::store::vector::{MetadataFilter, VectorMatch, VectorStore};

/// The active pairing of a table and a collection of the same name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableBinding {
    pub table_name: String,
    pub schema: TableSchema,
    pub semantic_field: String,
    pub identity_field: String,
}

impl TableBinding {
    pub fn new(
        table_name: impl Into<String>,
        schema: TableSchema,
        semantic_field: impl Into<String>,
        identity_field: impl Into<String>,
    ) -> Result<Self> {
        const OP: &str = "bind_table";
        let binding = Self {
            table_name: table_name.into(),
            schema,
            semantic_field: semantic_field.into(),
            identity_field: identity_field.into(),
        };

        if !is_identifier(&binding.table_name) {
            return Err(Error::schema(
                OP,
                SchemaViolation::InvalidIdentifier(binding.table_name.clone()),
            ));
        }
        if let Some(violation) = binding.schema.validate().into_iter().next() {
            return Err(Error::schema(OP, violation));
        }
        if binding.semantic_field == binding.identity_field {
            return Err(Error::schema(
                OP,
                SchemaViolation::SameField(binding.semantic_field.clone()),
            ));
        }
        binding
            .schema
            .require_text_field(FieldRole::Semantic, &binding.semantic_field)
            .map_err(|v| Error::schema(OP, v))?;
        binding
            .schema
            .require_text_field(FieldRole::Identity, &binding.identity_field)
            .map_err(|v| Error::schema(OP, v))?;
        require_unique(&binding.schema, &binding.identity_field)?;

        Ok(binding)
    }
}

fn require_unique(schema: &TableSchema, identity_field: &str) -> Result<()> {
    match schema.get(identity_field) {
        Some(column) if column.is_unique() => Ok(()),
        Some(column) => Err(Error::schema(
            "bind_table",
            SchemaViolation::NotUnique {
                name: column.name.clone(),
                decl: column.decl.clone(),
            },
        )),
        None => Err(Error::schema(
            "bind_table",
            SchemaViolation::MissingField {
                role: FieldRole::Identity,
                name: identity_field.to_string(),
            },
        )),
    }
}

/// Row and vector counts for the bound table.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub table_name: String,
    pub semantic_field: String,
    pub identity_field: String,
    pub rows: usize,
    pub vectors: usize,
}

/// Identities present in one store but not the other.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanReport {
    /// In the relational table, missing from the vector collection.
    pub missing_vectors: Vec<String>,
    /// In the vector collection, missing from the relational table.
    pub missing_rows: Vec<String>,
}

impl OrphanReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_vectors.is_empty() && self.missing_rows.is_empty()
    }
}

pub struct HybridIndex {
    sql: RelationalStore,
    vectors: VectorStore,
    binding: RwLock<Option<Arc<TableBinding>>>,
}

impl HybridIndex {
    /// Open both stores on disk with the default HTP embedder.
    pub fn open(sql_db_path: &Path, semantic_db_dir: &Path) -> Result<Self> {
        Self::open_with_embedder(sql_db_path, semantic_db_dir, Box::new(HtpEmbedder::new()))
    }

    pub fn open_with_embedder(
        sql_db_path: &Path,
        semantic_db_dir: &Path,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self> {
        let sql = RelationalStore::open(sql_db_path)?;
        let vectors = VectorStore::open(semantic_db_dir, embedder)?;
        Ok(Self::from_stores(sql, vectors))
    }

    /// Both stores in memory (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_embedder(Box::new(HtpEmbedder::new()))
    }

    pub fn open_in_memory_with_embedder(embedder: Box<dyn Embedder>) -> Result<Self> {
        Ok(Self::from_stores(
            RelationalStore::open_in_memory()?,
            VectorStore::open_in_memory(embedder)?,
        ))
    }

    pub fn from_stores(sql: RelationalStore, vectors: VectorStore) -> Self {
        Self {
            sql,
            vectors,
            binding: RwLock::new(None),
        }
    }

    pub fn relational(&self) -> &RelationalStore {
        &self.sql
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn binding(&self) -> Option<Arc<TableBinding>> {
        self.binding
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Snapshot of the binding for one operation; later rebinds do not affect it.
    fn current(&self, operation: &'static str) -> Result<Arc<TableBinding>> {
        self.binding().ok_or(Error::NotBound { operation })
    }

    /// Bind (creating if needed) `table_name` and the collection of the same name.
    ///
    /// Without `schema` the table must already exist and its live schema is used. Binding
    /// twice with the same arguments changes nothing. The identity column must be PRIMARY KEY
    /// or UNIQUE in the table as it exists, not only as declared.
    ///
    /// The new binding and the vector store's active collection are replaced together under
    /// the binding lock; operations already running finish against the binding they started
    /// with.
    pub fn bind_table(
        &self,
        table_name: &str,
        semantic_field: &str,
        identity_field: &str,
        schema: Option<TableSchema>,
    ) -> Result<Arc<TableBinding>> {
        let declared = schema.is_some();
        let schema = match schema {
            Some(schema) => schema,
            None => self.sql.get_schema(table_name)?,
        };
        let binding = TableBinding::new(table_name, schema, semantic_field, identity_field)?;

        let created = declared && self.sql.create_table(table_name, &binding.schema)?;
        if declared && !created {
            require_unique(&self.sql.get_schema(table_name)?, identity_field)?;
        }

        let binding = Arc::new(binding);
        {
            let mut current = self.binding.write().unwrap_or_else(|e| e.into_inner());
            self.vectors.set_collection(table_name)?;
            *current = Some(Arc::clone(&binding));
        }

        info!(
            table = table_name,
            semantic_field,
            identity_field,
            created,
            "bound table"
        );
        Ok(binding)
    }

    /// Insert rows into both stores and return their identities in input order.
    ///
    /// Rows without an identity (or with a null one) get a generated one. With `validate`,
    /// any column not declared in the schema is rejected before anything is written.
    pub fn insert(&self, rows: Vec<Row>, validate: bool) -> Result<Vec<String>> {
        let binding = self.current("insert")?;
        self.insert_bound(&binding, rows, validate)
    }

    fn insert_bound(
        &self,
        binding: &TableBinding,
        mut rows: Vec<Row>,
        validate: bool,
    ) -> Result<Vec<String>> {
        const OP: &str = "insert";
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        for (i, row) in rows.iter().enumerate() {
            check_row(binding, i, row, validate)?;
        }

        let ids: Vec<String> = rows
            .iter_mut()
            .map(|row| {
                let existing = row
                    .get(&binding.identity_field)
                    .and_then(identity_text)
                    .map(str::to_string);
                existing.unwrap_or_else(|| {
                    let id = new_id();
                    row.insert(binding.identity_field.clone(), Value::String(id.clone()));
                    id
                })
            })
            .collect();

        // A relational failure stops here, before the vector store is touched.
        self.sql
            .insert_rows(&binding.table_name, &rows)
            .map_err(|err| match err.kind() {
                ErrorKind::Constraint => {
                    let colliding = self.colliding_ids(binding, &ids);
                    err.with_identities(colliding)
                }
                _ => err,
            })?;

        let partial = |source: Error| Error::PartialWrite {
            operation: OP,
            committed: ids.clone(),
            source: Box::new(source),
        };

        let stored = self.reread(binding, &ids, rows).map_err(partial)?;

        let mut texts = Vec::with_capacity(stored.len());
        let mut metadatas = Vec::with_capacity(stored.len());
        for mut row in stored {
            let text = match row.remove(&binding.semantic_field) {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            texts.push(text);
            metadatas.push(row);
        }

        self.vectors
            .batch_insert_into(&binding.table_name, &texts, &metadatas, Some(&ids))
            .map_err(partial)?;

        info!(table = %binding.table_name, rows = ids.len(), "inserted rows");
        Ok(ids)
    }

    /// Identities of a failed batch that repeat within it or already exist in the table.
    fn colliding_ids(&self, binding: &TableBinding, ids: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut colliding = BTreeSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                colliding.insert(id.clone());
            }
        }

        match self
            .sql
            .select_by_ids(&binding.table_name, &binding.identity_field, ids)
        {
            Ok(existing) => colliding.extend(existing.iter().filter_map(|row| {
                row.get(&binding.identity_field)
                    .and_then(identity_text)
                    .map(str::to_string)
            })),
            Err(e) => debug!(error = %e, "could not look up colliding identities"),
        }
        colliding.into_iter().collect()
    }

    /// Fetch the rows as stored, so the vector metadata carries defaults and the values
    /// after column affinity conversion rather than the caller's raw input.
    fn reread(&self, binding: &TableBinding, ids: &[String], inserted: Vec<Row>) -> Result<Vec<Row>> {
        let mut by_id: HashMap<String, Row> = self
            .sql
            .select_by_ids(&binding.table_name, &binding.identity_field, ids)?
            .into_iter()
            .filter_map(|row| {
                let id = row.get(&binding.identity_field)?.as_str()?.to_string();
                Some((id, row))
            })
            .collect();

        Ok(ids
            .iter()
            .zip(inserted)
            .map(|(id, original)| {
                by_id.remove(id).unwrap_or_else(|| {
                    warn!(table = %binding.table_name, id = %id, "inserted row not found on re-read");
                    original
                })
            })
            .collect())
    }

    /// Split `text` into sentence-aligned chunks and insert one row per chunk.
    ///
    /// Each chunk row is a copy of `metadata` with the semantic field set to the chunk text
    /// and a fresh identity, so `metadata` must set neither field.
    pub fn insert_text_in_chunks(
        &self,
        text: &str,
        metadata: Option<&Row>,
        max_sentences_per_chunk: usize,
        validate: bool,
    ) -> Result<Vec<String>> {
        const OP: &str = "insert_text_in_chunks";
        let binding = self.current(OP)?;

        if max_sentences_per_chunk == 0 {
            return Err(Error::validation(
                OP,
                "max_sentences_per_chunk",
                "must be at least 1",
            ));
        }
        if let Some(metadata) = metadata {
            for (field, role) in [
                (&binding.identity_field, FieldRole::Identity),
                (&binding.semantic_field, FieldRole::Semantic),
            ] {
                if metadata.contains_key(field) {
                    return Err(Error::validation(
                        OP,
                        field.clone(),
                        format!("metadata must not set the {}; it is filled per chunk", role),
                    ));
                }
            }
        }

        let rows: Vec<Row> = chunker::split(text, max_sentences_per_chunk)
            .into_iter()
            .map(|chunk| {
                let mut row = metadata.cloned().unwrap_or_default();
                row.insert(binding.semantic_field.clone(), Value::String(chunk));
                row
            })
            .collect();

        debug!(table = %binding.table_name, chunks = rows.len(), "chunked text");
        self.insert_bound(&binding, rows, validate)
    }

    /// Look rows up by identity in the relational store, in the order requested.
    /// Unknown identities are skipped.
    pub fn get<I, S>(&self, ids: I) -> Result<Vec<Row>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let binding = self.current("get")?;
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let found: HashMap<String, Row> = self
            .sql
            .select_by_ids(&binding.table_name, &binding.identity_field, &ids)?
            .into_iter()
            .filter_map(|row| {
                let id = row.get(&binding.identity_field)?.as_str()?.to_string();
                Some((id, row))
            })
            .collect();

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    pub fn get_one(&self, id: &str) -> Result<Option<Row>> {
        Ok(self.get([id])?.into_iter().next())
    }

    /// Semantic search restricted to rows matching `predicate`.
    ///
    /// `predicate` is SQL placed after `WHERE` verbatim. It is not sanitized: only pass
    /// trusted text, or use [`HybridIndex::hybrid_query_with_params`] for values.
    pub fn hybrid_query(&self, query_text: &str, top_k: usize, predicate: &str) -> Result<Vec<VectorMatch>> {
        self.hybrid_query_with_params(query_text, top_k, predicate, &[])
    }

    /// The relational read and the vector read are separate; no lock spans both. A row
    /// inserted between them may or may not be returned.
    pub fn hybrid_query_with_params(
        &self,
        query_text: &str,
        top_k: usize,
        predicate: &str,
        params: &[Value],
    ) -> Result<Vec<VectorMatch>> {
        const OP: &str = "hybrid_query";
        let binding = self.current(OP)?;
        if predicate.trim().is_empty() {
            return Err(Error::validation(
                OP,
                "predicate",
                "must not be empty (use semantic_query for unfiltered search)",
            ));
        }

        let admissible = self.sql.select_column(
            &binding.table_name,
            &binding.identity_field,
            Some(predicate),
            params,
        )?;
        if admissible.is_empty() {
            debug!(table = %binding.table_name, "predicate matched no rows");
            return Ok(Vec::new());
        }

        debug!(
            table = %binding.table_name,
            admissible = admissible.len(),
            top_k,
            "running filtered vector search"
        );
        let filter = MetadataFilter::In(binding.identity_field.clone(), admissible);
        self.vectors
            .query_collection(&binding.table_name, query_text, top_k, Some(&filter))
    }

    /// Semantic search over the whole bound collection.
    pub fn semantic_query(&self, query_text: &str, top_k: usize) -> Result<Vec<VectorMatch>> {
        let binding = self.current("semantic_query")?;
        self.vectors
            .query_collection(&binding.table_name, query_text, top_k, None)
    }

    pub fn status(&self) -> Result<IndexStatus> {
        let binding = self.current("status")?;
        Ok(IndexStatus {
            table_name: binding.table_name.clone(),
            semantic_field: binding.semantic_field.clone(),
            identity_field: binding.identity_field.clone(),
            rows: self.sql.count_rows(&binding.table_name)?,
            vectors: self.vectors.count(&binding.table_name)?,
        })
    }

    /// Compare identities across the two stores. Detection only; nothing is repaired.
    pub fn find_orphans(&self) -> Result<OrphanReport> {
        let binding = self.current("find_orphans")?;
        let row_ids: BTreeSet<String> = self
            .sql
            .select_column(&binding.table_name, &binding.identity_field, None, &[])?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let vector_ids: BTreeSet<String> =
            self.vectors.ids(&binding.table_name)?.into_iter().collect();

        Ok(OrphanReport {
            missing_vectors: row_ids.difference(&vector_ids).cloned().collect(),
            missing_rows: vector_ids.difference(&row_ids).cloned().collect(),
        })
    }
}

fn check_row(binding: &TableBinding, index: usize, row: &Row, validate: bool) -> Result<()> {
    const OP: &str = "insert";

    if validate {
        if let Some(key) = row.keys().find(|k| !binding.schema.contains(k)) {
            return Err(Error::validation(
                OP,
                key.clone(),
                format!(
                    "row {}: column is not declared in table '{}'",
                    index, binding.table_name
                ),
            ));
        }
    }

    match row.get(&binding.semantic_field) {
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(Error::validation(
                OP,
                binding.semantic_field.clone(),
                format!("row {}: semantic field must be a string", index),
            ))
        }
        None => {
            return Err(Error::validation(
                OP,
                binding.semantic_field.clone(),
                format!("row {}: semantic field is required", index),
            ))
        }
    }

    for column in binding.schema.columns() {
        if column.name == binding.identity_field || !column.is_required() {
            continue;
        }
        if matches!(row.get(&column.name), None | Some(Value::Null)) {
            return Err(Error::validation(
                OP,
                column.name.clone(),
                format!("row {}: column is NOT NULL and has no default", index),
            ));
        }
    }

    match row.get(&binding.identity_field) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(other) => Err(Error::validation(
            OP,
            binding.identity_field.clone(),
            format!("row {}: identity must be a string, got {}", index, other),
        )),
    }
}
