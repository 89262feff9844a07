//! Relational store using SQLite
//!
//! Tables are created from a [`TableSchema`] and the declared schema is recorded in a
//! catalog table, so `get_schema` returns exactly what was declared. Tables created outside
//! this store are still readable; their schema is reconstructed from `PRAGMA table_info`.
//!
//! Predicate fragments passed to [`RelationalStore::select`] and friends are appended after
//! `WHERE` as-is. They are a trust boundary: this layer does not sanitize them, it only
//! refuses statements that would write.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Statement};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::error::{Error, Result, SqliteResultExt};
use crate::core::row::{from_sql, to_sql, Row};
use crate::core::schema::{is_identifier, quote_ident, ColumnDecl, SchemaViolation, TableSchema};

const CATALOG_TABLE: &str = "_semsql_schemas";

pub struct RelationalStore {
    conn: Mutex<Connection>,
}

impl RelationalStore {
    /// Open or create database at path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                operation: "open_relational_store",
                source,
            })?;
        }
        let conn = Connection::open(db_path).op("open_relational_store")?;
        Self::init(conn)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().op("open_relational_store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_TABLE} (
                table_name TEXT PRIMARY KEY,
                schema TEXT NOT NULL  -- JSON array of column declarations
            );"
        ))
        .op("open_relational_store")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create `name` with `schema`. Returns `true` when the table was created and `false`
    /// when an identical table already exists; a differing table is a schema error.
    pub fn create_table(&self, name: &str, schema: &TableSchema) -> Result<bool> {
        const OP: &str = "create_table";
        check_identifier(OP, name)?;
        if let Some(violation) = schema.validate().into_iter().next() {
            return Err(Error::schema(OP, violation));
        }

        let mut conn = self.lock();
        let tx = conn.transaction().op(OP)?;

        if table_exists(&tx, name).op(OP)? {
            let recorded = catalog_schema(&tx, name)?;
            let exact = recorded.is_some();
            let live = match recorded {
                Some(recorded) => recorded,
                None => pragma_schema(&tx, name).op(OP)?,
            };
            compare_schemas(name, schema, &live, exact)?;
            debug!(table = name, "table already exists with matching schema");
            return Ok(false);
        }

        tx.execute_batch(&schema.create_sql(name)).op(OP)?;
        let schema_json = serde_json::to_string(schema).map_err(|source| Error::Json {
            operation: OP,
            source,
        })?;
        tx.execute(
            &format!("INSERT OR REPLACE INTO {CATALOG_TABLE} (table_name, schema) VALUES (?1, ?2)"),
            params![name, schema_json],
        )
        .op(OP)?;
        tx.commit().op(OP)?;

        info!(table = name, columns = schema.len(), "created table");
        Ok(true)
    }

    pub fn get_schema(&self, name: &str) -> Result<TableSchema> {
        const OP: &str = "get_schema";
        let conn = self.lock();
        if !table_exists(&conn, name).op(OP)? {
            return Err(Error::not_found(OP, "table", name));
        }
        match catalog_schema(&conn, name)? {
            Some(schema) => Ok(schema),
            None => pragma_schema(&conn, name).op(OP),
        }
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' AND name != ?1 ORDER BY name",
            )
            .op("list_tables")?;
        let rows = stmt
            .query_map(params![CATALOG_TABLE], |row| row.get(0))
            .op("list_tables")?;
        rows.collect::<std::result::Result<Vec<String>, _>>()
            .op("list_tables")
    }

    /// Insert all rows in one transaction: every row lands or none does.
    pub fn insert_rows(&self, name: &str, rows: &[Row]) -> Result<()> {
        const OP: &str = "insert_rows";
        check_identifier(OP, name)?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock();
        let tx = conn.transaction().op(OP)?;
        for row in rows {
            let sql = if row.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", quote_ident(name))
            } else {
                let columns: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
                let placeholders = vec!["?"; row.len()].join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(name),
                    columns.join(", "),
                    placeholders
                )
            };
            let mut stmt = tx.prepare_cached(&sql).op(OP)?;
            stmt.execute(params_from_iter(row.values().map(to_sql)))
                .op(OP)?;
        }
        tx.commit().op(OP)?;

        debug!(table = name, rows = rows.len(), "inserted rows");
        Ok(())
    }

    /// `SELECT * FROM name [WHERE predicate]` as rows.
    pub fn select(&self, name: &str, predicate: Option<&str>, bind: &[Value]) -> Result<Vec<Row>> {
        check_identifier("select", name)?;
        let sql = with_predicate(format!("SELECT * FROM {}", quote_ident(name)), predicate);
        self.query_rows(&sql, bind)
    }

    /// One column of every row matching `predicate`.
    pub fn select_column(
        &self,
        name: &str,
        column: &str,
        predicate: Option<&str>,
        bind: &[Value],
    ) -> Result<Vec<Value>> {
        check_identifier("select", name)?;
        check_identifier("select", column)?;
        let sql = with_predicate(
            format!("SELECT {} FROM {}", quote_ident(column), quote_ident(name)),
            predicate,
        );
        Ok(self
            .query_tuples(&sql, bind)?
            .into_iter()
            .filter_map(|tuple| tuple.into_iter().next())
            .collect())
    }

    /// Rows whose `id_field` is one of `ids`, in table order.
    pub fn select_by_ids(&self, name: &str, id_field: &str, ids: &[String]) -> Result<Vec<Row>> {
        check_identifier("select", name)?;
        check_identifier("select", id_field)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN (SELECT value FROM json_each(?))",
            quote_ident(name),
            quote_ident(id_field),
        );
        let bind = Value::Array(ids.iter().cloned().map(Value::String).collect()).to_string();
        self.query_rows(&sql, &[Value::String(bind)])
    }

    pub fn count_rows(&self, name: &str) -> Result<usize> {
        check_identifier("count_rows", name)?;
        let n: i64 = self
            .lock()
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(name)), [], |row| {
                row.get(0)
            })
            .op("count_rows")?;
        Ok(n as usize)
    }

    /// Run a read-only statement and return column-name keyed rows.
    pub fn query_rows(&self, sql: &str, bind: &[Value]) -> Result<Vec<Row>> {
        const OP: &str = "query";
        let conn = self.lock();
        let mut stmt = prepare_read_only(&conn, sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(bind.iter().map(to_sql)))
            .op(OP)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().op(OP)? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), from_sql(row.get_ref(i).op(OP)?));
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Run a read-only statement and return positional tuples.
    pub fn query_tuples(&self, sql: &str, bind: &[Value]) -> Result<Vec<Vec<Value>>> {
        const OP: &str = "query";
        let conn = self.lock();
        let mut stmt = prepare_read_only(&conn, sql)?;
        let width = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(bind.iter().map(to_sql)))
            .op(OP)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().op(OP)? {
            let mut tuple = Vec::with_capacity(width);
            for i in 0..width {
                tuple.push(from_sql(row.get_ref(i).op(OP)?));
            }
            out.push(tuple);
        }
        Ok(out)
    }
}

fn check_identifier(operation: &'static str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::schema(
            operation,
            SchemaViolation::InvalidIdentifier(name.to_string()),
        ))
    }
}

fn with_predicate(mut sql: String, predicate: Option<&str>) -> String {
    if let Some(predicate) = predicate.map(str::trim).filter(|p| !p.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    sql
}

fn prepare_read_only<'c>(conn: &'c Connection, sql: &str) -> Result<Statement<'c>> {
    let stmt = conn.prepare(sql).op("query")?;
    if !stmt.readonly() {
        return Err(Error::validation(
            "query",
            "sql",
            "only read-only statements are allowed",
        ));
    }
    Ok(stmt)
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn catalog_schema(conn: &Connection, name: &str) -> Result<Option<TableSchema>> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT schema FROM {CATALOG_TABLE} WHERE table_name = ?1"),
            params![name],
            |row| row.get(0),
        )
        .optional()
        .op("get_schema")?;
    raw.map(|json| {
        serde_json::from_str(&json).map_err(|source| Error::Json {
            operation: "get_schema",
            source,
        })
    })
    .transpose()
}

/// Rebuild declarations from `PRAGMA table_info` for tables this store did not create.
fn pragma_schema(conn: &Connection, name: &str) -> rusqlite::Result<TableSchema> {
    struct Info {
        name: String,
        type_name: String,
        not_null: bool,
        default: Option<String>,
        pk: bool,
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
    let infos = stmt
        .query_map([], |row| {
            Ok(Info {
                name: row.get(1)?,
                type_name: row.get(2)?,
                not_null: row.get(3)?,
                default: row.get(4)?,
                pk: row.get::<_, i64>(5)? > 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    // A composite primary key does not make any single column unique.
    let single_pk = infos.iter().filter(|c| c.pk).count() == 1;
    let unique = unique_columns(conn, name)?;

    let columns = infos
        .into_iter()
        .map(|c| {
            let mut decl = vec![c.type_name];
            if c.pk && single_pk {
                decl.push("PRIMARY KEY".into());
            } else if unique.contains(&c.name) {
                decl.push("UNIQUE".into());
            }
            if c.not_null {
                decl.push("NOT NULL".into());
            }
            if let Some(default) = c.default {
                decl.push(format!("DEFAULT {}", default));
            }
            ColumnDecl::new(c.name, decl.join(" ").trim().to_string())
        })
        .collect();
    Ok(TableSchema::new(columns))
}

/// Columns covered on their own by a full (non-partial) unique index.
fn unique_columns(conn: &Connection, name: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(name)))?;
    let indexes = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, bool>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut columns = Vec::new();
    for (index, unique, partial) in indexes {
        if !unique || partial {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&index)))?;
        let names = info
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if let [Some(column)] = names.as_slice() {
            columns.push(column.clone());
        }
    }
    Ok(columns)
}

fn compare_schemas(
    table: &str,
    declared: &TableSchema,
    live: &TableSchema,
    exact: bool,
) -> Result<()> {
    let incompatible = |detail: String| {
        Error::schema(
            "create_table",
            SchemaViolation::Incompatible {
                table: table.to_string(),
                detail,
            },
        )
    };

    let declared_names: Vec<&str> = declared.names().collect();
    let live_names: Vec<&str> = live.names().collect();
    if declared_names != live_names {
        return Err(incompatible(format!(
            "columns {:?} vs existing {:?}",
            declared_names, live_names
        )));
    }

    for (want, have) in declared.columns().iter().zip(live.columns()) {
        // Reconstructed declarations only keep the type reliably, so compare affinity.
        let same = if exact {
            want == have
        } else {
            want.affinity() == have.affinity()
        };
        if !same {
            return Err(incompatible(format!(
                "column '{}' declared as '{}' but exists as '{}'",
                want.name, want.decl, have.decl
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::default()
            .column("id", "TEXT PRIMARY KEY")
            .column("text", "TEXT NOT NULL")
            .column("tag", "TEXT")
            .column("page", "INTEGER")
            .column("created_at", "DATETIME DEFAULT CURRENT_TIMESTAMP")
    }

    fn row(value: Value) -> Row {
        crate::core::row::row_from_json(value).unwrap()
    }

    #[test]
    fn test_create_table_idempotent() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        assert!(db.create_table("docs", &schema())?);
        assert!(!db.create_table("docs", &schema())?);
        assert_eq!(db.get_schema("docs")?, schema());
        assert_eq!(db.list_tables()?, vec!["docs".to_string()]);
        Ok(())
    }

    #[test]
    fn test_create_table_incompatible() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        db.create_table("docs", &schema())?;
        let other = TableSchema::default().column("id", "TEXT PRIMARY KEY");
        let err = db.create_table("docs", &other).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        Ok(())
    }

    #[test]
    fn test_get_schema_missing_and_external() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        assert_eq!(db.get_schema("nope").unwrap_err().kind(), ErrorKind::NotFound);

        db.lock()
            .execute_batch("CREATE TABLE ext (id TEXT PRIMARY KEY, n INTEGER NOT NULL DEFAULT 0)")
            .unwrap();
        let live = db.get_schema("ext")?;
        assert_eq!(live.get("id").unwrap().decl, "TEXT PRIMARY KEY");
        assert_eq!(live.get("n").unwrap().decl, "INTEGER NOT NULL DEFAULT 0");

        // Affinity-compatible redeclaration of an external table is accepted.
        let declared = TableSchema::default()
            .column("id", "TEXT PRIMARY KEY")
            .column("n", "INTEGER");
        assert!(!db.create_table("ext", &declared)?);
        Ok(())
    }

    #[test]
    fn test_external_schema_reports_uniqueness() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        db.lock()
            .execute_batch(
                "CREATE TABLE pairs (a TEXT, b TEXT, slug TEXT UNIQUE, code TEXT, note TEXT, \
                 PRIMARY KEY (a, b)); \
                 CREATE UNIQUE INDEX pairs_code ON pairs (code); \
                 CREATE UNIQUE INDEX pairs_partial ON pairs (note) WHERE note IS NOT NULL;",
            )
            .unwrap();
        let live = db.get_schema("pairs")?;
        assert!(!live.get("a").unwrap().is_unique());
        assert!(!live.get("b").unwrap().is_unique());
        assert!(live.get("slug").unwrap().is_unique());
        assert!(live.get("code").unwrap().is_unique());
        assert!(!live.get("note").unwrap().is_unique());
        Ok(())
    }

    #[test]
    fn test_insert_and_select() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        db.create_table("docs", &schema())?;
        db.insert_rows(
            "docs",
            &[
                row(json!({"id": "a", "text": "first", "tag": "x", "page": 12})),
                row(json!({"id": "b", "text": "second", "tag": "y", "page": 45})),
            ],
        )?;

        let all = db.select("docs", None, &[])?;
        assert_eq!(all.len(), 2);
        assert!(all[0]["created_at"].is_string());

        let filtered = db.select("docs", Some("page > ? AND page < ?"), &[json!(10), json!(40)])?;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["id"], json!("a"));

        let ids = db.select_column("docs", "id", Some("tag = 'y'"), &[])?;
        assert_eq!(ids, vec![json!("b")]);

        let by_id = db.select_by_ids("docs", "id", &["b".into(), "zzz".into()])?;
        assert_eq!(by_id.len(), 1);
        assert_eq!(db.count_rows("docs")?, 2);
        Ok(())
    }

    #[test]
    fn test_insert_is_atomic() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        db.create_table("docs", &schema())?;
        db.insert_rows("docs", &[row(json!({"id": "a", "text": "t"}))])?;

        let err = db
            .insert_rows(
                "docs",
                &[
                    row(json!({"id": "new", "text": "ok"})),
                    row(json!({"id": "a", "text": "duplicate"})),
                ],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        assert_eq!(db.count_rows("docs")?, 1);
        Ok(())
    }

    #[test]
    fn test_missing_required_column() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        db.create_table("docs", &schema())?;
        let err = db
            .insert_rows("docs", &[row(json!({"id": "a", "tag": "x"}))])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        Ok(())
    }

    #[test]
    fn test_query_tuples_and_read_only_guard() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        db.create_table("docs", &schema())?;
        db.insert_rows("docs", &[row(json!({"id": "a", "text": "t", "page": 3}))])?;

        let tuples = db.query_tuples("SELECT id, page FROM docs", &[])?;
        assert_eq!(tuples, vec![vec![json!("a"), json!(3)]]);

        let err = db.query_rows("DELETE FROM docs", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(db.count_rows("docs")?, 1);
        Ok(())
    }

    #[test]
    fn test_invalid_predicate_propagates_sqlite_error() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        db.create_table("docs", &schema())?;
        let err = db.select("docs", Some("no_such_column = 1"), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(err.to_string().contains("no_such_column"));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_identifiers() -> Result<()> {
        let db = RelationalStore::open_in_memory()?;
        let err = db.create_table("docs; DROP", &schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        Ok(())
    }
}
