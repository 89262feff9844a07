//! Error taxonomy shared by the stores and the hybrid index.
//!
//! Every variant carries the name of the operation that failed. Errors raised by a store
//! propagate through the index unchanged, so the operation name tells a caller whether the
//! failure came from an adapter (`insert_rows`, `batch_insert`, ...) or from the index's own
//! pre-flight checks (`insert`, `bind_table`, ...).

use thiserror::Error;

use super::schema::SchemaViolation;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{operation}: schema error: {violation}")]
    Schema {
        operation: &'static str,
        violation: SchemaViolation,
    },

    #[error("{operation}: invalid `{field}`: {message}")]
    Validation {
        operation: &'static str,
        field: String,
        message: String,
    },

    #[error("{operation}: constraint violated{}: {source}", identity_suffix(.identities))]
    Constraint {
        operation: &'static str,
        /// Identities known to collide, when the caller could tell.
        identities: Vec<String>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{operation}: {entity} `{name}` not found")]
    NotFound {
        operation: &'static str,
        entity: &'static str,
        name: String,
    },

    #[error("{operation}: no table is bound (call bind_table first)")]
    NotBound { operation: &'static str },

    #[error(
        "{operation}: vector write failed after {} row(s) were committed to the relational store: {source}",
        .committed.len()
    )]
    PartialWrite {
        operation: &'static str,
        /// Identities present in the relational store but missing from the vector store.
        committed: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("{operation}: sqlite error: {source}")]
    Sqlite {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{operation}: embedding failed: {message}")]
    Embedding {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation}: json error: {source}")]
    Json {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation}: invalid configuration: {message}")]
    Config {
        operation: &'static str,
        message: String,
    },
}

/// Coarse classification matching the documented taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Validation,
    Constraint,
    NotFound,
    NotBound,
    PartialWrite,
    Store,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } => ErrorKind::Schema,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotBound { .. } => ErrorKind::NotBound,
            Self::PartialWrite { .. } => ErrorKind::PartialWrite,
            Self::Sqlite { .. } | Self::Embedding { .. } | Self::Io { .. } | Self::Json { .. } => {
                ErrorKind::Store
            }
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Schema { operation, .. }
            | Self::Validation { operation, .. }
            | Self::Constraint { operation, .. }
            | Self::NotFound { operation, .. }
            | Self::NotBound { operation }
            | Self::PartialWrite { operation, .. }
            | Self::Sqlite { operation, .. }
            | Self::Embedding { operation, .. }
            | Self::Io { operation, .. }
            | Self::Json { operation, .. }
            | Self::Config { operation, .. } => operation,
        }
    }

    pub(crate) fn schema(operation: &'static str, violation: SchemaViolation) -> Self {
        Self::Schema {
            operation,
            violation,
        }
    }

    pub(crate) fn validation(
        operation: &'static str,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            operation,
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(
        operation: &'static str,
        entity: &'static str,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            operation,
            entity,
            name: name.into(),
        }
    }

    /// Wrap a rusqlite error, lifting constraint violations into `Constraint`.
    pub(crate) fn sqlite(operation: &'static str, source: rusqlite::Error) -> Self {
        match source.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => Self::Constraint {
                operation,
                identities: Vec::new(),
                source,
            },
            _ => Self::Sqlite { operation, source },
        }
    }

    /// Attach the colliding identities to a `Constraint` error; other errors pass through.
    pub(crate) fn with_identities(self, ids: Vec<String>) -> Self {
        match self {
            Self::Constraint {
                operation, source, ..
            } => Self::Constraint {
                operation,
                identities: ids,
                source,
            },
            other => other,
        }
    }
}

fn identity_suffix(ids: &[String]) -> String {
    match ids {
        [] => String::new(),
        [id] => format!(" for identity '{}'", id),
        ids => format!(" for identities '{}'", ids.join("', '")),
    }
}

/// Shorthand for `map_err(|e| Error::sqlite(op, e))`.
pub(crate) trait SqliteResultExt<T> {
    fn op(self, operation: &'static str) -> Result<T>;
}

impl<T> SqliteResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn op(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| Error::sqlite(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_constraint_violation_is_lifted() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .op("insert_rows")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        assert_eq!(err.operation(), "insert_rows");
        assert!(err.to_string().contains("UNIQUE"));

        let err = err.with_identities(vec!["a".into()]);
        assert!(err.to_string().contains("for identity 'a'"));
        assert_eq!(err.kind(), ErrorKind::Constraint);
    }

    #[test]
    fn test_other_sqlite_errors_stay_store_errors() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing", []).op("query").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[test]
    fn test_partial_write_message_counts_committed_ids() {
        let err = Error::PartialWrite {
            operation: "insert",
            committed: vec!["a".into(), "b".into()],
            source: Box::new(Error::Embedding {
                operation: "batch_insert",
                message: "boom".into(),
            }),
        };
        assert!(err.to_string().contains("2 row(s)"));
        assert_eq!(err.kind(), ErrorKind::PartialWrite);
    }
}
