//! `semsql.yaml` configuration.
//!
//! ```yaml
//! sql_db_path: data/sql.db
//! semantic_db_dir: data/semantic
//! default_top_k: 3
//! max_sentences_per_chunk: 10
//! table:
//!   name: documents
//!   semantic_field: description
//!   identity_field: id
//!   columns:
//!     - { name: id, decl: TEXT PRIMARY KEY }
//!     - { name: description, decl: TEXT NOT NULL }
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use super::paths::DbPaths;
use super::schema::{ColumnDecl, TableSchema};

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MAX_SENTENCES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sql_db_path: Option<PathBuf>,
    #[serde(default)]
    pub semantic_db_dir: Option<PathBuf>,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_sentences")]
    pub max_sentences_per_chunk: usize,
    #[serde(default)]
    pub table: Option<TableConfig>,
    /// Directory relative paths resolve against; not part of the file.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_max_sentences() -> usize {
    DEFAULT_MAX_SENTENCES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub name: String,
    pub semantic_field: String,
    pub identity_field: String,
    /// Omit to bind to a table that already exists.
    #[serde(default)]
    pub columns: Option<Vec<ColumnDecl>>,
}

impl TableConfig {
    pub fn schema(&self) -> Option<TableSchema> {
        self.columns.clone().map(TableSchema::new)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sql_db_path: None,
            semantic_db_dir: None,
            default_top_k: DEFAULT_TOP_K,
            max_sentences_per_chunk: DEFAULT_MAX_SENTENCES,
            table: None,
            base_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn parse(yaml: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml).map_err(|e| Error::Config {
            operation: "load_config",
            message: e.to_string(),
        })?;
        config.base_dir = base_dir.to_path_buf();
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|source| Error::Io {
            operation: "load_config",
            source,
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&yaml, &base_dir)
    }

    /// Load `path` if given, else `semsql.yaml` under `root` if present, else defaults.
    pub fn discover(path: Option<&Path>, root: &Path) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let paths = DbPaths::from_root(root.to_path_buf());
        if paths.config.exists() {
            return Self::load(&paths.config);
        }
        Ok(Self {
            base_dir: root.to_path_buf(),
            ..Self::default()
        })
    }

    fn check(&self) -> Result<()> {
        if self.default_top_k == 0 {
            return Err(Error::Config {
                operation: "load_config",
                message: "default_top_k must be at least 1".into(),
            });
        }
        if self.max_sentences_per_chunk == 0 {
            return Err(Error::Config {
                operation: "load_config",
                message: "max_sentences_per_chunk must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn sql_db_path(&self) -> PathBuf {
        match &self.sql_db_path {
            Some(p) => self.base_dir.join(p),
            None => DbPaths::from_root(self.base_dir.clone()).sql_db,
        }
    }

    pub fn semantic_db_dir(&self) -> PathBuf {
        match &self.semantic_db_dir {
            Some(p) => self.base_dir.join(p),
            None => DbPaths::from_root(self.base_dir.clone()).semantic_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|source| Error::Io {
            operation: "test",
            source,
        })?;
        let config = Config::discover(None, dir.path())?;
        assert_eq!(config.default_top_k, DEFAULT_TOP_K);
        assert_eq!(config.sql_db_path(), dir.path().join(".semsql/sql.db"));
        assert!(config.table.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_table_section() -> Result<()> {
        let yaml = r#"
sql_db_path: db/sql.db
default_top_k: 5
table:
  name: documents
  semantic_field: description
  identity_field: id
  columns:
    - { name: id, decl: TEXT PRIMARY KEY }
    - { name: description, decl: TEXT NOT NULL }
"#;
        let config = Config::parse(yaml, Path::new("/srv/app"))?;
        assert_eq!(config.default_top_k, 5);
        assert_eq!(config.max_sentences_per_chunk, DEFAULT_MAX_SENTENCES);
        assert_eq!(config.sql_db_path(), PathBuf::from("/srv/app/db/sql.db"));
        assert_eq!(config.semantic_db_dir(), PathBuf::from("/srv/app/.semsql/semantic"));

        let table = config.table.as_ref().unwrap();
        let schema = table.schema().unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["id", "description"]);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_limits_and_unknown_keys() {
        assert!(Config::parse("default_top_k: 0", Path::new(".")).is_err());
        assert!(Config::parse("max_sentences_per_chunk: 0", Path::new(".")).is_err());
        assert!(Config::parse("bogus: 1", Path::new(".")).is_err());
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|source| Error::Io {
            operation: "test",
            source,
        })?;
        let path = dir.path().join("semsql.yaml");
        std::fs::write(&path, "semantic_db_dir: vectors\n").map_err(|source| Error::Io {
            operation: "test",
            source,
        })?;
        let config = Config::discover(None, dir.path())?;
        assert_eq!(config.semantic_db_dir(), dir.path().join("vectors"));
        Ok(())
    }
}
