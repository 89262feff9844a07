use std::path::PathBuf;

pub const CONFIG_FILE: &str = "semsql.yaml";

/// Default on-disk locations, all relative to a root directory.
pub struct DbPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub sql_db: PathBuf,
    pub semantic_dir: PathBuf,
    pub config: PathBuf,
}

impl DbPaths {
    pub fn new() -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_root(root)
    }

    pub fn from_root(root: PathBuf) -> Self {
        let data = root.join(".semsql");
        Self {
            sql_db: data.join("sql.db"),
            semantic_dir: data.join("semantic"),
            config: root.join(CONFIG_FILE),
            data,
            root,
        }
    }
}

impl Default for DbPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = DbPaths::from_root(PathBuf::from("/tmp/project"));
        assert_eq!(paths.sql_db, PathBuf::from("/tmp/project/.semsql/sql.db"));
        assert_eq!(paths.semantic_dir, PathBuf::from("/tmp/project/.semsql/semantic"));
        assert_eq!(paths.config, PathBuf::from("/tmp/project/semsql.yaml"));
    }
}
