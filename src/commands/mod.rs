//! CLI subcommands. Each opens the index described by the config and binds its table.

pub mod get;
pub mod init;
pub mod insert;
pub mod insert_text;
pub mod query;
pub mod status;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use semantic_sql::{Config, HybridIndex, Row};

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let root = std::env::current_dir().context("cannot read working directory")?;
    Config::discover(path, &root).context("failed to load configuration")
}

/// Open both stores and bind the configured table.
pub fn open_index(path: Option<&Path>) -> Result<HybridIndex> {
    let config = load_config(path)?;
    open_with(&config)
}

pub fn open_with(config: &Config) -> Result<HybridIndex> {
    let table = config
        .table
        .as_ref()
        .ok_or_else(|| anyhow!("no table configured: add a `table` section to semsql.yaml"))?;

    let sql_path = config.sql_db_path();
    let semantic_dir = config.semantic_db_dir();
    let index = HybridIndex::open(&sql_path, &semantic_dir).with_context(|| {
        format!(
            "failed to open stores at {} and {}",
            sql_path.display(),
            semantic_dir.display()
        )
    })?;
    index
        .bind_table(
            &table.name,
            &table.semantic_field,
            &table.identity_field,
            table.schema(),
        )
        .with_context(|| format!("failed to bind table '{}'", table.name))?;
    Ok(index)
}

/// `key=value` pairs into a row. Values that parse as JSON keep their type
/// (`page=3` is a number); anything else is a string.
pub fn parse_meta(pairs: &[String]) -> Result<Row> {
    let mut row = Row::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("empty key in '{}'", pair));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        row.insert(key.to_string(), value);
    }
    Ok(row)
}

/// Single-line preview of a value, char-aware for Unicode.
pub fn preview(value: &Value, max_chars: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let text = text.replace('\n', " ");
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_meta() -> Result<()> {
        let row = parse_meta(&["tag=sports".into(), "page=3".into(), "note=a=b".into()])?;
        assert_eq!(row["tag"], json!("sports"));
        assert_eq!(row["page"], json!(3));
        assert_eq!(row["note"], json!("a=b"));
        assert!(parse_meta(&["novalue".into()]).is_err());
        assert!(parse_meta(&["=x".into()]).is_err());
        Ok(())
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview(&json!("héllo wörld"), 5), "héllo...");
        assert_eq!(preview(&json!("line\nbreak"), 50), "line break");
        assert_eq!(preview(&json!(12), 50), "12");
    }
}
