use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::*;
use serde_json::Value;

use semantic_sql::core::row::row_from_json;
use semantic_sql::Row;

use super::open_index;

pub fn run(config_path: Option<&Path>, file: &Path, validate: bool, json: bool) -> Result<()> {
    let raw = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?
    };
    let rows = parse_rows(&raw)?;

    let index = open_index(config_path)?;
    let ids = index.insert(rows, validate)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "ids": ids }))?);
    } else {
        println!("{} Inserted {} rows", "✓".green().bold(), ids.len().to_string().cyan());
        for id in &ids {
            println!("  {} {}", "→".dimmed(), id);
        }
    }
    Ok(())
}

/// A JSON array of objects, or a single object.
fn parse_rows(raw: &str) -> Result<Vec<Row>> {
    let value: Value = serde_json::from_str(raw).context("input is not valid JSON")?;
    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => bail!("expected a JSON array of row objects"),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| row_from_json(item).with_context(|| format!("row {} is not a JSON object", i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows() -> Result<()> {
        let rows = parse_rows(r#"[{"text": "a"}, {"text": "b", "tag": "x"}]"#)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["tag"], "x");

        assert_eq!(parse_rows(r#"{"text": "single"}"#)?.len(), 1);
        assert!(parse_rows(r#"[{"text": "a"}, 3]"#).is_err());
        assert!(parse_rows("42").is_err());
        Ok(())
    }
}
