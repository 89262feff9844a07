use std::path::Path;

use anyhow::Result;
use colored::*;

use super::{load_config, open_with};

pub fn run(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let index = open_with(&config)?;
    let status = index.status()?;
    let binding = index
        .binding()
        .ok_or_else(|| anyhow::anyhow!("table binding missing after init"))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "sql_db_path": config.sql_db_path().display().to_string(),
                "semantic_db_dir": config.semantic_db_dir().display().to_string(),
                "binding": &*binding,
                "rows": status.rows,
                "vectors": status.vectors,
            }))?
        );
        return Ok(());
    }

    println!("{}", "semsql init".bold());
    println!("{}", "=".repeat(50));
    println!();
    println!("{} SQL store:    {}", "→".dimmed(), config.sql_db_path().display());
    println!("{} Vector store: {}", "→".dimmed(), config.semantic_db_dir().display());
    println!();
    println!(
        "{} Table {} bound (semantic: {}, identity: {})",
        "✓".green(),
        binding.table_name.cyan(),
        binding.semantic_field.yellow(),
        binding.identity_field.yellow()
    );
    for column in binding.schema.columns() {
        println!("    {} {}", column.name, column.decl.dimmed());
    }
    println!();
    println!(
        "Rows: {}  Vectors: {}",
        status.rows.to_string().cyan(),
        status.vectors.to_string().cyan()
    );

    Ok(())
}
