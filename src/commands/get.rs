use std::path::Path;

use anyhow::Result;
use colored::*;

use super::{open_index, preview};

pub fn run(config_path: Option<&Path>, ids: &[String], json: bool) -> Result<()> {
    let index = open_index(config_path)?;
    let rows = index.get(ids.iter().cloned())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.len() < ids.len() {
        println!(
            "{} {} of {} ids not found",
            "!".yellow().bold(),
            ids.len() - rows.len(),
            ids.len()
        );
        println!();
    }

    for row in &rows {
        for (column, value) in row {
            println!("  {}: {}", column.cyan(), preview(value, 200));
        }
        println!();
    }
    Ok(())
}
