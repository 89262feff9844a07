use std::path::Path;

use anyhow::Result;
use colored::*;
use serde_json::Value;

use super::{load_config, open_with, preview};

pub fn run(
    config_path: Option<&Path>,
    text: &str,
    predicate: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let limit = limit.unwrap_or(config.default_top_k);
    let index = open_with(&config)?;

    let results = match predicate {
        Some(predicate) => index.hybrid_query(text, limit, predicate)?,
        None => index.semantic_query(text, limit)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), text.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {}{}",
        "→".dimmed(),
        results.len(),
        text.cyan(),
        predicate
            .map(|p| format!(" where {}", p).dimmed().to_string())
            .unwrap_or_default()
    );
    println!();

    for (i, result) in results.iter().enumerate() {
        let score_str = format!("{:.2}", result.score);
        let score_colored = if result.score > 0.8 {
            score_str.green()
        } else if result.score > 0.5 {
            score_str.yellow()
        } else {
            score_str.dimmed()
        };

        println!(
            "{}. [{}] {}",
            (i + 1).to_string().bold(),
            score_colored,
            result.id.cyan()
        );
        println!("   {}", preview(&Value::String(result.text.clone()), 100).dimmed());
        println!();
    }

    Ok(())
}
