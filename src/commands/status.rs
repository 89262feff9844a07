use std::path::Path;

use anyhow::Result;
use colored::*;
use serde::Serialize;

use semantic_sql::{IndexStatus, OrphanReport};

use super::open_index;

/// Orphans listed in human output before truncating.
const MAX_LISTED: usize = 10;

#[derive(Serialize)]
struct StatusReport {
    timestamp: String,
    #[serde(flatten)]
    status: IndexStatus,
    orphans: OrphanReport,
}

pub fn run(config_path: Option<&Path>, json: bool) -> Result<()> {
    let index = open_index(config_path)?;
    let report = StatusReport {
        timestamp: chrono::Local::now().to_rfc3339(),
        status: index.status()?,
        orphans: index.find_orphans()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let status = &report.status;
    println!("{}", "Index Status".bold());
    println!();
    println!(
        "  {} Table {} (semantic: {}, identity: {})",
        "→".dimmed(),
        status.table_name.cyan(),
        status.semantic_field,
        status.identity_field
    );
    println!("  {} {} rows", "→".dimmed(), status.rows.to_string().cyan());
    println!("  {} {} vectors", "→".dimmed(), status.vectors.to_string().cyan());
    println!();

    if report.orphans.is_consistent() {
        println!("{}", "✓ Stores are consistent".green());
        return Ok(());
    }

    print_orphans("missing from vector store", &report.orphans.missing_vectors);
    print_orphans("missing from relational store", &report.orphans.missing_rows);
    Ok(())
}

fn print_orphans(label: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    println!("{} {} ids {}", "✗".red(), ids.len().to_string().red(), label);
    for id in ids.iter().take(MAX_LISTED) {
        println!("    {}", id);
    }
    if ids.len() > MAX_LISTED {
        println!("    {} and {} more", "…".dimmed(), ids.len() - MAX_LISTED);
    }
}
