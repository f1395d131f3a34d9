//! Index status overview for `assist status`.
//!
//! Prints one row per configured (program, version): whether a semantic
//! index exists, how many chunks it holds, its dimension, and when it was
//! built.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db;
use crate::semantic_search::IndexStatus;
use crate::services::Services;
use crate::sqlite_store::list_collections;

/// Run the status command. `program` narrows the listing to one program;
/// `all` also lists every stored collection, including stale ones.
pub async fn run_status(
    config: &Config,
    services: &Services,
    program: Option<&str>,
    all: bool,
) -> Result<()> {
    let programs: Vec<_> = services
        .workspace
        .programs()
        .filter(|p| program.map_or(true, |id| p.id == id))
        .collect();
    if let Some(id) = program {
        if programs.is_empty() {
            bail!("Unknown program: {}", id);
        }
    }

    println!("Code Assist Index Status");
    println!("========================");
    println!();
    println!("  Vector store: {}", config.vector_store.provider);
    if config.vector_store.provider == "sqlite" {
        let size = std::fs::metadata(&config.db.path)
            .map(|m| m.len())
            .unwrap_or(0);
        let pool = db::connect(config).await?;
        let collections = list_collections(&pool).await?;
        pool.close().await;
        let points: usize = collections.values().map(|(_, n)| n).sum();
        println!("  Database:     {}", config.db.path.display());
        println!("  Size:         {}", format_bytes(size));
        println!("  Collections:  {} ({} points)", collections.len(), points);
        if all {
            for (name, (dims, n)) in &collections {
                println!("    {:<40} {:>6} dims {:>8} points", name, dims, n);
            }
        }
    }
    println!("  Embeddings:   {} ({})", config.embedding.provider, services.embedder.model_name());
    println!("  LLM:          {} ({})", config.llm.provider, services.llm.model_name());

    if programs.is_empty() {
        println!();
        println!("  No programs configured.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  {:<20} {:<12} {:>8} {:>6}   {}",
        "PROGRAM", "VERSION", "CHUNKS", "DIMS", "INDEXED"
    );
    println!("  {}", "-".repeat(66));

    for p in programs {
        for version in p.versions.keys() {
            let status = services.search.index_status(&p.id, version).await?;
            let marker = if p.current_version.as_deref() == Some(version.as_str()) {
                "*"
            } else {
                ""
            };
            println!(
                "  {:<20} {:<12} {:>8} {:>6}   {}",
                p.id,
                format!("{}{}", version, marker),
                status.chunk_count,
                status.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                indexed_display(&status)
            );
        }
    }
    println!();
    Ok(())
}

fn indexed_display(status: &IndexStatus) -> String {
    match (status.exists, status.indexed_at) {
        (false, _) => "not indexed".to_string(),
        (true, Some(at)) => format_relative(at, Utc::now()),
        (true, None) => "unknown".to_string(),
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - at).num_seconds();
    if delta < 0 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}
