//! Database statistics overview.
//!
//! A quick summary of what's ingested: document counts and embedding
//! coverage per kind. Used by `tutor stats` to give confidence that
//! ingestion worked as expected.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::kinds::{Card, DocumentKind, GlossaryTerm, Rule};
use crate::repo::Repository;

struct KindStats {
    kind: &'static str,
    doc_count: i64,
    embedded_count: i64,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let stats = vec![
        kind_stats::<Card>(&pool).await?,
        kind_stats::<Rule>(&pool).await?,
        kind_stats::<GlossaryTerm>(&pool).await?,
    ];

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("tutor — Database Stats");
    println!("======================");
    println!();
    println!("  Database:  {}", config.db.path.display());
    println!("  Size:      {}", format_bytes(db_size));
    println!();
    println!(
        "  {:<12} {:>10} {:>10} {:>10}",
        "KIND", "DOCS", "EMBEDDED", "COVERAGE"
    );
    println!("  {}", "-".repeat(46));

    let mut total_docs = 0i64;
    let mut total_embedded = 0i64;
    for s in &stats {
        let coverage = if s.doc_count > 0 {
            format!("{}%", (s.embedded_count * 100) / s.doc_count)
        } else {
            "-".to_string()
        };
        println!(
            "  {:<12} {:>10} {:>10} {:>10}",
            s.kind, s.doc_count, s.embedded_count, coverage
        );
        total_docs += s.doc_count;
        total_embedded += s.embedded_count;
    }

    println!("  {}", "-".repeat(46));
    println!(
        "  {:<12} {:>10} {:>10}",
        "total", total_docs, total_embedded
    );
    println!();

    pool.close().await;
    Ok(())
}

async fn kind_stats<K: DocumentKind>(pool: &SqlitePool) -> Result<KindStats> {
    let repo: Repository<K> = Repository::new(pool.clone());
    Ok(KindStats {
        kind: K::KIND,
        doc_count: repo.count().await?,
        embedded_count: repo.embedded_count().await?,
    })
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
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
