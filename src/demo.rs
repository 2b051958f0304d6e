//! Canned example queries.
//!
//! `tutor demo` runs a handful of representative searches against each
//! document kind, preceded by the database stats. Handy for eyeballing that
//! an ingested database actually answers sensible questions.

use anyhow::Result;

use crate::config::Config;
use crate::search;
use crate::stats;

const DEMO_THRESHOLD: f32 = 0.5;
const DEMO_LIMIT: usize = 3;

pub async fn run_demo(config: &Config) -> Result<()> {
    stats::run_stats(config).await?;

    let queries: [(&str, &str); 6] = [
        ("cards", "flying creature with lifelink"),
        ("cards", "draw cards when creatures die"),
        ("rules", "how does combat damage work"),
        ("rules", "what happens when you cast a spell"),
        ("glossary", "ability that prevents damage"),
        ("glossary", "turn structure and phases"),
    ];

    for (kind, query) in queries {
        println!("=== {kind}: \"{query}\" ===");
        search::run_search(config, kind, query, Some(DEMO_THRESHOLD), Some(DEMO_LIMIT)).await?;
    }

    Ok(())
}
