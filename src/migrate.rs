//! Schema migrations.
//!
//! Six tables: three document tables (`cards`, `rules`, `glossary_terms`),
//! each paired with an embedding table holding one vector per
//! `(document_id, model)`. Embedding rows cascade on document deletion.
//! All statements are idempotent; `tutor init` can be re-run safely.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the full schema to an already-connected pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Cards: natural key is the (per-face) card name. The full card JSON is
    // authoritative; the scalar columns are denormalized projections for
    // filterable querying.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cards (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            card_data TEXT NOT NULL,
            text_content TEXT NOT NULL DEFAULT '',
            card_type TEXT NOT NULL DEFAULT '',
            colors TEXT NOT NULL DEFAULT '[]',
            mana_value REAL NOT NULL DEFAULT 0,
            keywords TEXT NOT NULL DEFAULT '[]',
            legalities TEXT NOT NULL DEFAULT '{}',
            related_faces TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS card_embeddings (
            card_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            text_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(card_id, model),
            FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rules: natural key is the rule number ("104.3a").
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rules (
            id TEXT PRIMARY KEY,
            rule_number TEXT NOT NULL UNIQUE,
            text TEXT NOT NULL,
            rule_type TEXT NOT NULL,
            section_parent TEXT NOT NULL,
            section_number TEXT NOT NULL,
            section_name TEXT NOT NULL,
            parent_rule TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_embeddings (
            rule_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            text_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(rule_id, model),
            FOREIGN KEY (rule_id) REFERENCES rules(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Glossary: natural key is the term.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS glossary_terms (
            id TEXT PRIMARY KEY,
            term TEXT NOT NULL UNIQUE,
            definition TEXT NOT NULL,
            related_rules TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS glossary_embeddings (
            term_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            text_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(term_id, model),
            FOREIGN KEY (term_id) REFERENCES glossary_terms(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the denormalized filter columns
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_card_type ON cards(card_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_section_number ON rules(section_number)")
        .execute(pool)
        .await?;

    Ok(())
}
