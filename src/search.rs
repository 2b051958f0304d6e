//! Similarity search facade.
//!
//! Embeds the query text and delegates ranking entirely to the repository's
//! nearest-neighbor query — no re-ranking here. The query-time model must
//! match the model that produced the stored embeddings; cosine similarity
//! across different embedding spaces is meaningless, so a mismatch is a
//! configuration error, not something to tolerate silently.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::{Embedder, OllamaClient};
use crate::kinds::{Card, DocumentKind, GlossaryTerm, Rule};
use crate::repo::Repository;

pub async fn run_search(
    config: &Config,
    kind: &str,
    query: &str,
    threshold: Option<f32>,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    match kind {
        "cards" | "rules" | "glossary" => {}
        other => bail!(
            "Unknown document kind: '{}'. Available: cards, rules, glossary",
            other
        ),
    }

    let threshold = threshold.unwrap_or(config.search.threshold);
    let limit = limit.unwrap_or(config.search.limit);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("threshold must be in [0.0, 1.0]");
    }

    let embedder = OllamaClient::new(&config.embedding)?;
    let pool = db::connect(config).await?;

    match kind {
        "cards" => search_kind::<Card>(&pool, &embedder, query, threshold, limit).await?,
        "rules" => search_kind::<Rule>(&pool, &embedder, query, threshold, limit).await?,
        _ => search_kind::<GlossaryTerm>(&pool, &embedder, query, threshold, limit).await?,
    }

    pool.close().await;
    Ok(())
}

pub(crate) async fn search_kind<K: DocumentKind>(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    query: &str,
    threshold: f32,
    limit: usize,
) -> Result<()> {
    let repo: Repository<K> = Repository::new(pool.clone());

    let stored = repo.stored_models().await?;
    if stored.is_empty() {
        // Nothing ingested for this kind; no point embedding the query.
        println!("No results.");
        return Ok(());
    }
    if !stored.iter().any(|m| m == embedder.model()) {
        bail!(
            "model mismatch for {}: stored embeddings were produced by [{}] but the configured model is '{}'",
            K::KIND,
            stored.join(", "),
            embedder.model()
        );
    }

    let query_vector = embedder.embed(query).await?;
    let results = repo
        .find_nearest(&query_vector, embedder.model(), threshold, limit)
        .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("Found {} similar {}:", results.len(), K::KIND);
    println!();
    for (i, (record, similarity)) in results.iter().enumerate() {
        println!(
            "{}. {} (similarity: {:.3})",
            i + 1,
            record.natural_key(),
            similarity
        );
        for line in record.summary() {
            println!("   {line}");
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbedError;
    use crate::kinds::Card;
    use crate::migrate;
    use async_trait::async_trait;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    struct StubEmbedder {
        model: &'static str,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model(&self) -> &str {
            self.model
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
        async fn wait_until_ready(&self) -> Result<(), EmbedError> {
            Ok(())
        }
    }

    fn card(name: &str) -> Card {
        Card {
            name: name.to_string(),
            card_data: serde_json::json!({ "name": name }),
            text_content: String::new(),
            card_type: "Instant".to_string(),
            colors: vec![],
            mana_value: 1.0,
            keywords: vec![],
            legalities: serde_json::json!({}),
            related_faces: None,
        }
    }

    #[tokio::test]
    async fn empty_store_returns_ok_not_error() {
        let pool = test_pool().await;
        let embedder = StubEmbedder {
            model: "test-model",
        };
        search_kind::<Card>(&pool, &embedder, "burn spell", 0.7, 10)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn model_mismatch_is_a_configuration_error() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());
        let id = repo.upsert(&card("Shock")).await.unwrap();
        repo.upsert_embedding(&id, "old-model", 4, "h", &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();

        let embedder = StubEmbedder {
            model: "new-model",
        };
        let err = search_kind::<Card>(&pool, &embedder, "burn spell", 0.7, 10)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model mismatch"));
        assert!(err.to_string().contains("old-model"));
    }

    #[tokio::test]
    async fn matching_model_searches_fine() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());
        let id = repo.upsert(&card("Shock")).await.unwrap();
        repo.upsert_embedding(&id, "test-model", 4, "h", &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();

        let embedder = StubEmbedder {
            model: "test-model",
        };
        search_kind::<Card>(&pool, &embedder, "burn spell", 0.5, 10)
            .await
            .unwrap();
    }
}
