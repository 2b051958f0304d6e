//! Generic document + embedding repository.
//!
//! One [`Repository`] serves all three document kinds; the kind-specific
//! pieces come from [`DocumentKind`]. Document upsert matches on the natural
//! key and preserves the surrogate id; embedding upsert is a single atomic
//! replace per `(document_id, model)`, so a concurrent reader never observes
//! a half-written vector. Nearest-neighbor ranking runs here over the stored
//! BLOB vectors.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::marker::PhantomData;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::kinds::DocumentKind;

pub struct Repository<K: DocumentKind> {
    pool: SqlitePool,
    _kind: PhantomData<K>,
}

impl<K: DocumentKind> Repository<K> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _kind: PhantomData,
        }
    }

    /// Upsert a document by natural key and return its surrogate id.
    ///
    /// Safe to call repeatedly with identical input: the row is updated in
    /// place and the id assigned on first insert never changes.
    pub async fn upsert(&self, record: &K) -> Result<String> {
        let select = format!(
            "SELECT id FROM {} WHERE {} = ?",
            K::TABLE,
            K::KEY_COLUMN
        );
        let existing: Option<String> = sqlx::query_scalar(&select)
            .bind(record.natural_key().to_string())
            .fetch_optional(&self.pool)
            .await?;

        let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = chrono::Utc::now().timestamp();

        let query = sqlx::query(K::upsert_sql());
        record
            .bind_upsert(id.clone(), now, query)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    /// Replace the embedding row for `(document_id, model)`.
    ///
    /// The vector length is validated against `dims` before any store write.
    /// The replace is one statement, atomic from a reader's point of view.
    pub async fn upsert_embedding(
        &self,
        document_id: &str,
        model: &str,
        dims: usize,
        text_hash: &str,
        vector: &[f32],
    ) -> Result<()> {
        if vector.len() != dims {
            bail!(
                "refusing to store {} embedding of length {} (declared dims {})",
                K::KIND,
                vector.len(),
                dims
            );
        }

        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            r#"
            INSERT INTO {table} ({fk}, model, dims, embedding, text_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT({fk}, model) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding,
                text_hash = excluded.text_hash,
                created_at = excluded.created_at
            "#,
            table = K::EMBEDDING_TABLE,
            fk = K::FK_COLUMN,
        );

        sqlx::query(&sql)
            .bind(document_id.to_string())
            .bind(model.to_string())
            .bind(dims as i64)
            .bind(vec_to_blob(vector))
            .bind(text_hash.to_string())
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Stored input-text hash for `(document_id, model)`, if an embedding
    /// row exists. Used to skip regeneration for unchanged text.
    pub async fn embedding_hash(&self, document_id: &str, model: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT text_hash FROM {} WHERE {} = ? AND model = ?",
            K::EMBEDDING_TABLE,
            K::FK_COLUMN
        );
        let hash: Option<String> = sqlx::query_scalar(&sql)
            .bind(document_id.to_string())
            .bind(model.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(hash)
    }

    /// Delete every document and embedding row for this kind. Destructive;
    /// only invoked behind the explicit `--clear` flag.
    pub async fn clear_all(&self) -> Result<u64> {
        let del_embeddings = format!("DELETE FROM {}", K::EMBEDDING_TABLE);
        sqlx::query(&del_embeddings).execute(&self.pool).await?;

        let del_documents = format!("DELETE FROM {}", K::TABLE);
        let result = sqlx::query(&del_documents).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Rank documents by cosine similarity to `query_vector`.
    ///
    /// Only embeddings produced by `model` participate. Results carry
    /// similarity strictly greater than `threshold`, ordered descending,
    /// capped at `limit`.
    pub async fn find_nearest(
        &self,
        query_vector: &[f32],
        model: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<(K, f32)>> {
        let sql = format!(
            r#"
            SELECT d.*, e.embedding AS embedding_blob
            FROM {table} d
            JOIN {etable} e ON e.{fk} = d.id
            WHERE e.model = ?
            "#,
            table = K::TABLE,
            etable = K::EMBEDDING_TABLE,
            fk = K::FK_COLUMN,
        );

        let rows = sqlx::query(&sql)
            .bind(model.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut matches: Vec<(K, f32)> = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = sqlx::Row::get(row, "embedding_blob");
            let vector = blob_to_vec(&blob);
            let similarity = cosine_similarity(query_vector, &vector);
            if similarity > threshold {
                matches.push((K::from_row(row)?, similarity));
            }
        }

        matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    pub async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", K::TABLE);
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    pub async fn embedded_count(&self) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(DISTINCT {}) FROM {}",
            K::FK_COLUMN,
            K::EMBEDDING_TABLE
        );
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    /// Distinct model identifiers present in this kind's embedding table.
    pub async fn stored_models(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT DISTINCT model FROM {}", K::EMBEDDING_TABLE);
        Ok(sqlx::query_scalar(&sql).fetch_all(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::Card;
    use crate::migrate;
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

    fn card(name: &str, text: &str) -> Card {
        Card {
            name: name.to_string(),
            card_data: serde_json::json!({ "name": name, "text": text }),
            text_content: text.to_string(),
            card_type: "Instant".to_string(),
            colors: vec!["R".to_string()],
            mana_value: 1.0,
            keywords: vec![],
            legalities: serde_json::json!({}),
            related_faces: None,
        }
    }

    #[tokio::test]
    async fn upsert_same_key_preserves_id_and_row_count() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let first = repo.upsert(&card("Shock", "Deals 2 damage.")).await.unwrap();
        let second = repo
            .upsert(&card("Shock", "Shock deals 2 damage to any target."))
            .await
            .unwrap();

        assert_eq!(first, second, "surrogate id must not churn on re-ingest");
        assert_eq!(repo.count().await.unwrap(), 1);

        // Payload was updated, not duplicated
        let text: String = sqlx::query_scalar("SELECT text_content FROM cards WHERE name = ?")
            .bind("Shock")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(text, "Shock deals 2 damage to any target.");
    }

    #[tokio::test]
    async fn embedding_upsert_replaces_per_document_and_model() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let id = repo.upsert(&card("Shock", "x")).await.unwrap();
        repo.upsert_embedding(&id, "test-model", 4, "h1", &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();
        repo.upsert_embedding(&id, "test-model", 4, "h2", &[0.0, 1.0, 0.0, 0.0])
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_embeddings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "re-ingestion replaces, never appends");

        assert_eq!(
            repo.embedding_hash(&id, "test-model").await.unwrap(),
            Some("h2".to_string())
        );
    }

    #[tokio::test]
    async fn embeddings_from_two_models_coexist() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let id = repo.upsert(&card("Shock", "x")).await.unwrap();
        repo.upsert_embedding(&id, "model-a", 4, "h", &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();
        repo.upsert_embedding(&id, "model-b", 4, "h", &[0.0, 1.0, 0.0, 0.0])
            .await
            .unwrap();

        let mut models = repo.stored_models().await.unwrap();
        models.sort();
        assert_eq!(models, vec!["model-a".to_string(), "model-b".to_string()]);
    }

    #[tokio::test]
    async fn wrong_length_vector_rejected_before_store_write() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let id = repo.upsert(&card("Shock", "x")).await.unwrap();
        let err = repo
            .upsert_embedding(&id, "test-model", 4, "h", &[1.0, 0.0])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("length 2"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_embeddings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0, "nothing may be written on a dimension mismatch");
    }

    #[tokio::test]
    async fn deleting_a_document_cascades_to_exactly_its_embeddings() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let shock = repo.upsert(&card("Shock", "x")).await.unwrap();
        let bolt = repo.upsert(&card("Lightning Bolt", "y")).await.unwrap();
        repo.upsert_embedding(&shock, "test-model", 4, "h", &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();
        repo.upsert_embedding(&bolt, "test-model", 4, "h", &[0.0, 1.0, 0.0, 0.0])
            .await
            .unwrap();

        sqlx::query("DELETE FROM cards WHERE name = ?")
            .bind("Shock")
            .execute(&pool)
            .await
            .unwrap();

        let remaining: Vec<String> = sqlx::query_scalar("SELECT card_id FROM card_embeddings")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![bolt]);
    }

    #[tokio::test]
    async fn find_nearest_respects_threshold_order_and_limit() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let specs = [
            ("Shock", [1.0, 0.0, 0.0, 0.0]),
            ("Lava Spike", [0.9, 0.1, 0.0, 0.0]),
            ("Counterspell", [0.0, 1.0, 0.0, 0.0]),
        ];
        for (name, vector) in &specs {
            let id = repo.upsert(&card(name, "x")).await.unwrap();
            repo.upsert_embedding(&id, "test-model", 4, "h", vector)
                .await
                .unwrap();
        }

        let query = [1.0, 0.0, 0.0, 0.0];
        let results = repo
            .find_nearest(&query, "test-model", 0.5, 10)
            .await
            .unwrap();

        let names: Vec<&str> = results.iter().map(|(c, _)| c.name.as_str()).collect();
        assert_eq!(names, vec!["Shock", "Lava Spike"]);
        assert!((results[0].1 - 1.0).abs() < 1e-6);
        for window in results.windows(2) {
            assert!(window[0].1 >= window[1].1, "similarity must be descending");
        }
        for (_, similarity) in &results {
            assert!(*similarity > 0.5);
        }

        let capped = repo
            .find_nearest(&query, "test-model", 0.5, 1)
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn find_nearest_ignores_other_models() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let id = repo.upsert(&card("Shock", "x")).await.unwrap();
        repo.upsert_embedding(&id, "other-model", 4, "h", &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();

        let results = repo
            .find_nearest(&[1.0, 0.0, 0.0, 0.0], "test-model", 0.0, 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn clear_all_empties_both_tables() {
        let pool = test_pool().await;
        let repo: Repository<Card> = Repository::new(pool.clone());

        let id = repo.upsert(&card("Shock", "x")).await.unwrap();
        repo.upsert_embedding(&id, "test-model", 4, "h", &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();

        let deleted = repo.clear_all().await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.count().await.unwrap(), 0);
        assert_eq!(repo.embedded_count().await.unwrap(), 0);
    }
}
