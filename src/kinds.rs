//! Document kinds and their store mappings.
//!
//! The three document kinds (cards, rules, glossary terms) share one
//! document+embedding pattern; [`DocumentKind`] captures the kind-specific
//! pieces — natural key, table names, upsert statement, row mapping,
//! embedding input text — so a single generic [`crate::repo::Repository`]
//! serves all three.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

pub trait DocumentKind: Sized + Send + Sync + Unpin {
    /// Kind name used in CLI arguments, progress output, and summaries.
    const KIND: &'static str;
    const TABLE: &'static str;
    const EMBEDDING_TABLE: &'static str;
    /// Natural-key column in the document table.
    const KEY_COLUMN: &'static str;
    /// Foreign-key column in the embedding table.
    const FK_COLUMN: &'static str;

    /// The stable natural key used for upsert matching.
    fn natural_key(&self) -> &str;

    /// Text representation submitted to the embedding provider.
    fn embedding_text(&self) -> String;

    /// Natural-key upsert. Must leave `id` untouched on conflict so the
    /// surrogate id is stable across re-ingestion.
    fn upsert_sql() -> &'static str;

    /// Bind this record's columns in the order [`upsert_sql`] expects.
    fn bind_upsert<'q>(&self, id: String, now: i64, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    fn from_row(row: &SqliteRow) -> Result<Self>;

    /// Detail lines shown under a search result.
    fn summary(&self) -> Vec<String>;
}

// ============ Cards ============

#[derive(Debug, Clone)]
pub struct Card {
    /// Per-face card name; unique across the table.
    pub name: String,
    /// Full card JSON as supplied by the source file. Authoritative.
    pub card_data: serde_json::Value,
    pub text_content: String,
    pub card_type: String,
    pub colors: Vec<String>,
    pub mana_value: f64,
    pub keywords: Vec<String>,
    pub legalities: serde_json::Value,
    /// Full "A // B" name when this row is one face of a double-sided card.
    pub related_faces: Option<String>,
}

impl DocumentKind for Card {
    const KIND: &'static str = "cards";
    const TABLE: &'static str = "cards";
    const EMBEDDING_TABLE: &'static str = "card_embeddings";
    const KEY_COLUMN: &'static str = "name";
    const FK_COLUMN: &'static str = "card_id";

    fn natural_key(&self) -> &str {
        &self.name
    }

    fn embedding_text(&self) -> String {
        let mut parts = vec![format!("Card: {}", self.name)];
        if !self.card_type.is_empty() {
            parts.push(format!("Type: {}", self.card_type));
        }
        if let Some(cost) = self.card_data.get("manaCost").and_then(|v| v.as_str()) {
            parts.push(format!("Mana Cost: {cost}"));
        }
        if !self.colors.is_empty() {
            parts.push(format!("Colors: {}", self.colors.join(", ")));
        }
        if !self.text_content.is_empty() {
            parts.push(format!("Text: {}", self.text_content));
        }
        let power = self.card_data.get("power").and_then(|v| v.as_str());
        let toughness = self.card_data.get("toughness").and_then(|v| v.as_str());
        if let (Some(p), Some(t)) = (power, toughness) {
            parts.push(format!("P/T: {p}/{t}"));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("Keywords: {}", self.keywords.join(", ")));
        }
        parts.join("\n")
    }

    fn upsert_sql() -> &'static str {
        r#"
        INSERT INTO cards (id, name, card_data, text_content, card_type, colors,
                           mana_value, keywords, legalities, related_faces,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            card_data = excluded.card_data,
            text_content = excluded.text_content,
            card_type = excluded.card_type,
            colors = excluded.colors,
            mana_value = excluded.mana_value,
            keywords = excluded.keywords,
            legalities = excluded.legalities,
            related_faces = excluded.related_faces,
            updated_at = excluded.updated_at
        "#
    }

    fn bind_upsert<'q>(&self, id: String, now: i64, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(id)
            .bind(self.name.clone())
            .bind(self.card_data.to_string())
            .bind(self.text_content.clone())
            .bind(self.card_type.clone())
            .bind(serde_json::json!(self.colors).to_string())
            .bind(self.mana_value)
            .bind(serde_json::json!(self.keywords).to_string())
            .bind(self.legalities.to_string())
            .bind(self.related_faces.clone())
            .bind(now)
            .bind(now)
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let card_data: String = row.get("card_data");
        let colors: String = row.get("colors");
        let keywords: String = row.get("keywords");
        let legalities: String = row.get("legalities");
        Ok(Card {
            name: row.get("name"),
            card_data: serde_json::from_str(&card_data).context("invalid card_data JSON")?,
            text_content: row.get("text_content"),
            card_type: row.get("card_type"),
            colors: serde_json::from_str(&colors).context("invalid colors JSON")?,
            mana_value: row.get("mana_value"),
            keywords: serde_json::from_str(&keywords).context("invalid keywords JSON")?,
            legalities: serde_json::from_str(&legalities).context("invalid legalities JSON")?,
            related_faces: row.get("related_faces"),
        })
    }

    fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!("Type: {}", display_or_na(&self.card_type))];
        let cost = self
            .card_data
            .get("manaCost")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A");
        lines.push(format!("Cost: {cost}"));
        if !self.text_content.is_empty() {
            lines.push(format!("Text: {}", truncate(&self.text_content, 150)));
        }
        lines
    }
}

// ============ Rules ============

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub rule_number: String,
    pub text: String,
    pub rule_type: String,
    pub section_parent: String,
    pub section_number: String,
    pub section_name: String,
    #[serde(default)]
    pub parent_rule: Option<String>,
}

impl DocumentKind for Rule {
    const KIND: &'static str = "rules";
    const TABLE: &'static str = "rules";
    const EMBEDDING_TABLE: &'static str = "rule_embeddings";
    const KEY_COLUMN: &'static str = "rule_number";
    const FK_COLUMN: &'static str = "rule_id";

    fn natural_key(&self) -> &str {
        &self.rule_number
    }

    fn embedding_text(&self) -> String {
        let mut parts = vec![format!("Rule {}", self.rule_number)];
        parts.push(format!("Section: {}", self.section_name));
        parts.push(format!("Type: {}", self.rule_type));
        if let Some(parent) = &self.parent_rule {
            parts.push(format!("Parent Rule: {parent}"));
        }
        parts.push(format!("Text: {}", self.text));
        parts.join("\n")
    }

    fn upsert_sql() -> &'static str {
        r#"
        INSERT INTO rules (id, rule_number, text, rule_type, section_parent,
                           section_number, section_name, parent_rule,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(rule_number) DO UPDATE SET
            text = excluded.text,
            rule_type = excluded.rule_type,
            section_parent = excluded.section_parent,
            section_number = excluded.section_number,
            section_name = excluded.section_name,
            parent_rule = excluded.parent_rule,
            updated_at = excluded.updated_at
        "#
    }

    fn bind_upsert<'q>(&self, id: String, now: i64, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(id)
            .bind(self.rule_number.clone())
            .bind(self.text.clone())
            .bind(self.rule_type.clone())
            .bind(self.section_parent.clone())
            .bind(self.section_number.clone())
            .bind(self.section_name.clone())
            .bind(self.parent_rule.clone())
            .bind(now)
            .bind(now)
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Rule {
            rule_number: row.get("rule_number"),
            text: row.get("text"),
            rule_type: row.get("rule_type"),
            section_parent: row.get("section_parent"),
            section_number: row.get("section_number"),
            section_name: row.get("section_name"),
            parent_rule: row.get("parent_rule"),
        })
    }

    fn summary(&self) -> Vec<String> {
        vec![
            format!("Section: {}", self.section_name),
            format!("Type: {}", self.rule_type),
            format!("Text: {}", truncate(&self.text, 200)),
        ]
    }
}

// ============ Glossary ============

#[derive(Debug, Clone)]
pub struct GlossaryTerm {
    pub term: String,
    pub definition: String,
    /// Rule numbers referenced by the definition, extracted at parse time.
    pub related_rules: Vec<String>,
}

impl DocumentKind for GlossaryTerm {
    const KIND: &'static str = "glossary";
    const TABLE: &'static str = "glossary_terms";
    const EMBEDDING_TABLE: &'static str = "glossary_embeddings";
    const KEY_COLUMN: &'static str = "term";
    const FK_COLUMN: &'static str = "term_id";

    fn natural_key(&self) -> &str {
        &self.term
    }

    fn embedding_text(&self) -> String {
        let mut parts = vec![format!("Term: {}", self.term)];
        parts.push(format!("Definition: {}", self.definition));
        if !self.related_rules.is_empty() {
            parts.push(format!("Related Rules: {}", self.related_rules.join(", ")));
        }
        parts.join("\n")
    }

    fn upsert_sql() -> &'static str {
        r#"
        INSERT INTO glossary_terms (id, term, definition, related_rules,
                                    created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(term) DO UPDATE SET
            definition = excluded.definition,
            related_rules = excluded.related_rules,
            updated_at = excluded.updated_at
        "#
    }

    fn bind_upsert<'q>(&self, id: String, now: i64, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(id)
            .bind(self.term.clone())
            .bind(self.definition.clone())
            .bind(serde_json::json!(self.related_rules).to_string())
            .bind(now)
            .bind(now)
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let related_rules: String = row.get("related_rules");
        Ok(GlossaryTerm {
            term: row.get("term"),
            definition: row.get("definition"),
            related_rules: serde_json::from_str(&related_rules)
                .context("invalid related_rules JSON")?,
        })
    }

    fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!("Definition: {}", truncate(&self.definition, 200))];
        if !self.related_rules.is_empty() {
            let shown: Vec<&str> = self
                .related_rules
                .iter()
                .take(5)
                .map(String::as_str)
                .collect();
            lines.push(format!("Related Rules: {}", shown.join(", ")));
        }
        lines
    }
}

fn display_or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}

/// Truncate on a char boundary, appending "..." when text was cut.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_card() -> Card {
        Card {
            name: "Shock".to_string(),
            card_data: serde_json::json!({
                "name": "Shock",
                "manaCost": "{R}",
                "power": null,
            }),
            text_content: "Shock deals 2 damage to any target.".to_string(),
            card_type: "Instant".to_string(),
            colors: vec!["R".to_string()],
            mana_value: 1.0,
            keywords: vec![],
            legalities: serde_json::json!({"modern": "Legal"}),
            related_faces: None,
        }
    }

    #[test]
    fn card_embedding_text_includes_name_type_and_text() {
        let text = sample_card().embedding_text();
        assert!(text.starts_with("Card: Shock"));
        assert!(text.contains("Type: Instant"));
        assert!(text.contains("Mana Cost: {R}"));
        assert!(text.contains("Colors: R"));
        assert!(text.contains("Text: Shock deals 2 damage to any target."));
        // No keywords, no P/T
        assert!(!text.contains("Keywords:"));
        assert!(!text.contains("P/T:"));
    }

    #[test]
    fn rule_embedding_text_includes_parent_only_for_subrules() {
        let mut rule = Rule {
            rule_number: "104.3a".to_string(),
            text: "A player loses the game.".to_string(),
            rule_type: "subrule".to_string(),
            section_parent: "104".to_string(),
            section_number: "1".to_string(),
            section_name: "Game Concepts".to_string(),
            parent_rule: Some("104.3".to_string()),
        };
        assert!(rule.embedding_text().contains("Parent Rule: 104.3"));

        rule.parent_rule = None;
        assert!(!rule.embedding_text().contains("Parent Rule:"));
    }

    #[test]
    fn glossary_embedding_text_lists_related_rules() {
        let entry = GlossaryTerm {
            term: "Deathtouch".to_string(),
            definition: "A keyword ability. See rule 702.2.".to_string(),
            related_rules: vec!["702.2".to_string()],
        };
        let text = entry.embedding_text();
        assert!(text.starts_with("Term: Deathtouch"));
        assert!(text.contains("Related Rules: 702.2"));
    }

    #[test]
    fn truncate_short_text_unchanged() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly ten", 11), "exactly ten");
    }

    #[test]
    fn truncate_long_text_appends_ellipsis() {
        let out = truncate("abcdefghij", 4);
        assert_eq!(out, "abcd...");
    }
}
