//! Source file loading.
//!
//! One loader per document kind. A file whose top-level structure cannot be
//! parsed is a fatal load error; a malformed individual entry is skipped,
//! counted, and reported on stderr so the rest of the file still ingests.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use crate::kinds::{Card, GlossaryTerm, Rule};

/// Records parsed from a source file plus the count of malformed entries
/// that were skipped.
pub struct LoadOutcome<K> {
    pub records: Vec<K>,
    pub skipped: usize,
}

// ============ Cards ============

/// Load cards from a JSON file mapping card name → array of card objects
/// (one per face for double-sided cards).
pub fn load_cards(path: &Path) -> Result<LoadOutcome<Card>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cards file: {}", path.display()))?;
    parse_cards(&content)
}

pub fn parse_cards(content: &str) -> Result<LoadOutcome<Card>> {
    let data: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(content).context("cards file is not a JSON object")?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (key, faces) in &data {
        let Some(faces) = faces.as_array() else {
            eprintln!("Warning: skipping card entry '{key}': not an array");
            skipped += 1;
            continue;
        };
        for face in faces {
            match card_from_value(key, face) {
                Ok(card) => records.push(card),
                Err(reason) => {
                    eprintln!("Warning: skipping card entry '{key}': {reason}");
                    skipped += 1;
                }
            }
        }
    }

    Ok(LoadOutcome { records, skipped })
}

/// Build a [`Card`] from one face object.
///
/// Natural-key derivation mirrors the source data's double-sided card
/// layout: a front face carries `faceName`, a back face is `side = "b"` with
/// the combined "A // B" name, and `asciiName` is preferred whenever present.
fn card_from_value(map_key: &str, value: &serde_json::Value) -> std::result::Result<Card, String> {
    let obj = value.as_object().ok_or("not an object")?;

    let full_name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(map_key)
        .to_string();
    let ascii_name = obj.get("asciiName").and_then(|v| v.as_str());
    let face_name = obj.get("faceName").and_then(|v| v.as_str());
    let side_b = obj.get("side").and_then(|v| v.as_str()) == Some("b");

    let name = if let Some(face) = face_name {
        ascii_name.unwrap_or(face).to_string()
    } else if side_b && full_name.contains("//") {
        let back = full_name
            .split("//")
            .nth(1)
            .map(str::trim)
            .unwrap_or(&full_name);
        ascii_name.unwrap_or(back).to_string()
    } else {
        ascii_name.unwrap_or(&full_name).to_string()
    };

    if name.trim().is_empty() {
        return Err("empty card name".to_string());
    }

    let related_faces = if full_name.contains("//") {
        Some(full_name.clone())
    } else {
        None
    };

    Ok(Card {
        name,
        text_content: obj
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        card_type: obj
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        colors: string_array(obj.get("colors")),
        mana_value: obj
            .get("manaValue")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
        keywords: string_array(obj.get("keywords")),
        legalities: obj
            .get("legalities")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})),
        related_faces,
        card_data: value.clone(),
    })
}

fn string_array(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ============ Rules ============

/// Load rules from a JSON array file.
pub fn load_rules(path: &Path) -> Result<LoadOutcome<Rule>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
    parse_rules(&content)
}

pub fn parse_rules(content: &str) -> Result<LoadOutcome<Rule>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(content).context("rules file is not a JSON array")?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for entry in entries {
        match serde_json::from_value::<Rule>(entry) {
            Ok(rule) => records.push(rule),
            Err(e) => {
                eprintln!("Warning: skipping rule entry: {e}");
                skipped += 1;
            }
        }
    }

    Ok(LoadOutcome { records, skipped })
}

// ============ Glossary ============

/// Load glossary terms from a plain-text file: entries separated by blank
/// lines, first line the term, remaining lines the definition.
pub fn load_glossary(path: &Path) -> Result<LoadOutcome<GlossaryTerm>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read glossary file: {}", path.display()))?;
    Ok(parse_glossary(&content))
}

pub fn parse_glossary(content: &str) -> LoadOutcome<GlossaryTerm> {
    let content = content.trim_start_matches('\u{feff}');

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for raw_entry in content.trim().split("\n\n") {
        let entry = raw_entry.trim();
        if entry.is_empty() {
            continue;
        }

        let lines: Vec<&str> = entry.lines().collect();
        if lines.len() < 2 {
            eprintln!("Warning: skipping glossary entry '{}': no definition", lines[0].trim());
            skipped += 1;
            continue;
        }

        let term = lines[0].trim().to_string();
        let definition = lines[1..].join("\n").trim().to_string();
        let related_rules = extract_rule_references(&definition);

        records.push(GlossaryTerm {
            term,
            definition,
            related_rules,
        });
    }

    LoadOutcome { records, skipped }
}

/// Pull "rule 104.3a" and "section 7" references out of a definition.
fn extract_rule_references(text: &str) -> Vec<String> {
    static RULE_RE: OnceLock<Regex> = OnceLock::new();
    static SECTION_RE: OnceLock<Regex> = OnceLock::new();

    let rule_re =
        RULE_RE.get_or_init(|| Regex::new(r"(?i)rule\s+(\d+(?:\.\d+[a-z]*)?)").unwrap());
    let section_re = SECTION_RE.get_or_init(|| Regex::new(r"(?i)section\s+(\d+)").unwrap());

    let mut refs: BTreeSet<String> = BTreeSet::new();
    for captures in rule_re.captures_iter(text) {
        refs.insert(captures[1].to_string());
    }
    for captures in section_re.captures_iter(text) {
        refs.insert(captures[1].to_string());
    }
    refs.into_iter().collect()
}
