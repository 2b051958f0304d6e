use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_startup_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_failure_ratio")]
    pub max_failure_ratio: f64,
    /// Keep going with the remaining kinds when one kind's pipeline fails.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            max_failure_ratio: default_max_failure_ratio(),
            continue_on_error: false,
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_failure_ratio() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            limit: default_limit(),
        }
    }
}

fn default_threshold() -> f32 {
    0.7
}
fn default_limit() -> usize {
    10
}

/// Paths to the three source files, one per document kind.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    pub cards: PathBuf,
    pub rules: PathBuf,
    pub glossary: PathBuf,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate embedding
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    // Validate ingest
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if !(0.0..=1.0).contains(&config.ingest.max_failure_ratio) {
        anyhow::bail!("ingest.max_failure_ratio must be in [0.0, 1.0]");
    }

    // Validate search
    if !(0.0..=1.0).contains(&config.search.threshold) {
        anyhow::bail!("search.threshold must be in [0.0, 1.0]");
    }
    if config.search.limit < 1 {
        anyhow::bail!("search.limit must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("tutor.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[db]
path = "data/tutor.sqlite"

[embedding]
model = "embeddinggemma:300m"
dims = 768

[sources]
cards = "data/cards.json"
rules = "data/rules.json"
glossary = "data/glossary.txt"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), MINIMAL);
        let cfg = load_config(&path).unwrap();

        assert_eq!(cfg.embedding.endpoint, "http://localhost:11434");
        assert_eq!(cfg.ingest.batch_size, 100);
        assert_eq!(cfg.ingest.max_retries, 3);
        assert!(!cfg.ingest.continue_on_error);
        assert!((cfg.search.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.search.limit, 10);
    }

    #[test]
    fn zero_dims_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let body = MINIMAL.replace("dims = 768", "dims = 0");
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let body = format!("{}\n[search]\nthreshold = 1.5\n", MINIMAL);
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn out_of_range_failure_ratio_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let body = format!("{}\n[ingest]\nmax_failure_ratio = 2.0\n", MINIMAL);
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }
}
