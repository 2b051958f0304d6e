//! Batch ingestion pipeline.
//!
//! Orchestrates, per document kind: load source → upsert documents →
//! generate embeddings → upsert embeddings. The master driver
//! ([`run_ingest`]) runs the kinds in sequence (glossary, rules, cards).
//!
//! Failure containment: a malformed source entry or a record whose
//! embedding fails after bounded retries is skipped and counted, not fatal;
//! the kind aborts only when the failure ratio exceeds the configured
//! threshold, when the store itself errors, or when the embedding service
//! never becomes ready. Cancellation is checked between batches; an
//! in-flight batch always completes so its documents are not left with
//! partial embedding state.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::{Config, IngestConfig};
use crate::db;
use crate::embedding::{EmbedError, Embedder, OllamaClient};
use crate::kinds::{Card, DocumentKind, GlossaryTerm, Rule};
use crate::progress::{IngestEvent, Phase, ProgressReporter};
use crate::repo::Repository;
use crate::sources::{self, LoadOutcome};

/// Terminal state of one kind's pipeline run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineState {
    Completed,
    Failed,
}

/// Outcome of ingesting one document kind.
#[derive(Debug)]
pub struct KindReport {
    pub kind: &'static str,
    pub state: PipelineState,
    /// Records found in the source file, including malformed ones.
    pub attempted: usize,
    pub documents_upserted: usize,
    /// Embedding rows written this run.
    pub embedded: usize,
    /// Records whose stored embedding already matched the input text.
    pub up_to_date: usize,
    /// Malformed source entries plus records dropped after exhausted retries.
    pub skipped: usize,
    /// Per-record fatal errors: dimension mismatches, provider rejections,
    /// constraint violations.
    pub failed: usize,
    pub load_elapsed: Duration,
    pub documents_elapsed: Duration,
    pub embeddings_elapsed: Duration,
    pub error: Option<String>,
}

impl KindReport {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: PipelineState::Failed,
            attempted: 0,
            documents_upserted: 0,
            embedded: 0,
            up_to_date: 0,
            skipped: 0,
            failed: 0,
            load_elapsed: Duration::ZERO,
            documents_elapsed: Duration::ZERO,
            embeddings_elapsed: Duration::ZERO,
            error: None,
        }
    }

    fn failed(kind: &'static str, error: String) -> Self {
        let mut report = Self::new(kind);
        report.error = Some(error);
        report
    }

    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    fn failure_ratio(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        (self.skipped + self.failed) as f64 / self.attempted as f64
    }
}

/// Flags shared by the `ingest` CLI subcommands.
#[derive(Debug, Default)]
pub struct IngestOptions {
    /// Wipe the kind's tables first instead of incremental upsert.
    pub clear: bool,
    /// Parse sources and report counts without touching the store.
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
}

/// Run ingestion for `selector` (`all`, `cards`, `rules`, or `glossary`).
///
/// Returns an error — and the process exits nonzero — when any requested
/// kind ends `Failed` or the embedding service never becomes ready.
pub async fn run_ingest(
    config: &Config,
    selector: &str,
    opts: &IngestOptions,
    reporter: &dyn ProgressReporter,
    stop: &AtomicBool,
) -> Result<()> {
    let kinds: Vec<&str> = match selector {
        "all" => vec!["glossary", "rules", "cards"],
        "glossary" | "rules" | "cards" => vec![selector],
        other => bail!(
            "Unknown document kind: '{}'. Available: all, cards, rules, glossary",
            other
        ),
    };

    if opts.dry_run {
        for kind in &kinds {
            let loaded = load_for(config, kind)?;
            println!("ingest {} (dry-run)", kind);
            println!("  records found: {}", loaded.0);
            println!("  malformed entries skipped: {}", loaded.1);
        }
        return Ok(());
    }

    let embedder = OllamaClient::new(&config.embedding)?;
    embedder.wait_until_ready().await?;

    let pool = db::connect(config).await?;

    let mut cfg = config.ingest.clone();
    if let Some(batch_size) = opts.batch_size {
        cfg.batch_size = batch_size;
    }

    let mut reports: Vec<KindReport> = Vec::new();
    for kind in &kinds {
        let result = match *kind {
            "glossary" => {
                run_kind::<GlossaryTerm>(
                    &pool,
                    &embedder,
                    &cfg,
                    sources::load_glossary,
                    &config.sources.glossary,
                    opts,
                    reporter,
                    stop,
                )
                .await
            }
            "rules" => {
                run_kind::<Rule>(
                    &pool,
                    &embedder,
                    &cfg,
                    sources::load_rules,
                    &config.sources.rules,
                    opts,
                    reporter,
                    stop,
                )
                .await
            }
            _ => {
                run_kind::<Card>(
                    &pool,
                    &embedder,
                    &cfg,
                    sources::load_cards,
                    &config.sources.cards,
                    opts,
                    reporter,
                    stop,
                )
                .await
            }
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => KindReport::failed(kind_name(kind), format!("{e:#}")),
        };

        print_summary(&report);
        let completed = report.is_completed();
        reports.push(report);

        if !completed && !cfg.continue_on_error {
            break;
        }
    }

    pool.close().await;

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| !r.is_completed())
        .map(|r| r.kind)
        .collect();
    let missing = kinds.len() - reports.len();

    if !failed.is_empty() || missing > 0 {
        bail!("ingestion failed for: {}", failed.join(", "));
    }

    println!("ok");
    Ok(())
}

fn kind_name(kind: &str) -> &'static str {
    match kind {
        "glossary" => GlossaryTerm::KIND,
        "rules" => Rule::KIND,
        _ => Card::KIND,
    }
}

fn load_for(config: &Config, kind: &str) -> Result<(usize, usize)> {
    match kind {
        "glossary" => {
            let loaded = sources::load_glossary(&config.sources.glossary)?;
            Ok((loaded.records.len(), loaded.skipped))
        }
        "rules" => {
            let loaded = sources::load_rules(&config.sources.rules)?;
            Ok((loaded.records.len(), loaded.skipped))
        }
        _ => {
            let loaded = sources::load_cards(&config.sources.cards)?;
            Ok((loaded.records.len(), loaded.skipped))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_kind<K: DocumentKind + Clone>(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    cfg: &IngestConfig,
    loader: fn(&Path) -> Result<LoadOutcome<K>>,
    path: &Path,
    opts: &IngestOptions,
    reporter: &dyn ProgressReporter,
    stop: &AtomicBool,
) -> Result<KindReport> {
    reporter.report(IngestEvent::PhaseStarted {
        kind: K::KIND,
        phase: Phase::LoadingSource,
    });

    let load_start = Instant::now();
    let mut loaded = loader(path)?;
    if let Some(limit) = opts.limit {
        loaded.records.truncate(limit);
    }
    let load_elapsed = load_start.elapsed();

    ingest_kind(
        pool,
        embedder,
        cfg,
        loaded,
        load_elapsed,
        opts.clear,
        reporter,
        stop,
    )
    .await
}

/// Drive one kind's records through document upsert and embedding
/// generation. Exposed separately from [`run_ingest`] so tests can feed
/// records directly with a stub [`Embedder`].
#[allow(clippy::too_many_arguments)]
pub async fn ingest_kind<K: DocumentKind + Clone>(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    cfg: &IngestConfig,
    loaded: LoadOutcome<K>,
    load_elapsed: Duration,
    clear: bool,
    reporter: &dyn ProgressReporter,
    stop: &AtomicBool,
) -> Result<KindReport> {
    let repo: Repository<K> = Repository::new(pool.clone());
    let model = embedder.model().to_string();
    let dims = embedder.dims();

    let mut report = KindReport::new(K::KIND);
    report.load_elapsed = load_elapsed;
    report.attempted = loaded.records.len() + loaded.skipped;
    report.skipped = loaded.skipped;

    // A source that is mostly malformed must abort before touching the
    // store, clear included.
    if report.failure_ratio() > cfg.max_failure_ratio {
        report.error = Some(format!(
            "failure ratio {:.2} exceeded limit {:.2} while loading source",
            report.failure_ratio(),
            cfg.max_failure_ratio
        ));
        return Ok(report);
    }

    if clear {
        let deleted = repo.clear_all().await?;
        println!("ingest {}  cleared {} existing rows", K::KIND, deleted);
    }

    let records = loaded.records;
    let total = records.len();

    // Phase: upserting documents. Each upsert is its own transaction; a
    // record that fails here never becomes eligible for embedding.
    reporter.report(IngestEvent::PhaseStarted {
        kind: K::KIND,
        phase: Phase::UpsertingDocuments,
    });
    let phase_start = Instant::now();
    let mut upserted: Vec<(String, K)> = Vec::with_capacity(total);

    for batch in records.chunks(cfg.batch_size) {
        if stop.load(Ordering::Relaxed) {
            return Ok(cancel(report, phase_start, Phase::UpsertingDocuments));
        }

        for record in batch {
            match repo.upsert(record).await {
                Ok(id) => {
                    report.documents_upserted += 1;
                    upserted.push((id, record.clone()));
                }
                Err(e) => {
                    report.failed += 1;
                    eprintln!(
                        "Warning: failed to upsert {} '{}': {e}",
                        K::KIND,
                        record.natural_key()
                    );
                }
            }
        }

        report_batch(reporter, &report, upserted.len() + report.failed, total);
        if report.failure_ratio() > cfg.max_failure_ratio {
            return Ok(ratio_breach(report, phase_start, Phase::UpsertingDocuments, cfg));
        }
    }
    report.documents_elapsed = phase_start.elapsed();

    // Phase: generating + upserting embeddings, batch by batch. Within a
    // batch all vectors are generated first, then written, so a batch is a
    // natural progress checkpoint.
    reporter.report(IngestEvent::PhaseStarted {
        kind: K::KIND,
        phase: Phase::GeneratingEmbeddings,
    });
    let phase_start = Instant::now();
    let mut processed = 0usize;

    for batch in upserted.chunks(cfg.batch_size) {
        if stop.load(Ordering::Relaxed) {
            return Ok(cancel(report, phase_start, Phase::GeneratingEmbeddings));
        }

        let mut generated: Vec<(&str, String, Vec<f32>)> = Vec::with_capacity(batch.len());
        for (id, record) in batch {
            let text = record.embedding_text();
            let text_hash = hash_text(&text);

            if repo.embedding_hash(id, &model).await?.as_deref() == Some(text_hash.as_str()) {
                report.up_to_date += 1;
                continue;
            }

            match embed_with_retry(embedder, &text, cfg.max_retries).await {
                Ok(vector) => generated.push((id.as_str(), text_hash, vector)),
                Err(e @ EmbedError::DimensionMismatch { .. }) => {
                    report.failed += 1;
                    eprintln!(
                        "Error: {} '{}': {e} — vector discarded",
                        K::KIND,
                        record.natural_key()
                    );
                }
                Err(e @ (EmbedError::InvalidInput(_) | EmbedError::Transient(_))) => {
                    report.skipped += 1;
                    eprintln!(
                        "Warning: skipping {} '{}': {e}",
                        K::KIND,
                        record.natural_key()
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    eprintln!(
                        "Warning: embedding failed for {} '{}': {e}",
                        K::KIND,
                        record.natural_key()
                    );
                }
            }
        }

        for (id, text_hash, vector) in &generated {
            match repo
                .upsert_embedding(id, &model, dims, text_hash, vector)
                .await
            {
                Ok(()) => report.embedded += 1,
                Err(e) => {
                    report.failed += 1;
                    eprintln!("Warning: failed to store {} embedding: {e}", K::KIND);
                }
            }
        }

        processed += batch.len();
        report_batch(reporter, &report, processed, upserted.len());
        if report.failure_ratio() > cfg.max_failure_ratio {
            return Ok(ratio_breach(report, phase_start, Phase::GeneratingEmbeddings, cfg));
        }
    }
    report.embeddings_elapsed = phase_start.elapsed();

    report.state = PipelineState::Completed;
    Ok(report)
}

fn report_batch(
    reporter: &dyn ProgressReporter,
    report: &KindReport,
    processed: usize,
    total: usize,
) {
    reporter.report(IngestEvent::BatchCompleted {
        kind: report.kind,
        processed,
        total,
        embedded: report.embedded,
        skipped: report.skipped,
        failed: report.failed,
    });
}

fn cancel(mut report: KindReport, phase_start: Instant, phase: Phase) -> KindReport {
    finish_phase(&mut report, phase_start, phase);
    report.state = PipelineState::Failed;
    report.error = Some(format!("cancelled while {}", phase.name()));
    report
}

fn ratio_breach(
    mut report: KindReport,
    phase_start: Instant,
    phase: Phase,
    cfg: &IngestConfig,
) -> KindReport {
    finish_phase(&mut report, phase_start, phase);
    report.state = PipelineState::Failed;
    report.error = Some(format!(
        "failure ratio {:.2} exceeded limit {:.2}",
        report.failure_ratio(),
        cfg.max_failure_ratio
    ));
    report
}

fn finish_phase(report: &mut KindReport, phase_start: Instant, phase: Phase) {
    match phase {
        Phase::UpsertingDocuments => report.documents_elapsed = phase_start.elapsed(),
        Phase::GeneratingEmbeddings => report.embeddings_elapsed = phase_start.elapsed(),
        Phase::LoadingSource => {}
    }
}

/// Retry [`Embedder::embed`] on transient failures with exponential backoff
/// (1s, 2s, 4s, … capped at 32s). Everything else returns immediately.
async fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    max_retries: u32,
) -> Result<Vec<f32>, EmbedError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match embedder.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(e) if e.is_transient() => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| EmbedError::Transient("retries exhausted".to_string())))
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn print_summary(report: &KindReport) {
    println!("ingest {}", report.kind);
    println!("  attempted: {}", report.attempted);
    println!("  documents upserted: {}", report.documents_upserted);
    println!("  embeddings written: {}", report.embedded);
    if report.up_to_date > 0 {
        println!("  up to date: {}", report.up_to_date);
    }
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    println!(
        "  elapsed: load {:.1}s, documents {:.1}s, embeddings {:.1}s",
        report.load_elapsed.as_secs_f64(),
        report.documents_elapsed.as_secs_f64(),
        report.embeddings_elapsed.as_secs_f64(),
    );
    match (&report.state, &report.error) {
        (PipelineState::Completed, _) => println!("  state: completed"),
        (PipelineState::Failed, Some(error)) => println!("  state: failed ({error})"),
        (PipelineState::Failed, None) => println!("  state: failed"),
    }
}
