use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::bible::BibleStore;
use crate::books;
use crate::config::{AppConfig, SelectionConfig};
use crate::db::Database;
use crate::models::{Confidence, ConnectionType, CrossRefExplanation, RunStats, VerseRef};
use crate::producer::{AnnotationProducer, CompletionRequest};
use crate::prompts;
use crate::retry::{RetryPolicy, Shutdown};
use crate::selector;
use crate::validation::{self, ExplanationDraft};

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 300;
const DRY_RUN_MODEL: &str = "dry-run";

#[derive(Clone, Debug)]
pub struct CrossRefSettings {
    pub selection: SelectionConfig,
    pub retry: RetryPolicy,
    pub request_interval: Duration,
    pub prompt_version: String,
}

impl CrossRefSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            selection: config.selection.clone(),
            retry: RetryPolicy::from(&config.retry),
            request_interval: config.retry.request_interval,
            prompt_version: config.producer.crossref_prompt_version.clone(),
        }
    }
}

enum Mode {
    Live {
        producer: Arc<dyn AnnotationProducer>,
        sink: Database,
    },
    DryRun,
}

/// Explains why a verse is connected to each of its selected
/// cross-references and stores the explanations.
pub struct CrossRefGenerator {
    bible: BibleStore,
    mode: Mode,
    settings: CrossRefSettings,
    shutdown: Shutdown,
}

impl CrossRefGenerator {
    pub fn new(
        bible: BibleStore,
        sink: Database,
        producer: Arc<dyn AnnotationProducer>,
        settings: CrossRefSettings,
    ) -> Self {
        Self {
            bible,
            mode: Mode::Live { producer, sink },
            settings,
            shutdown: Shutdown::never(),
        }
    }

    /// Walks the same selection without calling the producer or writing rows.
    pub fn dry_run(bible: BibleStore, settings: CrossRefSettings) -> Self {
        Self {
            bible,
            mode: Mode::DryRun,
            settings,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn process_verse(&mut self, book_id: u32, chapter: u32, verse: u32) -> Result<RunStats> {
        let mut stats = RunStats::default();
        let source = VerseRef::single(book_id, chapter, verse);
        let source_text = self.bible.verse_text(book_id, chapter, verse, None).await?;
        if source_text.is_empty() {
            tracing::debug!(source = %source, "no verse text, skipping");
            return Ok(stats);
        }
        stats.verses = 1;

        let mut edges = self.bible.cross_references(book_id, chapter, verse).await?;
        selector::sort_edges(&mut edges);
        let selection = selector::select(&edges, &self.settings.selection);
        if selection.edges.is_empty() {
            return Ok(stats);
        }

        tracing::info!(
            source = %source,
            selected = selection.edges.len(),
            available = edges.len(),
            pass = ?selection.pass,
            "selected cross references"
        );

        let mut rows = Vec::with_capacity(selection.edges.len());
        for edge in &selection.edges {
            if self.shutdown.is_triggered() {
                break;
            }

            let target_text = match self.bible.range_text(&edge.target).await {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(target = %edge.target, error = %err, "failed to read target text");
                    stats.failed += 1;
                    continue;
                }
            };
            if target_text.is_empty() {
                tracing::debug!(target = %edge.target, "target text missing, skipping");
                continue;
            }

            let (draft, model_tag) = self.explain(&source, &source_text, &edge.target, &target_text).await;
            match draft {
                Some(draft) => {
                    tracing::info!(
                        target = %edge.target,
                        title = %draft.title,
                        confidence = draft.confidence.as_str(),
                        "explained connection"
                    );
                    rows.push(CrossRefExplanation {
                        source,
                        target: edge.target,
                        anchor_phrase: draft.anchor_phrase,
                        title: draft.title,
                        content: draft.content,
                        connection_type: draft.connection_type,
                        confidence: draft.confidence,
                        weight: edge.weight,
                        prompt_version: self.settings.prompt_version.clone(),
                        model_tag,
                    });
                }
                None => stats.failed += 1,
            }

            if matches!(self.mode, Mode::Live { .. })
                && !self.shutdown.sleep(self.settings.request_interval).await
            {
                break;
            }
        }

        match &self.mode {
            Mode::Live { sink, .. } => match sink.upsert_explanations(&rows).await {
                Ok(saved) => {
                    stats.saved += saved;
                    stats.failed += rows.len() - saved;
                }
                Err(err) => {
                    tracing::error!(source = %source, error = %err, "failed to store explanations");
                    stats.failed += rows.len();
                }
            },
            Mode::DryRun => {
                for row in &rows {
                    tracing::info!(target = %row.target, title = %row.title, "[dry run] would insert");
                }
                stats.saved += rows.len();
            }
        }

        Ok(stats)
    }

    /// Store read failures skip the verse (or the chapter) rather than
    /// ending the run.
    pub async fn process_chapter(&mut self, book_id: u32, chapter: u32) -> Result<RunStats> {
        let verses = match self.bible.chapter_verses(book_id, chapter).await {
            Ok(verses) => verses,
            Err(err) => {
                tracing::error!(book_id, chapter, error = %err, "failed to read chapter, skipping");
                return Ok(RunStats {
                    failed: 1,
                    ..RunStats::default()
                });
            }
        };
        tracing::info!(
            book = books::book_name(book_id).unwrap_or("Unknown"),
            chapter,
            verses = verses.len(),
            "processing chapter"
        );

        let mut stats = RunStats::default();
        for verse in verses {
            if self.shutdown.is_triggered() {
                tracing::info!("shutdown requested, stopping before next verse");
                break;
            }
            match self.process_verse(book_id, chapter, verse.number).await {
                Ok(verse_stats) => stats.absorb(verse_stats),
                Err(err) => {
                    tracing::error!(
                        book_id,
                        chapter,
                        verse = verse.number,
                        error = %err,
                        "failed to read verse data, skipping"
                    );
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(chapter, saved = stats.saved, failed = stats.failed, "chapter done");
        Ok(stats)
    }

    /// Processes a book, optionally limited to an inclusive chapter range.
    pub async fn process_book(
        &mut self,
        book_id: u32,
        start_chapter: Option<u32>,
        end_chapter: Option<u32>,
    ) -> Result<RunStats> {
        let book = books::book_name(book_id)
            .ok_or_else(|| anyhow::anyhow!("unknown book id {book_id}"))?;
        let chapters: Vec<u32> = self
            .bible
            .chapters(book_id)
            .await?
            .into_iter()
            .filter(|c| start_chapter.map_or(true, |start| *c >= start))
            .filter(|c| end_chapter.map_or(true, |end| *c <= end))
            .collect();

        tracing::info!(book, chapters = chapters.len(), "processing book");

        let mut stats = RunStats::default();
        for chapter in chapters {
            if self.shutdown.is_triggered() {
                break;
            }
            match self.process_chapter(book_id, chapter).await {
                Ok(chapter_stats) => stats.absorb(chapter_stats),
                Err(err) => {
                    tracing::error!(book, chapter, error = %err, "chapter failed, continuing");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(book, saved = stats.saved, failed = stats.failed, "book done");
        Ok(stats)
    }

    async fn explain(
        &mut self,
        source: &VerseRef,
        source_text: &str,
        target: &VerseRef,
        target_text: &str,
    ) -> (Option<ExplanationDraft>, String) {
        let producer = match &self.mode {
            Mode::Live { producer, .. } => Arc::clone(producer),
            Mode::DryRun => {
                let draft = ExplanationDraft {
                    title: format!("Connection to {target}"),
                    content: "[DRY RUN - No API call made]".to_string(),
                    connection_type: ConnectionType::Theme,
                    confidence: Confidence::Medium,
                    anchor_phrase: None,
                };
                return (Some(draft), DRY_RUN_MODEL.to_string());
            }
        };

        let request = CompletionRequest {
            system: None,
            prompt: prompts::crossref_prompt(
                &source.to_string(),
                source_text,
                &target.to_string(),
                target_text,
            ),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let label = format!("{source} -> {target}");

        let draft = self
            .settings
            .retry
            .run(
                &label,
                || producer.complete(&request),
                |raw| validation::parse_explanation(raw, source_text),
                &mut self.shutdown,
            )
            .await;

        (draft, producer.model_tag().to_string())
    }
}
