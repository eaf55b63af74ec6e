use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::bible::BibleStore;
use crate::books;
use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{RunStats, Verse, VerseRef};
use crate::producer::{AnnotationProducer, CompletionRequest};
use crate::prompts;
use crate::retry::{RetryPolicy, Shutdown};
use crate::validation;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 2000;

#[derive(Clone, Debug)]
pub struct CommentarySettings {
    pub retry: RetryPolicy,
    pub request_interval: Duration,
    pub context_window: u32,
    pub prompt_version: String,
}

impl CommentarySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retry),
            request_interval: config.retry.request_interval,
            context_window: config.context_window,
            prompt_version: config.producer.commentary_prompt_version.clone(),
        }
    }
}

/// Generates margin insights for single verses. Without a sink the
/// generator still calls the producer and validates, but stores nothing.
pub struct CommentaryGenerator {
    bible: BibleStore,
    sink: Option<Database>,
    producer: Arc<dyn AnnotationProducer>,
    settings: CommentarySettings,
    shutdown: Shutdown,
}

impl CommentaryGenerator {
    pub fn new(
        bible: BibleStore,
        sink: Option<Database>,
        producer: Arc<dyn AnnotationProducer>,
        settings: CommentarySettings,
    ) -> Self {
        Self {
            bible,
            sink,
            producer,
            settings,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs a whole chapter, or only `verse_filter` when given. The full
    /// chapter is always loaded so the context window stays intact.
    pub async fn process_chapter(
        &mut self,
        book_id: u32,
        chapter: u32,
        verse_filter: Option<u32>,
    ) -> Result<RunStats> {
        let book = books::book_name(book_id)
            .ok_or_else(|| anyhow::anyhow!("unknown book id {book_id}"))?;
        let all_verses = match self.bible.chapter_verses(book_id, chapter).await {
            Ok(verses) => verses,
            Err(err) => {
                tracing::error!(book, chapter, error = %err, "failed to read chapter, skipping");
                return Ok(RunStats {
                    failed: 1,
                    ..RunStats::default()
                });
            }
        };
        if all_verses.is_empty() {
            tracing::warn!(book, chapter, "no verses found");
            return Ok(RunStats::default());
        }

        let targets: Vec<&Verse> = all_verses
            .iter()
            .filter(|v| verse_filter.map_or(true, |n| v.number == n))
            .collect();
        if targets.is_empty() {
            tracing::warn!(book, chapter, verse = ?verse_filter, "verse not found");
            return Ok(RunStats::default());
        }

        tracing::info!(book, chapter, verses = targets.len(), "generating insights");

        let mut stats = RunStats::default();
        for verse in targets {
            if self.shutdown.is_triggered() {
                tracing::info!("shutdown requested, stopping before next verse");
                break;
            }
            stats.absorb(self.process_verse(book_id, chapter, verse, &all_verses).await);
        }

        tracing::info!(
            book,
            chapter,
            saved = stats.saved,
            rejected = stats.rejected,
            failed = stats.failed,
            "chapter complete"
        );
        Ok(stats)
    }

    pub async fn process_book(
        &mut self,
        book_id: u32,
        start_chapter: Option<u32>,
        end_chapter: Option<u32>,
    ) -> Result<RunStats> {
        let chapters: Vec<u32> = self
            .bible
            .chapters(book_id)
            .await?
            .into_iter()
            .filter(|c| start_chapter.map_or(true, |start| *c >= start))
            .filter(|c| end_chapter.map_or(true, |end| *c <= end))
            .collect();

        let mut stats = RunStats::default();
        for chapter in chapters {
            if self.shutdown.is_triggered() {
                break;
            }
            match self.process_chapter(book_id, chapter, None).await {
                Ok(chapter_stats) => stats.absorb(chapter_stats),
                Err(err) => {
                    tracing::error!(book_id, chapter, error = %err, "chapter failed, continuing");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn process_verse(
        &mut self,
        book_id: u32,
        chapter: u32,
        verse: &Verse,
        chapter_verses: &[Verse],
    ) -> RunStats {
        let mut stats = RunStats {
            verses: 1,
            ..RunStats::default()
        };
        let reference = VerseRef::single(book_id, chapter, verse.number);
        let book = books::book_name(book_id).unwrap_or("Unknown");

        let context =
            prompts::context_window(chapter_verses, verse.number, self.settings.context_window);
        let request = CompletionRequest {
            system: Some(prompts::MARGINALIA_SYSTEM.to_string()),
            prompt: prompts::marginalia_prompt(book, chapter, verse, &context),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let producer = Arc::clone(&self.producer);
        let items = self
            .settings
            .retry
            .run(
                &reference.to_string(),
                || producer.complete(&request),
                validation::parse_insight_response,
                &mut self.shutdown,
            )
            .await;
        self.shutdown.sleep(self.settings.request_interval).await;

        let Some(items) = items else {
            tracing::warn!(verse = %reference, "no insights generated");
            stats.failed = 1;
            return stats;
        };

        let total = items.len();
        let mut accepted = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            let subject = format!("{book_id}_{chapter}_{}_{index}", verse.number);
            let (fixed, issues) = validation::validate_insight_value(item, &verse.text, &subject);
            if !issues.is_empty() {
                for issue in &issues {
                    tracing::warn!(verse = %reference, issue = %issue, "insight rejected");
                }
                stats.rejected += 1;
                continue;
            }
            let Some(insight) = fixed else {
                stats.rejected += 1;
                continue;
            };

            for warning in validation::quality_warnings(&insight.title, &insight.content, &subject) {
                tracing::debug!(verse = %reference, issue = %warning, "quality warning");
            }
            accepted.push((index, insight));
        }

        match &self.sink {
            Some(sink) => {
                match sink
                    .upsert_insights(
                        reference,
                        &accepted,
                        &self.settings.prompt_version,
                        producer.model_tag(),
                    )
                    .await
                {
                    Ok(saved) => {
                        stats.saved = saved;
                        stats.failed += accepted.len() - saved;
                    }
                    Err(err) => {
                        tracing::error!(verse = %reference, error = %err, "failed to store insights");
                        stats.failed += accepted.len();
                    }
                }
            }
            None => stats.saved = accepted.len(),
        }

        tracing::info!(
            verse = %reference,
            valid = accepted.len(),
            total,
            "verse processed"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bible::fixture;
    use crate::producer::fake::FakeProducer;
    use serde_json::json;

    fn settings() -> CommentarySettings {
        CommentarySettings {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::ZERO,
            },
            request_interval: Duration::ZERO,
            context_window: 2,
            prompt_version: "v1.0".to_string(),
        }
    }

    fn response() -> String {
        json!({
            "insights": [
                {
                    "segment_text": "the Word was God",
                    "segment_start_char": 5,
                    "segment_end_char": 9,
                    "type": "theology",
                    "title": "The Word is God",
                    "content": "The clause identifies the Word with God while keeping a distinction.",
                    "icon": "sparkles",
                    "is_interpretive": true
                },
                {
                    "segment_text": "Jesus wept bitterly",
                    "segment_start_char": 0,
                    "segment_end_char": 19,
                    "type": "theology",
                    "title": "Not in this verse",
                    "content": "This quotation does not occur in the verse at all, so it fails.",
                    "icon": "x"
                },
                {
                    "segment_text": "In the beginning",
                    "segment_start_char": 0,
                    "segment_end_char": 16,
                    "type": "connection",
                    "title": "Echo of Genesis",
                    "content": "The opening phrase echoes the first words of Genesis.",
                    "icon": "link",
                    "sources": []
                },
                {
                    "segment_text": "Word",
                    "segment_start_char": 25,
                    "segment_end_char": 29,
                    "type": "greek",
                    "title": "Logos",
                    "content": "The Greek logos (G3056) names the Word as speech and reason.",
                    "icon": "book",
                    "sources": [{"type": "strongs", "reference": "G3056"}]
                }
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn validates_and_stores_accepted_insights() {
        let producer = Arc::new(FakeProducer::new(|_, request| {
            assert!(request.prompt.contains(">>> 1. In the beginning"));
            Ok(response())
        }));
        let sink = crate::db::fixture::database().await;
        let mut generator = CommentaryGenerator::new(
            fixture::bible().await,
            Some(sink.clone()),
            producer.clone(),
            settings(),
        );

        let stats = generator.process_chapter(43, 1, Some(1)).await.unwrap();
        assert_eq!(producer.calls(), 1);
        assert_eq!(stats.saved, 2);
        assert_eq!(stats.rejected, 2);

        let stored = sink.insights_for_chapter(43, 1).await.unwrap();
        let ids: Vec<_> = stored.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&"43_1_1_theology_0"));
        assert!(ids.contains(&"43_1_1_greek_3"));

        let theology = stored
            .iter()
            .find(|s| s.kind == "theology")
            .expect("theology insight");
        assert_eq!((theology.segment_start, theology.segment_end), (62, 78));

        generator.process_chapter(43, 1, Some(1)).await.unwrap();
        assert_eq!(sink.count_insights().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn responses_without_insights_array_fail_the_verse() {
        let producer = Arc::new(FakeProducer::new(|_, _| Ok(r#"{"notes": []}"#.to_string())));
        let mut generator =
            CommentaryGenerator::new(fixture::bible().await, None, producer.clone(), settings());

        let stats = generator.process_chapter(43, 1, Some(2)).await.unwrap();
        assert_eq!(producer.calls(), 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.saved, 0);
    }

    #[tokio::test]
    async fn missing_verse_is_not_an_error() {
        let producer = Arc::new(FakeProducer::new(|_, _| Ok(response())));
        let mut generator =
            CommentaryGenerator::new(fixture::bible().await, None, producer.clone(), settings());

        let stats = generator.process_chapter(43, 1, Some(40)).await.unwrap();
        assert_eq!(stats, RunStats::default());
        assert_eq!(producer.calls(), 0);
    }

    #[tokio::test]
    async fn unreadable_chapter_is_counted_and_skipped() {
        let producer = Arc::new(FakeProducer::new(|_, _| Ok(response())));
        let bible = fixture::bible().await;
        let mut generator = CommentaryGenerator::new(bible.clone(), None, producer.clone(), settings());
        fixture::drop_table(&bible, "verses").await;

        let stats = generator.process_chapter(43, 1, None).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.verses, 0);
        assert_eq!(producer.calls(), 0);
    }
}
