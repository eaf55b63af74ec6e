use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::config::AppConfig;
use crate::models::{CrossRefExplanation, Insight, InsightKind, StoredInsight, VerseRef};

/// Output database for generated commentary.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        if let Some(parent) = config.commentary_db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&config.commentary_dsn())?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "failed to open commentary database {}",
                    config.commentary_db_path.display()
                )
            })?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commentary_insights (
                id TEXT PRIMARY KEY,
                book_id INTEGER NOT NULL,
                chapter INTEGER NOT NULL,
                verse_start INTEGER NOT NULL,
                verse_end INTEGER NOT NULL,
                segment_text TEXT NOT NULL,
                segment_start_char INTEGER NOT NULL,
                segment_end_char INTEGER NOT NULL,
                insight_type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                icon TEXT NOT NULL,
                sources TEXT,
                content_version INTEGER NOT NULL,
                prompt_version TEXT NOT NULL,
                model_version TEXT NOT NULL,
                quality_tier TEXT NOT NULL DEFAULT 'standard',
                is_interpretive INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_insights_chapter
                ON commentary_insights(book_id, chapter);

            CREATE TABLE IF NOT EXISTS crossref_explanations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_book_id INTEGER NOT NULL,
                source_chapter INTEGER NOT NULL,
                source_verse INTEGER NOT NULL,
                target_book_id INTEGER NOT NULL,
                target_chapter INTEGER NOT NULL,
                target_verse_start INTEGER NOT NULL,
                target_verse_end INTEGER NOT NULL,
                anchor_phrase TEXT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                connection_type TEXT NOT NULL,
                weight REAL NOT NULL,
                confidence TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (source_book_id, source_chapter, source_verse,
                        target_book_id, target_chapter, target_verse_start, target_verse_end,
                        connection_type)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Writes one verse's explanations in a single transaction. A failing
    /// row is logged and skipped; the rest still commit.
    pub async fn upsert_explanations(&self, rows: &[CrossRefExplanation]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut saved = 0;
        for row in rows {
            match upsert_explanation_tx(&mut tx, row).await {
                Ok(()) => saved += 1,
                Err(err) => {
                    tracing::warn!(
                        source = %row.source,
                        target = %row.target,
                        error = %err,
                        "failed to store explanation"
                    );
                }
            }
        }
        tx.commit()
            .await
            .context("failed to commit explanations")?;

        Ok(saved)
    }

    /// Writes accepted insights for one verse. `index` is the insight's
    /// position in the producer response and becomes part of its id.
    pub async fn upsert_insights(
        &self,
        verse: VerseRef,
        insights: &[(usize, Insight)],
        prompt_version: &str,
        model: &str,
    ) -> Result<usize> {
        if insights.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut saved = 0;
        for (index, insight) in insights {
            let id = insight_id(&verse, insight.kind, *index);
            match upsert_insight_tx(&mut tx, &id, &verse, insight, prompt_version, model).await {
                Ok(()) => saved += 1,
                Err(err) => {
                    tracing::warn!(insight_id = %id, error = %err, "failed to store insight");
                }
            }
        }
        tx.commit().await.context("failed to commit insights")?;

        Ok(saved)
    }

    pub async fn insights_for_chapter(&self, book_id: u32, chapter: u32) -> Result<Vec<StoredInsight>> {
        let rows = sqlx::query(
            r#"
            SELECT id, book_id, chapter, verse_start, verse_end,
                   segment_text, segment_start_char, segment_end_char,
                   insight_type, title, content, icon, sources
            FROM commentary_insights
            WHERE book_id = ? AND chapter = ?
            ORDER BY verse_start, segment_start_char
            "#,
        )
        .bind(book_id)
        .bind(chapter)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_insight).collect())
    }

    pub async fn insight_chapters(&self, book_id: u32) -> Result<Vec<u32>> {
        let rows = sqlx::query(
            "SELECT DISTINCT chapter FROM commentary_insights WHERE book_id = ? ORDER BY chapter",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get::<u32, _>("chapter")).collect())
    }

    pub async fn count_insights(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM commentary_insights")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_explanations(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM crossref_explanations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub fn insight_id(verse: &VerseRef, kind: InsightKind, index: usize) -> String {
    format!(
        "{}_{}_{}_{}_{}",
        verse.book_id,
        verse.chapter,
        verse.verse_start,
        kind.as_str(),
        index
    )
}

async fn upsert_explanation_tx(
    tx: &mut Transaction<'_, Sqlite>,
    row: &CrossRefExplanation,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO crossref_explanations (
            source_book_id, source_chapter, source_verse,
            target_book_id, target_chapter, target_verse_start, target_verse_end,
            anchor_phrase, title, content, connection_type, weight, confidence,
            prompt_version, model, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (source_book_id, source_chapter, source_verse,
                     target_book_id, target_chapter, target_verse_start, target_verse_end,
                     connection_type)
        DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            anchor_phrase = excluded.anchor_phrase,
            weight = excluded.weight,
            confidence = excluded.confidence,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(row.source.book_id)
    .bind(row.source.chapter)
    .bind(row.source.verse_start)
    .bind(row.target.book_id)
    .bind(row.target.chapter)
    .bind(row.target.verse_start)
    .bind(row.target.verse_end)
    .bind(&row.anchor_phrase)
    .bind(&row.title)
    .bind(&row.content)
    .bind(row.connection_type.as_str())
    .bind(row.weight)
    .bind(row.confidence.as_str())
    .bind(&row.prompt_version)
    .bind(&row.model_tag)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn upsert_insight_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    verse: &VerseRef,
    insight: &Insight,
    prompt_version: &str,
    model: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let sources = serde_json::to_string(&insight.sources)?;
    sqlx::query(
        r#"
        INSERT INTO commentary_insights (
            id, book_id, chapter, verse_start, verse_end,
            segment_text, segment_start_char, segment_end_char,
            insight_type, title, content, icon, sources,
            content_version, prompt_version, model_version,
            quality_tier, is_interpretive, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, 'standard', ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            segment_text = excluded.segment_text,
            segment_start_char = excluded.segment_start_char,
            segment_end_char = excluded.segment_end_char,
            insight_type = excluded.insight_type,
            title = excluded.title,
            content = excluded.content,
            icon = excluded.icon,
            sources = excluded.sources,
            prompt_version = excluded.prompt_version,
            model_version = excluded.model_version,
            is_interpretive = excluded.is_interpretive,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(id)
    .bind(verse.book_id)
    .bind(verse.chapter)
    .bind(verse.verse_start)
    .bind(verse.verse_end)
    .bind(&insight.segment_text)
    .bind(insight.segment_start as i64)
    .bind(insight.segment_end as i64)
    .bind(insight.kind.as_str())
    .bind(&insight.title)
    .bind(&insight.content)
    .bind(&insight.icon)
    .bind(sources)
    .bind(prompt_version)
    .bind(model)
    .bind(insight.is_interpretive)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn row_to_insight(row: SqliteRow) -> StoredInsight {
    StoredInsight {
        id: row.get("id"),
        verse: VerseRef::range(
            row.get("book_id"),
            row.get("chapter"),
            row.get("verse_start"),
            row.get("verse_end"),
        ),
        segment_text: row.get("segment_text"),
        segment_start: row.get("segment_start_char"),
        segment_end: row.get("segment_end_char"),
        kind: row.get("insight_type"),
        title: row.get("title"),
        content: row.get("content"),
        icon: row.get("icon"),
        sources: row
            .get::<Option<String>, _>("sources")
            .unwrap_or_else(|| "[]".to_string()),
    }
}
