use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::config::AppConfig;
use crate::models::{CrossReferenceEdge, Verse, VerseRef};

/// Read-only access to the bundled Bible database: verse text and the
/// weighted cross-reference graph.
#[derive(Clone)]
pub struct BibleStore {
    pool: SqlitePool,
    translation_id: String,
}

impl BibleStore {
    pub async fn open(config: &AppConfig) -> Result<Self> {
        config.require_bible_db()?;

        let options = SqliteConnectOptions::from_str(&config.bible_dsn())?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "failed to open bible database {}",
                    config.bible_db_path.display()
                )
            })?;

        Ok(Self::from_pool(pool, &config.translation_id))
    }

    pub fn from_pool(pool: SqlitePool, translation_id: impl Into<String>) -> Self {
        Self {
            pool,
            translation_id: translation_id.into(),
        }
    }

    /// Contiguous verses joined by single spaces. Empty when nothing matches.
    pub async fn verse_text(
        &self,
        book_id: u32,
        chapter: u32,
        verse_start: u32,
        verse_end: Option<u32>,
    ) -> Result<String> {
        let verse_end = verse_end.unwrap_or(verse_start).max(verse_start);
        let rows = sqlx::query(
            r#"
            SELECT text FROM verses
            WHERE translation_id = ? AND book_id = ? AND chapter = ? AND verse BETWEEN ? AND ?
            ORDER BY verse
            "#,
        )
        .bind(&self.translation_id)
        .bind(book_id)
        .bind(chapter)
        .bind(verse_start)
        .bind(verse_end)
        .fetch_all(&self.pool)
        .await
        .context("failed to read verse text")?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("text"))
            .collect::<Vec<_>>()
            .join(" "))
    }

    pub async fn range_text(&self, verse: &VerseRef) -> Result<String> {
        self.verse_text(
            verse.book_id,
            verse.chapter,
            verse.verse_start,
            Some(verse.verse_end),
        )
        .await
    }

    /// True when the verse exists in any translation.
    pub async fn verse_exists(&self, book_id: u32, chapter: u32, verse: u32) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM verses WHERE book_id = ? AND chapter = ? AND verse = ? LIMIT 1",
        )
        .bind(book_id)
        .bind(chapter)
        .bind(verse)
        .fetch_optional(&self.pool)
        .await
        .context("failed to check verse existence")?;

        Ok(row.is_some())
    }

    pub async fn chapter_verses(&self, book_id: u32, chapter: u32) -> Result<Vec<Verse>> {
        let rows = sqlx::query(
            r#"
            SELECT verse, text FROM verses
            WHERE translation_id = ? AND book_id = ? AND chapter = ?
            ORDER BY verse
            "#,
        )
        .bind(&self.translation_id)
        .bind(book_id)
        .bind(chapter)
        .fetch_all(&self.pool)
        .await
        .context("failed to read chapter verses")?;

        Ok(rows
            .into_iter()
            .map(|row| Verse {
                number: row.get::<u32, _>("verse"),
                text: row.get("text"),
            })
            .collect())
    }

    pub async fn chapters(&self, book_id: u32) -> Result<Vec<u32>> {
        let rows = sqlx::query(
            "SELECT DISTINCT chapter FROM verses WHERE book_id = ? ORDER BY chapter",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list chapters")?;

        Ok(rows.iter().map(|row| row.get::<u32, _>("chapter")).collect())
    }

    /// All outgoing edges of one verse, heaviest first with a stable tie order.
    pub async fn cross_references(
        &self,
        book_id: u32,
        chapter: u32,
        verse: u32,
    ) -> Result<Vec<CrossReferenceEdge>> {
        let rows = sqlx::query(
            r#"
            SELECT target_book_id, target_chapter, target_verse_start, target_verse_end,
                   weight, source
            FROM cross_references
            WHERE source_book_id = ? AND source_chapter = ? AND source_verse_start = ?
            ORDER BY weight DESC, target_book_id ASC, target_chapter ASC,
                     target_verse_start ASC, target_verse_end ASC
            "#,
        )
        .bind(book_id)
        .bind(chapter)
        .bind(verse)
        .fetch_all(&self.pool)
        .await
        .context("failed to read cross references")?;

        let source = VerseRef::single(book_id, chapter, verse);
        Ok(rows
            .into_iter()
            .map(|row| CrossReferenceEdge {
                source,
                target: VerseRef::range(
                    row.get("target_book_id"),
                    row.get("target_chapter"),
                    row.get("target_verse_start"),
                    row.get("target_verse_end"),
                ),
                weight: row.get("weight"),
                origin_tag: row
                    .get::<Option<String>, _>("source")
                    .unwrap_or_else(|| "unknown".to_string()),
            })
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_single_verses_and_ranges() {
        let bible = fixture::bible().await;
        assert_eq!(
            bible.verse_text(43, 1, 1, None).await.unwrap(),
            fixture::JOHN_1[0]
        );

        let joined = bible
            .range_text(&VerseRef::range(43, 1, 1, 2))
            .await
            .unwrap();
        assert_eq!(joined, format!("{} {}", fixture::JOHN_1[0], fixture::JOHN_1[1]));

        assert!(bible.verse_text(43, 2, 1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_chapters_and_verses() {
        let bible = fixture::bible().await;
        assert_eq!(bible.chapters(43).await.unwrap(), vec![1]);
        let verses = bible.chapter_verses(43, 1).await.unwrap();
        assert_eq!(verses.len(), 5);
        assert_eq!(verses[4].number, 5);
        assert!(bible.verse_exists(1, 1, 1).await.unwrap());
        assert!(!bible.verse_exists(1, 50, 1).await.unwrap());
    }

    #[tokio::test]
    async fn cross_references_are_ordered_by_weight() {
        let bible = fixture::bible().await;
        let edges = bible.cross_references(43, 1, 1).await.unwrap();
        assert_eq!(edges.len(), 5);
        assert_eq!(edges[0].target, VerseRef::single(1, 1, 1));
        assert_eq!(edges[0].origin_tag, "openbible");
        assert!(edges.windows(2).all(|w| w[0].weight >= w[1].weight));
    }
}
