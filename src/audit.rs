use std::fmt::Write as _;

use anyhow::Result;
use serde_json::Value;

use crate::bible::BibleStore;
use crate::books;
use crate::db::Database;
use crate::models::{Severity, StoredInsight, ValidationIssue};
use crate::validation;

const SUMMARY_LIMIT: usize = 20;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub checked: usize,
    pub valid: usize,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn record(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Validation Summary ===");
        let _ = writeln!(out, "Insights checked: {}", self.checked);
        let _ = writeln!(out, "Valid: {}", self.valid);
        let _ = writeln!(out, "Errors: {}", self.errors.len());
        let _ = writeln!(out, "Warnings: {}", self.warnings.len());

        for (label, issues) in [("Errors", &self.errors), ("Warnings", &self.warnings)] {
            if issues.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n=== {label} ({}) ===", issues.len());
            for issue in issues.iter().take(SUMMARY_LIMIT) {
                let _ = writeln!(out, "{issue}");
            }
            if issues.len() > SUMMARY_LIMIT {
                let _ = writeln!(
                    out,
                    "... and {} more {}",
                    issues.len() - SUMMARY_LIMIT,
                    label.to_lowercase()
                );
            }
        }

        out
    }
}

/// Re-checks persisted insights against the Bible database.
pub struct Auditor {
    bible: BibleStore,
    commentary: Database,
}

impl Auditor {
    pub fn new(bible: BibleStore, commentary: Database) -> Self {
        Self { bible, commentary }
    }

    /// Audits the given chapters, or every chapter that has insights.
    pub async fn audit_book(&self, book_id: u32, chapters: Option<Vec<u32>>) -> Result<ValidationReport> {
        let chapters = match chapters {
            Some(chapters) => chapters,
            None => self.commentary.insight_chapters(book_id).await?,
        };

        let mut report = ValidationReport::default();
        for chapter in chapters {
            self.audit_chapter(book_id, chapter, &mut report).await?;
        }
        Ok(report)
    }

    pub async fn audit_chapter(
        &self,
        book_id: u32,
        chapter: u32,
        report: &mut ValidationReport,
    ) -> Result<()> {
        let insights = self.commentary.insights_for_chapter(book_id, chapter).await?;
        tracing::info!(
            book = books::book_name(book_id).unwrap_or("Unknown"),
            chapter,
            insights = insights.len(),
            "auditing chapter"
        );

        for insight in &insights {
            report.checked += 1;
            if self.audit_insight(insight, report).await? {
                report.valid += 1;
            }
        }
        Ok(())
    }

    async fn audit_insight(&self, insight: &StoredInsight, report: &mut ValidationReport) -> Result<bool> {
        let verse = &insight.verse;
        let verse_text = self
            .bible
            .verse_text(verse.book_id, verse.chapter, verse.verse_start, None)
            .await?;
        if verse_text.is_empty() {
            report.record(ValidationIssue::error(
                &insight.id,
                format!(
                    "Verse not found: {}:{}:{}",
                    verse.book_id, verse.chapter, verse.verse_start
                ),
            ));
            return Ok(false);
        }

        let segment_valid = match validation::check_stored_segment(insight, &verse_text) {
            Some(issue) => {
                report.record(issue);
                false
            }
            None => true,
        };
        let sources_valid = self.audit_sources(insight, report).await?;

        let warnings = validation::quality_warnings(&insight.title, &insight.content, &insight.id);
        let quality_valid = warnings.is_empty();
        for warning in warnings {
            report.record(warning);
        }

        Ok(segment_valid && sources_valid && quality_valid)
    }

    async fn audit_sources(&self, insight: &StoredInsight, report: &mut ValidationReport) -> Result<bool> {
        let id = insight.id.as_str();
        let sources = match serde_json::from_str::<Value>(&insight.sources) {
            Ok(Value::Array(sources)) => sources,
            Ok(_) => {
                report.record(ValidationIssue::error(id, "Sources must be an array"));
                return Ok(false);
            }
            Err(_) => {
                report.record(ValidationIssue::error(id, "Invalid sources JSON"));
                return Ok(false);
            }
        };

        for source in &sources {
            let source_type = source.get("type").and_then(Value::as_str).unwrap_or_default();
            let reference = source
                .get("reference")
                .and_then(Value::as_str)
                .unwrap_or_default();

            match source_type {
                "crossReference" => match books::parse_reference(reference) {
                    None => report.record(ValidationIssue::warning(
                        id,
                        format!("Could not parse cross-reference: {reference}"),
                    )),
                    Some((book, chapter, verse)) => {
                        if !self.bible.verse_exists(book, chapter, verse).await? {
                            report.record(ValidationIssue::warning(
                                id,
                                format!("Cross-reference verse not found: {reference}"),
                            ));
                        }
                    }
                },
                "strongs" => {
                    if let Some(issue) = validation::check_strongs_reference(reference, id) {
                        report.record(issue);
                    }
                }
                _ => {}
            }
        }

        Ok(true)
    }
}
