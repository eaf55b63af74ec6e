use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::books;

/// A contiguous verse range inside one book and chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VerseRef {
    pub book_id: u32,
    pub chapter: u32,
    pub verse_start: u32,
    pub verse_end: u32,
}

impl VerseRef {
    pub fn single(book_id: u32, chapter: u32, verse: u32) -> Self {
        Self::range(book_id, chapter, verse, verse)
    }

    /// Builds a range; an end before the start collapses to a single verse.
    pub fn range(book_id: u32, chapter: u32, verse_start: u32, verse_end: u32) -> Self {
        Self {
            book_id,
            chapter,
            verse_start,
            verse_end: verse_end.max(verse_start),
        }
    }

    pub fn is_single(&self) -> bool {
        self.verse_start == self.verse_end
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let book = books::book_name(self.book_id).unwrap_or("Unknown");
        if self.is_single() {
            write!(f, "{} {}:{}", book, self.chapter, self.verse_start)
        } else {
            write!(
                f,
                "{} {}:{}-{}",
                book, self.chapter, self.verse_start, self.verse_end
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verse {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReferenceEdge {
    pub source: VerseRef,
    pub target: VerseRef,
    pub weight: f64,
    pub origin_tag: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Connection,
    Greek,
    Theology,
    Question,
}

impl InsightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightKind::Connection => "connection",
            InsightKind::Greek => "greek",
            InsightKind::Theology => "theology",
            InsightKind::Question => "question",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "connection" => Some(InsightKind::Connection),
            "greek" => Some(InsightKind::Greek),
            "theology" => Some(InsightKind::Theology),
            "question" => Some(InsightKind::Question),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Quotation,
    Theme,
    Typology,
    Prophecy,
    Parallel,
    Keyword,
    Other,
}

impl ConnectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Quotation => "quotation",
            ConnectionType::Theme => "theme",
            ConnectionType::Typology => "typology",
            ConnectionType::Prophecy => "prophecy",
            ConnectionType::Parallel => "parallel",
            ConnectionType::Keyword => "keyword",
            ConnectionType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "quotation" => Some(ConnectionType::Quotation),
            "theme" => Some(ConnectionType::Theme),
            "typology" => Some(ConnectionType::Typology),
            "prophecy" => Some(ConnectionType::Prophecy),
            "parallel" => Some(ConnectionType::Parallel),
            "keyword" => Some(ConnectionType::Keyword),
            "other" => Some(ConnectionType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightSource {
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub reference: String,
}

/// Insight exactly as the producer returned it. Nothing here is trusted.
///
/// Offsets and `is_interpretive` stay loosely typed: the offsets are only
/// checked for presence and the locator replaces them anyway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInsight {
    pub segment_text: Option<String>,
    pub segment_start_char: Option<Value>,
    pub segment_end_char: Option<Value>,
    pub kind: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub icon: Option<String>,
    pub sources: Option<Vec<InsightSource>>,
    pub is_interpretive: Option<Value>,
}

impl RawInsight {
    /// Reads a candidate from a JSON object. A key holding `null` still
    /// counts as present for the offsets; text fields must be non-null.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        fn take(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
            keys.iter().find_map(|key| map.remove(*key))
        }

        let segment_text = take(&mut map, &["segment_text"]).and_then(|v| lenient_text(&v));
        let segment_start_char = take(&mut map, &["segment_start_char", "segment_start"]);
        let segment_end_char = take(&mut map, &["segment_end_char", "segment_end"]);
        let kind = take(&mut map, &["type", "kind"]).and_then(|v| lenient_text(&v));
        let title = take(&mut map, &["title"]).and_then(|v| lenient_text(&v));
        let content = take(&mut map, &["content"]).and_then(|v| lenient_text(&v));
        let icon = take(&mut map, &["icon"]).and_then(|v| lenient_text(&v));
        let sources = take(&mut map, &["sources"]).map(|v| match v {
            Value::Array(items) => items.iter().filter_map(InsightSource::from_value).collect(),
            _ => Vec::new(),
        });
        let is_interpretive = take(&mut map, &["is_interpretive"]);

        Self {
            segment_text,
            segment_start_char,
            segment_end_char,
            kind,
            title,
            content,
            icon,
            sources,
            is_interpretive,
        }
    }
}

impl InsightSource {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let field = |key: &str| object.get(key).and_then(lenient_text).unwrap_or_default();
        Some(Self {
            source_type: field("type"),
            reference: field("reference"),
        })
    }
}

/// Strings as-is, numbers and booleans in their JSON spelling, null as absent.
pub fn lenient_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// An insight whose segment has been reconciled against the verse text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub segment_text: String,
    pub segment_start: usize,
    pub segment_end: usize,
    pub kind: InsightKind,
    pub title: String,
    pub content: String,
    pub icon: String,
    pub sources: Vec<InsightSource>,
    pub is_interpretive: bool,
}

/// A persisted insight row, read back for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInsight {
    pub id: String,
    pub verse: VerseRef,
    pub segment_text: String,
    pub segment_start: i64,
    pub segment_end: i64,
    pub kind: String,
    pub title: String,
    pub content: String,
    pub icon: String,
    pub sources: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossRefExplanation {
    pub source: VerseRef,
    pub target: VerseRef,
    pub anchor_phrase: Option<String>,
    pub title: String,
    pub content: String,
    pub connection_type: ConnectionType,
    pub confidence: Confidence,
    pub weight: f64,
    pub prompt_version: String,
    pub model_tag: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub subject_id: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            subject_id: subject_id.into(),
            message: message.into(),
        }
    }

    pub fn warning(subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            subject_id: subject_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", tag, self.subject_id, self.message)
    }
}

/// Counters for one generation run. Only used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub verses: usize,
    pub saved: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl RunStats {
    pub fn absorb(&mut self, other: RunStats) {
        self.verses += other.verses;
        self.saved += other.saved;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: RunStats,
}
