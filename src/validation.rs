//! Acceptance rules for generated content.
//!
//! Two gates live here. The acceptance gate decides whether a candidate may
//! be persisted at all; its failures are errors. The quality gate only
//! produces warnings for later auditing and never blocks persistence.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::books;
use crate::locator;
use crate::models::{
    lenient_text, Confidence, ConnectionType, Insight, InsightKind, RawInsight, StoredInsight,
    ValidationIssue,
};

/// Overreach and filler phrases, matched case-insensitively.
pub const BAN_LIST: &[&str] = &[
    "definitively proves",
    "this verse proves",
    "beyond any doubt",
    "the only correct interpretation",
    "all Christians must believe",
    "I believe",
    "in my opinion",
    "probably means",
    "how does this make you feel",
    "journal about",
    "pray about this",
];

const TITLE_CHARS: (usize, usize) = (3, 50);
const CONTENT_CHARS: (usize, usize) = (30, 500);
const GREEK_STRONGS: (u32, u32) = (1, 5624);
const HEBREW_STRONGS: (u32, u32) = (1, 8674);

const MIN_EXPLANATION_CHARS: usize = 20;
const MAX_TITLE_WORDS: usize = 10;

const CONNECTION_KEYWORDS: &[(ConnectionType, &[&str])] = &[
    (
        ConnectionType::Quotation,
        &["quote", "quoted", "citing", "citation", "allusion", "allude", "echoes"],
    ),
    (
        ConnectionType::Theme,
        &["theme", "thematic", "concept", "idea", "motif"],
    ),
    (
        ConnectionType::Typology,
        &["type", "shadow", "prefigure", "antitype", "foreshadow"],
    ),
    (
        ConnectionType::Prophecy,
        &["prophec", "fulfill", "foretold", "predict"],
    ),
    (
        ConnectionType::Parallel,
        &["parallel", "similar", "compare", "analogy", "likewise"],
    ),
    (
        ConnectionType::Keyword,
        &["word", "term", "phrase", "language", "vocabulary"],
    ),
];

static STRONGS_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[GH]\d{1,5}").expect("strong's token regex is valid"));

static STRONGS_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([GH])(\d+)$").expect("strong's reference regex is valid"));

/// Failure to turn a producer response into something usable. Always retryable.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("validation failed: {0}")]
    Invalid(String),
}

/// Converts one loosely-typed insight element and validates it.
pub fn validate_insight_value(
    value: Value,
    verse_text: &str,
    subject_id: &str,
) -> (Option<Insight>, Vec<ValidationIssue>) {
    match value {
        Value::Object(map) => validate_insight(RawInsight::from_map(map), verse_text, subject_id),
        other => (
            None,
            vec![ValidationIssue::error(
                subject_id,
                format!("Malformed insight: expected an object, got {other}"),
            )],
        ),
    }
}

/// Accepts, fixes or rejects one candidate. The candidate's own offsets are
/// ignored; the segment is re-located in `verse_text`.
pub fn validate_insight(
    candidate: RawInsight,
    verse_text: &str,
    subject_id: &str,
) -> (Option<Insight>, Vec<ValidationIssue>) {
    let mut issues = Vec::new();

    let required = [
        ("segment_text", candidate.segment_text.is_some()),
        ("segment_start_char", candidate.segment_start_char.is_some()),
        ("segment_end_char", candidate.segment_end_char.is_some()),
        ("type", candidate.kind.is_some()),
        ("title", candidate.title.is_some()),
        ("content", candidate.content.is_some()),
        ("icon", candidate.icon.is_some()),
    ];
    for (field, present) in required {
        if !present {
            issues.push(ValidationIssue::error(
                subject_id,
                format!("Missing required field: {field}"),
            ));
        }
    }

    let RawInsight {
        segment_text: Some(segment_text),
        segment_start_char: Some(claimed_start),
        segment_end_char: Some(claimed_end),
        kind: Some(kind),
        title: Some(title),
        content: Some(content),
        icon: Some(icon),
        sources,
        is_interpretive,
    } = candidate
    else {
        return (None, issues);
    };

    let Some(span) = locator::locate(&segment_text, verse_text) else {
        issues.push(ValidationIssue::error(
            subject_id,
            format!("Segment text not found in verse: '{segment_text}'"),
        ));
        return (None, issues);
    };
    if claimed_start.as_f64() != Some(span.start as f64)
        || claimed_end.as_f64() != Some(span.end as f64)
    {
        tracing::debug!(
            subject = subject_id,
            claimed_start = %claimed_start,
            claimed_end = %claimed_end,
            start = span.start,
            end = span.end,
            "corrected segment offsets"
        );
    }

    let Some(kind) = InsightKind::parse(&kind) else {
        issues.push(ValidationIssue::error(
            subject_id,
            format!("Invalid type: {kind}"),
        ));
        return (None, issues);
    };

    let sources = sources.unwrap_or_default();
    if kind == InsightKind::Connection {
        if sources.is_empty() {
            issues.push(ValidationIssue::error(
                subject_id,
                "Connection insight missing sources",
            ));
            return (None, issues);
        }

        for source in &sources {
            if source.source_type == "crossReference"
                && !books::is_cross_reference_format(&source.reference)
            {
                issues.push(ValidationIssue::error(
                    subject_id,
                    format!("Invalid cross-reference format: {}", source.reference),
                ));
                return (None, issues);
            }
        }
    }

    if kind == InsightKind::Greek && !STRONGS_TOKEN_RE.is_match(&content) {
        issues.push(ValidationIssue::error(
            subject_id,
            "Greek insight missing Strong's number (G#### or H####)",
        ));
        return (None, issues);
    }

    let insight = Insight {
        segment_text: span.text,
        segment_start: span.start,
        segment_end: span.end,
        kind,
        title,
        content,
        icon,
        sources,
        is_interpretive: is_interpretive
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false),
    };
    (Some(insight), issues)
}

/// Ban-list and length checks. Warnings only.
pub fn quality_warnings(title: &str, content: &str, subject_id: &str) -> Vec<ValidationIssue> {
    let mut warnings = Vec::new();
    let title_lower = title.to_lowercase();
    let content_lower = content.to_lowercase();

    for banned in BAN_LIST {
        let banned_lower = banned.to_lowercase();
        if content_lower.contains(&banned_lower) || title_lower.contains(&banned_lower) {
            warnings.push(ValidationIssue::warning(
                subject_id,
                format!("Contains banned phrase: '{banned}'"),
            ));
        }
    }

    let content_len = content.chars().count();
    if content_len < CONTENT_CHARS.0 {
        warnings.push(ValidationIssue::warning(
            subject_id,
            format!("Content too short: {content_len} chars"),
        ));
    } else if content_len > CONTENT_CHARS.1 {
        warnings.push(ValidationIssue::warning(
            subject_id,
            format!("Content too long: {content_len} chars"),
        ));
    }

    let title_len = title.chars().count();
    if title_len < TITLE_CHARS.0 {
        warnings.push(ValidationIssue::warning(
            subject_id,
            format!("Title too short: {title_len} chars"),
        ));
    } else if title_len > TITLE_CHARS.1 {
        warnings.push(ValidationIssue::warning(
            subject_id,
            format!("Title too long: {title_len} chars"),
        ));
    }

    warnings
}

/// Re-checks a persisted insight's offsets against the verse text.
pub fn check_stored_segment(insight: &StoredInsight, verse_text: &str) -> Option<ValidationIssue> {
    let start = insight.segment_start;
    let end = insight.segment_end;
    let verse_len = verse_text.chars().count() as i64;

    let message = if start < 0 {
        format!("segment_start_char < 0: {start}")
    } else if end > verse_len {
        format!("segment_end_char > verse length: {end} > {verse_len}")
    } else if start >= end {
        format!("segment_start_char >= segment_end_char: {start} >= {end}")
    } else {
        let actual = locator::slice_chars(verse_text, start as usize, end as usize);
        if actual == insight.segment_text {
            return None;
        }
        format!(
            "Segment text mismatch. Expected '{}', got '{}'",
            insight.segment_text, actual
        )
    };

    Some(ValidationIssue::error(&insight.id, message))
}

/// Format is an error, an out-of-range number only a warning.
pub fn check_strongs_reference(reference: &str, subject_id: &str) -> Option<ValidationIssue> {
    let upper = reference.to_uppercase();
    let Some(caps) = STRONGS_REF_RE.captures(&upper) else {
        return Some(ValidationIssue::error(
            subject_id,
            format!("Invalid Strong's number format: {reference}"),
        ));
    };

    let number: u32 = caps[2].parse().unwrap_or(0);
    let (low, high) = if &caps[1] == "G" {
        GREEK_STRONGS
    } else {
        HEBREW_STRONGS
    };
    if number < low || number > high {
        return Some(ValidationIssue::warning(
            subject_id,
            format!("Strong's number out of range: {reference}"),
        ));
    }

    None
}

/// A cross-reference explanation that passed semantic validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationDraft {
    pub title: String,
    pub content: String,
    pub connection_type: ConnectionType,
    pub confidence: Confidence,
    pub anchor_phrase: Option<String>,
}

/// Parses and validates one explanation response against the source verse.
pub fn parse_explanation(raw: &str, source_text: &str) -> Result<ExplanationDraft, ResponseError> {
    let value: Value = serde_json::from_str(raw.trim())?;
    let Some(object) = value.as_object() else {
        return Err(ResponseError::Invalid(
            "response is not a JSON object".to_string(),
        ));
    };

    let field = |key: &str| object.get(key).and_then(lenient_text);
    let mut required = Vec::with_capacity(3);
    for key in ["title", "content", "connection_type"] {
        match field(key) {
            Some(text) if !text.trim().is_empty() => required.push(text),
            _ => {
                return Err(ResponseError::Invalid(format!(
                    "missing required key: {key}"
                )))
            }
        }
    }
    let [title, content, connection_type]: [String; 3] = required
        .try_into()
        .map_err(|_| ResponseError::Invalid("missing required keys".to_string()))?;

    let title = title
        .split_whitespace()
        .take(MAX_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ");

    let content = content.trim().to_string();
    if content.chars().count() < MIN_EXPLANATION_CHARS {
        return Err(ResponseError::Invalid("content too short".to_string()));
    }

    let connection_type = ConnectionType::parse(connection_type.trim())
        .unwrap_or_else(|| classify_connection(&content));
    let confidence = field("confidence")
        .and_then(|c| Confidence::parse(c.trim()))
        .unwrap_or(Confidence::Medium);

    let source_lower = source_text.to_lowercase();
    let anchor_phrase = field("anchor_phrase")
        .filter(|anchor| !anchor.trim().is_empty())
        .filter(|anchor| source_lower.contains(&anchor.to_lowercase()));

    Ok(ExplanationDraft {
        title,
        content,
        connection_type,
        confidence,
        anchor_phrase,
    })
}

/// Extracts the `insights` array of a single-verse response.
pub fn parse_insight_response(raw: &str) -> Result<Vec<Value>, ResponseError> {
    let value: Value = serde_json::from_str(raw.trim())?;
    match value {
        Value::Object(mut object) => match object.remove("insights") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ResponseError::Invalid(
                "response has no insights array".to_string(),
            )),
        },
        _ => Err(ResponseError::Invalid(
            "response is not a JSON object".to_string(),
        )),
    }
}

/// Keyword classification used when the producer names an unknown type.
pub fn classify_connection(content: &str) -> ConnectionType {
    let lower = content.to_lowercase();
    CONNECTION_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ConnectionType::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InsightSource, Severity};
    use serde_json::json;

    const JOHN_1_1: &str =
        "In the beginning was the Word, and the Word was with God, and the Word was God.";

    fn candidate(kind: &str) -> RawInsight {
        RawInsight {
            segment_text: Some("the Word was God".to_string()),
            segment_start_char: Some(json!(0)),
            segment_end_char: Some(json!(3)),
            kind: Some(kind.to_string()),
            title: Some("Deity of the Word".to_string()),
            content: Some("John identifies the Word fully with God (G2316).".to_string()),
            icon: Some("sparkles".to_string()),
            sources: None,
            is_interpretive: Some(json!(true)),
        }
    }

    fn cross_ref(reference: &str) -> InsightSource {
        InsightSource {
            source_type: "crossReference".to_string(),
            reference: reference.to_string(),
        }
    }

    #[test]
    fn accepted_candidate_gets_located_offsets() {
        let (fixed, issues) = validate_insight(candidate("theology"), JOHN_1_1, "43_1_1");
        let fixed = fixed.expect("candidate accepted");
        assert!(issues.is_empty());
        assert_eq!((fixed.segment_start, fixed.segment_end), (62, 78));
        assert_eq!(fixed.segment_text, "the Word was God");
        assert_eq!(fixed.kind, InsightKind::Theology);
        assert!(fixed.is_interpretive);
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let mut raw = candidate("theology");
        raw.icon = None;
        raw.title = None;
        let (fixed, issues) = validate_insight(raw, JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::Error));
        assert!(issues[0].message.contains("title"));
    }

    #[test]
    fn unlocatable_segment_is_rejected() {
        let mut raw = candidate("theology");
        raw.segment_text = Some("Jesus wept bitterly".to_string());
        let (fixed, issues) = validate_insight(raw, JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert!(issues.iter().any(|i| i.severity == Severity::Error));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let (fixed, issues) = validate_insight(candidate("history"), JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert_eq!(issues[0].message, "Invalid type: history");
    }

    #[test]
    fn connection_without_sources_is_rejected() {
        let mut raw = candidate("connection");
        raw.sources = Some(vec![]);
        let (fixed, issues) = validate_insight(raw, JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn connection_reference_format_is_enforced() {
        let mut raw = candidate("connection");
        raw.sources = Some(vec![cross_ref("Genesis 1:1"), cross_ref("1 John 1:1-3")]);
        let (fixed, _) = validate_insight(raw, JOHN_1_1, "x");
        assert_eq!(fixed.expect("accepted").sources.len(), 2);

        let mut raw = candidate("connection");
        raw.sources = Some(vec![cross_ref("Gen. 1")]);
        let (fixed, issues) = validate_insight(raw, JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert!(issues[0].message.contains("Gen. 1"));
    }

    #[test]
    fn greek_requires_strongs_number() {
        let (fixed, _) = validate_insight(candidate("greek"), JOHN_1_1, "x");
        assert!(fixed.is_some());

        let mut raw = candidate("greek");
        raw.content = Some("Logos means word or reason in Greek philosophy.".to_string());
        let (fixed, issues) = validate_insight(raw, JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert!(issues[0].message.contains("Strong's"));
    }

    #[test]
    fn non_object_element_is_malformed() {
        let (fixed, issues) = validate_insight_value(json!(["the Word"]), JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert!(issues[0].message.starts_with("Malformed insight"));
    }

    fn element(start: Value, end: Value, sources: Value) -> Value {
        json!({
            "segment_text": "the Word was God",
            "segment_start_char": start,
            "segment_end_char": end,
            "type": "greek",
            "title": "Logos",
            "content": "The Greek logos (G3056) names the Word as speech and reason.",
            "icon": "book",
            "sources": sources,
            "is_interpretive": "yes"
        })
    }

    #[test]
    fn claimed_offsets_only_need_to_be_present() {
        let strongs = json!([{"type": "strongs", "reference": "G3056"}]);
        for (start, end) in [
            (json!(62.0), json!(78.0)),
            (Value::Null, Value::Null),
            (json!("zero"), json!(-4)),
        ] {
            let (fixed, issues) =
                validate_insight_value(element(start, end, strongs.clone()), JOHN_1_1, "x");
            assert!(issues.is_empty(), "{issues:?}");
            let fixed = fixed.expect("accepted");
            assert_eq!((fixed.segment_start, fixed.segment_end), (62, 78));
            assert!(!fixed.is_interpretive);
        }

        let mut missing = element(json!(0), json!(0), strongs);
        if let Some(map) = missing.as_object_mut() {
            map.remove("segment_end_char");
        }
        let (fixed, issues) = validate_insight_value(missing, JOHN_1_1, "x");
        assert!(fixed.is_none());
        assert_eq!(issues[0].message, "Missing required field: segment_end_char");
    }

    #[test]
    fn numeric_source_reference_is_read_as_text() {
        let value = element(json!(0), json!(0), json!([{"type": "strongs", "reference": 3056}]));
        let (fixed, issues) = validate_insight_value(value, JOHN_1_1, "x");
        assert!(issues.is_empty());
        assert_eq!(fixed.expect("accepted").sources[0].reference, "3056");
    }

    #[test]
    fn type_key_wins_over_kind_alias() {
        let mut value = element(json!(0), json!(0), json!([]));
        value["kind"] = json!("history");
        let (fixed, _) = validate_insight_value(value, JOHN_1_1, "x");
        assert_eq!(fixed.expect("accepted").kind, InsightKind::Greek);

        let mut value = element(json!(0), json!(0), json!([]));
        let kind = value.as_object_mut().and_then(|m| m.remove("type"));
        value["kind"] = kind.unwrap_or_default();
        let (fixed, _) = validate_insight_value(value, JOHN_1_1, "x");
        assert_eq!(fixed.expect("accepted").kind, InsightKind::Greek);
    }

    #[test]
    fn quality_gate_only_warns() {
        let warnings = quality_warnings(
            "X",
            "This verse proves everything, beyond any doubt.",
            "x",
        );
        assert!(warnings.iter().all(|w| w.severity == Severity::Warning));
        assert_eq!(warnings.len(), 3);

        let clean = quality_warnings(
            "The Word and creation",
            "Both passages open with the beginning and tie the Word to creation.",
            "x",
        );
        assert!(clean.is_empty());
    }

    #[test]
    fn stored_segment_checks() {
        let mut stored = StoredInsight {
            id: "43_1_1_theology_0".to_string(),
            verse: crate::models::VerseRef::single(43, 1, 1),
            segment_text: "the Word was God".to_string(),
            segment_start: 62,
            segment_end: 78,
            kind: "theology".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            icon: "i".to_string(),
            sources: "[]".to_string(),
        };
        assert!(check_stored_segment(&stored, JOHN_1_1).is_none());

        stored.segment_end = 200;
        assert!(check_stored_segment(&stored, JOHN_1_1).is_some());

        stored.segment_start = 0;
        stored.segment_end = 16;
        let issue = check_stored_segment(&stored, JOHN_1_1).expect("mismatch");
        assert!(issue.message.contains("mismatch"));
    }

    #[test]
    fn strongs_reference_checks() {
        assert!(check_strongs_reference("G3056", "x").is_none());
        assert!(check_strongs_reference("h430", "x").is_none());
        let out_of_range = check_strongs_reference("G9999", "x").expect("warning");
        assert_eq!(out_of_range.severity, Severity::Warning);
        let malformed = check_strongs_reference("logos", "x").expect("error");
        assert_eq!(malformed.severity, Severity::Error);
    }

    #[test]
    fn explanation_is_sanitized() {
        let raw = json!({
            "title": "One two three four five six seven eight nine ten eleven",
            "content": "  Both passages emphasize light shining in darkness.  ",
            "connection_type": "echo",
            "anchor_phrase": "THE WORD WAS GOD",
            "confidence": "certain",
            "extra": 1
        })
        .to_string();

        let draft = parse_explanation(&raw, JOHN_1_1).expect("valid explanation");
        assert_eq!(draft.title.split_whitespace().count(), 10);
        assert_eq!(draft.content, "Both passages emphasize light shining in darkness.");
        assert_eq!(draft.connection_type, ConnectionType::Other);
        assert_eq!(draft.confidence, Confidence::Medium);
        assert_eq!(draft.anchor_phrase.as_deref(), Some("THE WORD WAS GOD"));
    }

    #[test]
    fn explanation_anchor_not_in_source_is_dropped() {
        let raw = json!({
            "title": "Light and life",
            "content": "This connection highlights a shared theme of light.",
            "connection_type": "theme",
            "anchor_phrase": "light of the world",
            "confidence": "high"
        })
        .to_string();
        let draft = parse_explanation(&raw, JOHN_1_1).expect("valid explanation");
        assert_eq!(draft.anchor_phrase, None);
        assert_eq!(draft.connection_type, ConnectionType::Theme);
        assert_eq!(draft.confidence, Confidence::High);
    }

    #[test]
    fn explanation_failures_are_reported() {
        assert!(matches!(
            parse_explanation("{not json", JOHN_1_1),
            Err(ResponseError::Json(_))
        ));
        assert!(matches!(
            parse_explanation(r#"{"title": "t", "content": "long enough content here"}"#, JOHN_1_1),
            Err(ResponseError::Invalid(_))
        ));
        assert!(matches!(
            parse_explanation(
                r#"{"title": "t", "content": "too short", "connection_type": "theme"}"#,
                JOHN_1_1
            ),
            Err(ResponseError::Invalid(_))
        ));
        assert!(matches!(
            parse_explanation("[1, 2]", JOHN_1_1),
            Err(ResponseError::Invalid(_))
        ));
    }

    #[test]
    fn insight_response_needs_array() {
        let items = parse_insight_response(r#"{"insights": [{"title": "a"}]}"#).expect("array");
        assert_eq!(items.len(), 1);
        assert!(parse_insight_response(r#"{"insights": "none"}"#).is_err());
        assert!(parse_insight_response("[]").is_err());
    }

    #[test]
    fn classifies_by_keywords_in_order() {
        assert_eq!(
            classify_connection("Jesus quoted this psalm"),
            ConnectionType::Quotation
        );
        assert_eq!(
            classify_connection("The prophecy is fulfilled"),
            ConnectionType::Prophecy
        );
        assert_eq!(classify_connection("Nothing obvious"), ConnectionType::Other);
    }
}
