//! Reconciles a free-text quotation against canonical verse text.
//!
//! Generated insights quote the verse they annotate, but the quotes drift:
//! casing changes, punctuation gets added, whitespace collapses, words go
//! missing. The locator runs an ordered list of [`SpanMatcher`]s and keeps
//! the first hit. Offsets are character offsets into the verse text and the
//! returned text is always the verse's own slice.

use std::sync::LazyLock;

/// Characters stripped from both ends of a quotation before retrying.
const STRIP_CHARS: &[char] = &['.', ',', ';', ':', '!', '?', '"', '\''];

/// Windows shorter than this are too generic to trust.
const MIN_WINDOW_CHARS: usize = 10;

/// Single-word quotations shorter than this are too generic to trust.
const MIN_SINGLE_WORD_CHARS: usize = 5;

static DEFAULT_LOCATOR: LazyLock<SegmentLocator> = LazyLock::new(SegmentLocator::default);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

pub trait SpanMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn find(&self, quotation: &str, verse: &str) -> Option<SegmentSpan>;
}

pub struct SegmentLocator {
    matchers: Vec<Box<dyn SpanMatcher>>,
}

impl Default for SegmentLocator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ExactMatch),
            Box::new(CaseInsensitiveMatch),
            Box::new(TrimmedPunctuation),
            Box::new(WhitespaceNormalized),
            Box::new(WordWindow),
            Box::new(SingleWord),
        ])
    }
}

impl SegmentLocator {
    pub fn new(matchers: Vec<Box<dyn SpanMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn locate(&self, quotation: &str, verse: &str) -> Option<SegmentSpan> {
        if quotation.trim().is_empty() || verse.is_empty() {
            return None;
        }

        for matcher in &self.matchers {
            if let Some(span) = matcher.find(quotation, verse) {
                tracing::debug!(
                    strategy = matcher.name(),
                    start = span.start,
                    end = span.end,
                    "segment located"
                );
                return Some(span);
            }
        }

        None
    }
}

/// Runs the standard cascade.
pub fn locate(quotation: &str, verse: &str) -> Option<SegmentSpan> {
    DEFAULT_LOCATOR.locate(quotation, verse)
}

pub struct ExactMatch;

impl SpanMatcher for ExactMatch {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn find(&self, quotation: &str, verse: &str) -> Option<SegmentSpan> {
        find_exact(quotation, verse)
    }
}

pub struct CaseInsensitiveMatch;

impl SpanMatcher for CaseInsensitiveMatch {
    fn name(&self) -> &'static str {
        "case_insensitive"
    }

    fn find(&self, quotation: &str, verse: &str) -> Option<SegmentSpan> {
        find_folded(quotation, verse)
    }
}

pub struct TrimmedPunctuation;

impl SpanMatcher for TrimmedPunctuation {
    fn name(&self) -> &'static str {
        "trimmed_punctuation"
    }

    fn find(&self, quotation: &str, verse: &str) -> Option<SegmentSpan> {
        let stripped = quotation.trim_matches(|c: char| c.is_whitespace() || STRIP_CHARS.contains(&c));
        if stripped == quotation {
            return None;
        }
        find_exact(stripped, verse).or_else(|| find_folded(stripped, verse))
    }
}

/// Collapses whitespace runs on both sides and maps the hit back onto the
/// original verse, so the span is a real slice even when the verse carries
/// doubled spaces or line breaks.
pub struct WhitespaceNormalized;

impl SpanMatcher for WhitespaceNormalized {
    fn name(&self) -> &'static str {
        "whitespace_normalized"
    }

    fn find(&self, quotation: &str, verse: &str) -> Option<SegmentSpan> {
        let normalized_quote = quotation.split_whitespace().collect::<Vec<_>>().join(" ");
        let (normalized_verse, positions) = normalize_with_positions(verse);
        if normalized_quote.is_empty()
            || (normalized_quote == quotation && normalized_verse == verse)
        {
            return None;
        }

        let folded_verse = fold_case(&normalized_verse);
        let byte_idx = folded_verse.find(&fold_case(&normalized_quote))?;
        let start = char_offset(&folded_verse, byte_idx);
        let end = start + normalized_quote.chars().count();

        let orig_start = *positions.get(start)?;
        let orig_end = positions.get(end - 1)? + 1;
        Some(SegmentSpan {
            start: orig_start,
            end: orig_end,
            text: slice_chars(verse, orig_start, orig_end),
        })
    }
}

/// Word-level fallback: longest prefix, then longest suffix, then the
/// largest interior window of at least [`MIN_WINDOW_CHARS`] characters.
pub struct WordWindow;

impl SpanMatcher for WordWindow {
    fn name(&self) -> &'static str {
        "word_window"
    }

    fn find(&self, quotation: &str, verse: &str) -> Option<SegmentSpan> {
        let words: Vec<&str> = quotation.split_whitespace().collect();
        let count = words.len();
        if count < 2 {
            return None;
        }

        for take in (1..=count).rev() {
            if let Some(span) = find_folded(&words[..take].join(" "), verse) {
                return Some(span);
            }
        }

        for take in (1..=count).rev() {
            if let Some(span) = find_folded(&words[count - take..].join(" "), verse) {
                return Some(span);
            }
        }

        for size in (2..count).rev() {
            for start in 0..=(count - size) {
                let partial = words[start..start + size].join(" ");
                if partial.chars().count() < MIN_WINDOW_CHARS {
                    continue;
                }
                if let Some(span) = find_folded(&partial, verse) {
                    return Some(span);
                }
            }
        }

        None
    }
}

pub struct SingleWord;

impl SpanMatcher for SingleWord {
    fn name(&self) -> &'static str {
        "single_word"
    }

    fn find(&self, quotation: &str, verse: &str) -> Option<SegmentSpan> {
        let mut words = quotation.split_whitespace();
        let word = words.next()?;
        if words.next().is_some() || word.chars().count() < MIN_SINGLE_WORD_CHARS {
            return None;
        }
        find_folded(word, verse)
    }
}

fn find_exact(needle: &str, haystack: &str) -> Option<SegmentSpan> {
    if needle.is_empty() {
        return None;
    }
    let byte_idx = haystack.find(needle)?;
    let start = char_offset(haystack, byte_idx);
    Some(SegmentSpan {
        start,
        end: start + needle.chars().count(),
        text: needle.to_string(),
    })
}

fn find_folded(needle: &str, haystack: &str) -> Option<SegmentSpan> {
    if needle.is_empty() {
        return None;
    }
    let folded_haystack = fold_case(haystack);
    let byte_idx = folded_haystack.find(&fold_case(needle))?;
    let start = char_offset(&folded_haystack, byte_idx);
    let end = start + needle.chars().count();
    Some(SegmentSpan {
        start,
        end,
        text: slice_chars(haystack, start, end),
    })
}

/// Lowercases one char at a time, keeping chars whose lowercase form is not
/// a single char. Char positions therefore line up with the input.
fn fold_case(text: &str) -> String {
    text.chars()
        .map(|c| {
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(single), None) => single,
                _ => c,
            }
        })
        .collect()
}

fn normalize_with_positions(text: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(text.len());
    let mut positions = Vec::with_capacity(text.len());
    let mut pending_space = None;

    for (idx, c) in text.chars().enumerate() {
        if c.is_whitespace() {
            if !out.is_empty() && pending_space.is_none() {
                pending_space = Some(idx);
            }
            continue;
        }
        if let Some(space_idx) = pending_space.take() {
            out.push(' ');
            positions.push(space_idx);
        }
        out.push(c);
        positions.push(idx);
    }

    (out, positions)
}

fn char_offset(text: &str, byte_idx: usize) -> usize {
    text[..byte_idx].chars().count()
}

/// Slices by character offsets.
pub fn slice_chars(text: &str, start: usize, end: usize) -> String {
    text.chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}
