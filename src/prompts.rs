use crate::models::Verse;

pub const MARGINALIA_SYSTEM: &str = "You are a biblical scholar creating marginalia for Scripture study.
Output valid JSON only. No markdown code blocks. No explanation outside the JSON.
Follow the schema exactly as specified in the user prompt.";

pub fn crossref_prompt(
    source_ref: &str,
    source_text: &str,
    target_ref: &str,
    target_text: &str,
) -> String {
    format!(
        r#"You are a biblical scholar explaining why two Bible passages are connected.

SOURCE VERSE ({source_ref}):
"{source_text}"

TARGET PASSAGE ({target_ref}):
"{target_text}"

These passages have been identified as connected by biblical scholars. Explain WHY in 2-3 sentences.

Respond in JSON format:
{{
    "title": "Brief title for this connection (3-6 words)",
    "content": "2-3 sentence explanation of the connection",
    "connection_type": "one of: quotation, theme, typology, prophecy, parallel, keyword, other",
    "anchor_phrase": "exact phrase from SOURCE verse that links to target (must appear verbatim in source text above, or null)",
    "confidence": "high, medium, or low - based on how clear/direct the textual connection is"
}}

STRICT RULES - You must follow these:
1. ONLY reference words, phrases, or concepts that appear in the verses above
2. The anchor_phrase MUST be copied exactly from the source verse text, or use null
3. Do NOT add theological claims, historical facts, or interpretations beyond what the text states
4. Do NOT speculate about author intent or historical context
5. Use hedging language: "This connection highlights..." or "Both passages emphasize..."
6. Keep explanations to observable textual/thematic parallels only
7. If the connection is weak or unclear, say so honestly
8. Maximum 8 words for any direct quote"#
    )
}

pub fn marginalia_prompt(
    book_name: &str,
    chapter: u32,
    verse: &Verse,
    context_verses: &str,
) -> String {
    format!(
        r#"Create study marginalia for {book_name} {chapter}:{number}.

VERSE TEXT:
"{text}"

SURROUNDING CONTEXT (target verse marked with >>>):
{context_verses}

Return a JSON object with an "insights" array of 2-4 items. Each item:
{{
    "segment_text": "exact words copied from the verse text above",
    "segment_start_char": 0,
    "segment_end_char": 0,
    "type": "one of: connection, greek, theology, question",
    "title": "3-6 word title",
    "content": "1-3 sentences, 30-500 characters",
    "icon": "short icon name",
    "sources": [{{"type": "crossReference or strongs", "reference": "e.g. Genesis 1:1 or G3056"}}],
    "is_interpretive": true or false
}}

RULES:
1. segment_text MUST appear verbatim in the verse text; quote at most 8 words
2. segment offsets count characters from the start of the verse text
3. "connection" insights MUST list at least one crossReference source formatted as "Book Chapter:Verse"
4. "greek" insights MUST cite a Strong's number (G#### or H####) in the content
5. Use hedged language; mark anything beyond the plain text with is_interpretive = true
6. No devotional application, no personal opinion"#,
        number = verse.number,
        text = verse.text,
    )
}

/// Neighbouring verses within `window` of `verse_number`, the target marked with `>>>`.
pub fn context_window(verses: &[Verse], verse_number: u32, window: u32) -> String {
    let low = verse_number.saturating_sub(window);
    let high = verse_number.saturating_add(window);

    verses
        .iter()
        .filter(|v| v.number >= low && v.number <= high)
        .map(|v| {
            let marker = if v.number == verse_number { ">>>" } else { "   " };
            format!("{marker} {}. {}", v.number, v.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
