use std::sync::LazyLock;

use regex::Regex;

const BOOK_NAMES: [&str; 66] = [
    "Genesis",
    "Exodus",
    "Leviticus",
    "Numbers",
    "Deuteronomy",
    "Joshua",
    "Judges",
    "Ruth",
    "1 Samuel",
    "2 Samuel",
    "1 Kings",
    "2 Kings",
    "1 Chronicles",
    "2 Chronicles",
    "Ezra",
    "Nehemiah",
    "Esther",
    "Job",
    "Psalms",
    "Proverbs",
    "Ecclesiastes",
    "Song of Solomon",
    "Isaiah",
    "Jeremiah",
    "Lamentations",
    "Ezekiel",
    "Daniel",
    "Hosea",
    "Joel",
    "Amos",
    "Obadiah",
    "Jonah",
    "Micah",
    "Nahum",
    "Habakkuk",
    "Zephaniah",
    "Haggai",
    "Zechariah",
    "Malachi",
    "Matthew",
    "Mark",
    "Luke",
    "John",
    "Acts",
    "Romans",
    "1 Corinthians",
    "2 Corinthians",
    "Galatians",
    "Ephesians",
    "Philippians",
    "Colossians",
    "1 Thessalonians",
    "2 Thessalonians",
    "1 Timothy",
    "2 Timothy",
    "Titus",
    "Philemon",
    "Hebrews",
    "James",
    "1 Peter",
    "2 Peter",
    "1 John",
    "2 John",
    "3 John",
    "Jude",
    "Revelation",
];

// Keys are lowercase with spaces removed.
const ALIASES: &[(&str, u32)] = &[
    ("gen", 1),
    ("exod", 2),
    ("ex", 2),
    ("lev", 3),
    ("num", 4),
    ("deut", 5),
    ("josh", 6),
    ("judg", 7),
    ("1sam", 9),
    ("2sam", 10),
    ("1kgs", 11),
    ("2kgs", 12),
    ("1chr", 13),
    ("1chron", 13),
    ("2chr", 14),
    ("2chron", 14),
    ("neh", 16),
    ("esth", 17),
    ("psalm", 19),
    ("ps", 19),
    ("psa", 19),
    ("prov", 20),
    ("eccl", 21),
    ("eccles", 21),
    ("song", 22),
    ("sos", 22),
    ("songofsongs", 22),
    ("isa", 23),
    ("jer", 24),
    ("lam", 25),
    ("ezek", 26),
    ("dan", 27),
    ("hos", 28),
    ("obad", 31),
    ("mic", 33),
    ("nah", 34),
    ("hab", 35),
    ("zeph", 36),
    ("hag", 37),
    ("zech", 38),
    ("mal", 39),
    ("matt", 40),
    ("mt", 40),
    ("mk", 41),
    ("lk", 42),
    ("jn", 43),
    ("rom", 45),
    ("1cor", 46),
    ("2cor", 47),
    ("gal", 48),
    ("eph", 49),
    ("phil", 50),
    ("col", 51),
    ("1thess", 52),
    ("2thess", 53),
    ("1tim", 54),
    ("2tim", 55),
    ("phlm", 57),
    ("heb", 58),
    ("jas", 59),
    ("1pet", 60),
    ("2pet", 61),
    ("1jn", 62),
    ("2jn", 63),
    ("3jn", 64),
    ("rev", 66),
];

static CROSS_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d\s+)?([A-Za-z]+(\s+[A-Za-z]+)*)\s+\d+:\d+(-\d+)?$")
        .expect("cross-reference regex is valid")
});

static REFERENCE_PARTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d?\s*[A-Za-z]+(?:\s+[A-Za-z]+)*)\s+(\d+):(\d+)")
        .expect("reference parts regex is valid")
});

pub fn book_name(book_id: u32) -> Option<&'static str> {
    let idx = usize::try_from(book_id).ok()?.checked_sub(1)?;
    BOOK_NAMES.get(idx).copied()
}

/// Resolves a book name or abbreviation, ignoring case and spaces.
pub fn book_id(name: &str) -> Option<u32> {
    let key: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    if key.is_empty() {
        return None;
    }

    if let Some(idx) = BOOK_NAMES
        .iter()
        .position(|name| name.replace(' ', "").to_lowercase() == key)
    {
        return Some(idx as u32 + 1);
    }

    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, id)| *id)
}

/// Accepts either a numeric id (1-66) or anything [`book_id`] resolves.
pub fn resolve_book(arg: &str) -> Option<u32> {
    match arg.trim().parse::<u32>() {
        Ok(id) => book_name(id).map(|_| id),
        Err(_) => book_id(arg),
    }
}

/// True when `reference` looks like `Genesis 1:1`, `1 John 1:5` or `Song of Solomon 2:4-6`.
pub fn is_cross_reference_format(reference: &str) -> bool {
    CROSS_REFERENCE_RE.is_match(reference.trim())
}

/// Parses a human reference into (book, chapter, verse). Ranges keep their first verse.
pub fn parse_reference(reference: &str) -> Option<(u32, u32, u32)> {
    let caps = REFERENCE_PARTS_RE.captures(reference.trim())?;
    let book = book_id(caps.get(1)?.as_str())?;
    let chapter = caps.get(2)?.as_str().parse().ok()?;
    let verse = caps.get(3)?.as_str().parse().ok()?;
    Some((book, chapter, verse))
}
