use std::sync::LazyLock;

use oncolink_core::models::DocumentCategory;
use regex::Regex;

// Keywords match whole words; a trailing `\w*` marks a stem.
const PATHOLOGY_KEYWORDS: &[&str] = &[
    "pathology",
    r"biops(?:y|ies)",
    r"histolog\w*",
    r"cytolog\w*",
    r"(?:adeno)?carcinomas?",
    "specimens?",
    "margins?",
    r"immunohistochem\w*",
    "gleason",
    "grade[sd]?",
    "tnm",
    "microscopic",
    r"frozen\s+sections?",
];

const RADIOLOGY_KEYWORDS: &[&str] = &[
    "radiology",
    r"ct\s+scans?",
    r"computed\s+tomography",
    "mri",
    r"magnetic\s+resonance",
    "x-rays?",
    "radiographs?",
    "ultrasound",
    "pet-ct",
    r"pet\s+scans?",
    r"mammogra\w*",
    "contrast",
    "impression",
    "nodules?",
    "lesions?",
];

const LAB_KEYWORDS: &[&str] = &[
    "laboratory",
    r"lab\s+results?",
    "hemoglobin",
    "hematocrit",
    "platelets?",
    r"white\s+blood\s+cells?",
    "creatinine",
    "glucose",
    r"reference\s+ranges?",
    "serum",
    "cbc",
    r"tumou?r\s+markers?",
    "cea",
    "psa",
];

fn keyword_regex(keywords: &[&str]) -> Regex {
    let pattern = format!(r"\b(?:{})\b", keywords.join("|"));
    Regex::new(&pattern).expect("keyword patterns are valid")
}

static PATHOLOGY: LazyLock<Regex> = LazyLock::new(|| keyword_regex(PATHOLOGY_KEYWORDS));
static RADIOLOGY: LazyLock<Regex> = LazyLock::new(|| keyword_regex(RADIOLOGY_KEYWORDS));
static LAB: LazyLock<Regex> = LazyLock::new(|| keyword_regex(LAB_KEYWORDS));

fn score(text: &str, keywords: &Regex) -> usize {
    keywords.find_iter(text).count()
}

/// Classify report text by keyword frequency.
///
/// Ties resolve pathology, then radiology, then lab. Text with no keyword at all is
/// treated as radiology.
pub fn classify_report(text: &str) -> DocumentCategory {
    let text = text.to_lowercase();

    let scores = [
        (DocumentCategory::Pathology, score(&text, &PATHOLOGY)),
        (DocumentCategory::Radiology, score(&text, &RADIOLOGY)),
        (DocumentCategory::Lab, score(&text, &LAB)),
    ];

    // max_by_key keeps the last maximum; scan in reverse so earlier entries win ties.
    match scores.iter().rev().max_by_key(|(_, score)| *score) {
        Some((category, score)) if *score > 0 => *category,
        _ => DocumentCategory::Radiology,
    }
}
