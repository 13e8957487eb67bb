// ============================================
// RXCACHE - Query Normalizer
// ============================================

//! Turns a raw query into a canonical cache key. Patient-specific details
//! (doses, names, ages, gender) are masked so that otherwise identical
//! questions land in the same bucket.

use regex::{Captures, Regex};

pub const DOSE_PLACEHOLDER: &str = "[dose]";
pub const NAME_PLACEHOLDER: &str = "[nome]";
pub const AGE_PLACEHOLDER: &str = "[idade]";
pub const GENDER_PLACEHOLDER: &str = "[sexo]";

/// Separator between the masked text and the category suffix
pub const CATEGORY_SEPARATOR: char = '|';

lazy_static::lazy_static! {
    static ref DOSE: Regex =
        Regex::new(r"\d+(?:[.,]\d+)?\s*(?:mcg|mg|ml|g)\b|\d+(?:[.,]\d+)?\s*%").unwrap();
    static ref PATIENT_NAME: Regex =
        Regex::new(r"\b(paciente|patient)\s+(\p{L}+)").unwrap();
    static ref AGE: Regex =
        Regex::new(r"\d+\s*(?:anos?|years?(?:\s+old)?)\b").unwrap();
    static ref GENDER: Regex = Regex::new(
        r"\b(?:masculino|feminino|masculina|feminina|homem|mulher|male|female|man|woman)\b"
    )
    .unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref GENERAL_PATTERNS: Vec<Regex> = [
        r"^o que (?:é|e|são|sao)\b",
        r"^como (?:funciona|age|atua)\b",
        r"\bqual (?:é |e )?a diferença\b",
        r"\bdiferença entre\b",
        r"^para que serve\b",
        r"^quais (?:são|sao) os benefícios\b",
        r"\bmecanismo de ação\b",
        r"^what (?:is|are)\b",
        r"^how does\b",
        r"\bdifference between\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

/// Words that follow "paciente" without being a name
const NOT_A_NAME: &[&str] = &[
    "com", "sem", "de", "do", "da", "em", "que", "apresenta", "relata", "with", "has", "who",
];

/// Whether a query asks for generic knowledge or is bound to a patient case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    General,
    Specific,
}

/// Normalize a raw query and append the category suffix.
///
/// Applying this to its own output yields the same string.
pub fn normalize(query: &str, category: &str) -> String {
    let category = category.trim().to_lowercase();
    let mut text = query.trim().to_lowercase();

    let suffix = format!("{}{}", CATEGORY_SEPARATOR, category);
    if let Some(stripped) = text.strip_suffix(&suffix) {
        text = stripped.trim_end().to_string();
    }

    let text = DOSE.replace_all(&text, DOSE_PLACEHOLDER);
    let text = PATIENT_NAME.replace_all(&text, |caps: &Captures| {
        if NOT_A_NAME.contains(&&caps[2]) {
            caps[0].to_string()
        } else {
            format!("{} {}", &caps[1], NAME_PLACEHOLDER)
        }
    });
    let text = AGE.replace_all(&text, AGE_PLACEHOLDER);
    let text = GENDER.replace_all(&text, GENDER_PLACEHOLDER);
    let text = WHITESPACE.replace_all(&text, " ");

    format!("{}{}{}", text.trim(), CATEGORY_SEPARATOR, category)
}

/// Classify a raw query. General questions get a longer cache lifetime.
pub fn classify(query: &str) -> QueryKind {
    let text = query.trim().to_lowercase();
    if GENERAL_PATTERNS.iter().any(|p| p.is_match(&text)) {
        QueryKind::General
    } else {
        QueryKind::Specific
    }
}
