//! Profile bio validator

use super::{FieldValidator, ValidationDetails, ValidationResult};
use crate::types::FieldName;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const BASE_SCORE: f64 = 0.3;
const MIN_LENGTH: usize = 10;
const KEYWORD_BONUS: f64 = 0.05;
const MAX_KEYWORD_BONUS: f64 = 0.15;
const SPAM_PENALTY: f64 = 0.1;
const MAX_SPAM_PENALTY: f64 = 0.3;
const EMOJI_DENSITY_LIMIT: f64 = 0.1;
const MAX_EMOJI_PENALTY: f64 = 0.2;

pub const PROFESSIONAL_KEYWORDS: &[&str] = &[
    "engineer",
    "developer",
    "founder",
    "ceo",
    "cto",
    "manager",
    "director",
    "designer",
    "consultant",
    "researcher",
    "scientist",
    "professor",
    "author",
    "writer",
    "analyst",
    "architect",
    "entrepreneur",
    "investor",
    "marketing",
    "product",
];

pub const SPAM_KEYWORDS: &[&str] = &[
    "click here",
    "buy now",
    "free money",
    "giveaway",
    "crypto",
    "onlyfans",
    "dm for promo",
    "follow back",
    "make money",
    "limited offer",
    "get rich",
    "casino",
];

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)[^\s]+").expect("valid url regex"));
static FIRST_PERSON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:i am|i'm|i work|i build|i love|i write|my|me|myself)\b")
        .expect("valid first-person regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioDetails {
    pub length: usize,
    pub words: usize,
    pub links: usize,
    pub professional_keywords: Vec<String>,
    pub spam_keywords: Vec<String>,
    pub emoji: usize,
    pub sentences: usize,
    pub first_person: bool,
}

/// Pictographic ranges commonly used as emoji
pub fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1F5FF
        | 0x1F600..=0x1F64F
        | 0x1F680..=0x1F6FF
        | 0x1F900..=0x1F9FF
        | 0x1FA70..=0x1FAFF
        | 0x2600..=0x26FF
        | 0x2700..=0x27BF
        | 0x1F1E6..=0x1F1FF)
}

pub fn count_emoji(text: &str) -> usize {
    text.chars().filter(|c| is_emoji(*c)).count()
}

/// Non-empty fragments between `.`, `!` and `?`
pub fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count()
}

/// Lowercased alphanumeric words of `text`
pub(crate) fn word_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Keywords from `list` appearing in `text` as whole words
///
/// Multi-word keywords must appear as consecutive words.
pub(crate) fn matched_keywords(text: &str, list: &[&str]) -> Vec<String> {
    let words = word_tokens(text);
    list.iter()
        .filter(|kw| {
            let needle = word_tokens(kw);
            !needle.is_empty() && words.windows(needle.len()).any(|w| w == needle.as_slice())
        })
        .map(|kw| kw.to_string())
        .collect()
}

#[derive(Debug, Default)]
pub struct BioValidator;

impl BioValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, raw: &str) -> ValidationResult {
        let bio = raw.trim();
        let length = bio.chars().count();
        if length < MIN_LENGTH {
            return ValidationResult::rejected(None);
        }

        let lowered = bio.to_lowercase();
        let mut score = BASE_SCORE;

        let words = bio.split_whitespace().count();
        if words >= 5 {
            score += 0.05;
        }
        if words >= 10 {
            score += 0.05;
        }
        if words >= 20 {
            score += 0.1;
        }
        if words > 100 {
            score -= 0.05;
        }

        let links = URL_RE.find_iter(bio).count();
        if links > 0 {
            score += 0.1;
        }
        if links > 3 {
            score -= 0.05;
        }

        let professional_keywords = matched_keywords(&lowered, PROFESSIONAL_KEYWORDS);
        score += (professional_keywords.len() as f64 * KEYWORD_BONUS).min(MAX_KEYWORD_BONUS);

        let spam_keywords = matched_keywords(&lowered, SPAM_KEYWORDS);
        score -= (spam_keywords.len() as f64 * SPAM_PENALTY).min(MAX_SPAM_PENALTY);

        let emoji = count_emoji(bio);
        let density = emoji as f64 / length as f64;
        if (1..=3).contains(&emoji) {
            score += 0.05;
        }
        if density > EMOJI_DENSITY_LIMIT {
            score -= density.min(MAX_EMOJI_PENALTY);
        }

        let sentences = count_sentences(bio);
        if sentences >= 2 {
            score += 0.1;
        }

        let first_person = FIRST_PERSON_RE.is_match(bio);
        if first_person {
            score += 0.1;
        }

        ValidationResult::scored(
            score,
            Some(ValidationDetails::Bio(BioDetails {
                length,
                words,
                links,
                professional_keywords,
                spam_keywords,
                emoji,
                sentences,
                first_person,
            })),
        )
    }
}

#[async_trait]
impl FieldValidator for BioValidator {
    fn field(&self) -> FieldName {
        FieldName::Bio
    }

    fn method(&self) -> &'static str {
        "bio_analysis"
    }

    async fn validate(&self, raw: &str) -> ValidationResult {
        self.evaluate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_bio_rejected() {
        assert_eq!(BioValidator::new().evaluate("hi there").score, 0.0);
    }

    #[test]
    fn test_professional_bio_scores_well() {
        let result = BioValidator::new().evaluate(
            "I am a software engineer and founder. Building tools for developers at https://example.dev today.",
        );
        assert!(result.is_valid, "scored {}", result.score);
        match result.details {
            Some(ValidationDetails::Bio(d)) => {
                assert_eq!(d.links, 1);
                assert!(d.first_person);
                assert!(d.sentences >= 2);
                assert!(d.professional_keywords.contains(&"engineer".to_string()));
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_keyword_bonus_is_capped() {
        let v = BioValidator::new();
        let three = v.evaluate("engineer developer founder here and now too").score;
        let six = v.evaluate("engineer developer founder author writer analyst here").score;
        assert!((three - six).abs() < 1e-9);
    }

    #[test]
    fn test_spam_penalized() {
        let v = BioValidator::new();
        let clean = v.evaluate("Photographer based in Oslo, shooting weddings").score;
        let spam = v.evaluate("Photographer based in Oslo, click here buy now giveaway").score;
        assert!(spam < clean);
    }

    #[test]
    fn test_emoji_density() {
        assert_eq!(count_emoji("hello 🚀 world 🌍"), 2);
        let v = BioValidator::new();
        let light = v.evaluate("Coffee lover and runner ☕").score;
        let heavy = v.evaluate("☕☕☕☕☕☕☕☕ runner").score;
        assert!(heavy < light);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        assert_eq!(
            matched_keywords("Director of production", PROFESSIONAL_KEYWORDS),
            vec!["director".to_string()]
        );
        assert_eq!(
            matched_keywords("Please CLICK here, then buy now", SPAM_KEYWORDS),
            vec!["click here".to_string(), "buy now".to_string()]
        );
        assert!(matched_keywords("clickhere", SPAM_KEYWORDS).is_empty());
    }

    #[test]
    fn test_sentence_counting() {
        assert_eq!(count_sentences("One. Two! Three?"), 3);
        assert_eq!(count_sentences("No terminator here"), 1);
        assert_eq!(count_sentences("..."), 0);
    }
}
