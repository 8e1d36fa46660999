//! Keyword-based bio analysis used by bio enrichment
//!
//! Topics come from a fixed topic → keyword table, sentiment from a small
//! positive/negative lexicon, persona from keyword families.

use crate::types::Persona;
use crate::validators::bio::{matched_keywords, word_tokens, PROFESSIONAL_KEYWORDS};

const TOPICS: &[(&str, &[&str])] = &[
    (
        "technology",
        &["software", "engineer", "developer", "code", "coding", "ai", "data", "cloud", "tech"],
    ),
    (
        "business",
        &["founder", "startup", "ceo", "entrepreneur", "sales", "marketing", "investor"],
    ),
    (
        "design",
        &["design", "designer", "ux", "ui", "illustrat", "typography"],
    ),
    (
        "music",
        &["music", "musician", "producer", "dj", "guitar", "singer", "songwriter"],
    ),
    (
        "photography",
        &["photo", "photographer", "camera", "film"],
    ),
    (
        "sports",
        &["runner", "marathon", "cycling", "football", "soccer", "basketball", "athlete", "fitness"],
    ),
    (
        "travel",
        &["travel", "traveler", "wanderlust", "nomad", "explorer"],
    ),
    (
        "science",
        &["research", "researcher", "scientist", "phd", "biology", "physics", "chemistry"],
    ),
    (
        "education",
        &["teacher", "professor", "educator", "student", "lecturer"],
    ),
    (
        "food",
        &["chef", "cook", "foodie", "baker", "recipes", "coffee"],
    ),
];

const POSITIVE_WORDS: &[&str] = &[
    "love", "passionate", "happy", "excited", "great", "awesome", "proud", "enjoy", "grateful",
    "amazing", "curious", "inspired", "kind", "helping", "best",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "angry", "sad", "worst", "bad", "terrible", "awful", "annoyed", "bored", "tired",
    "never", "sick",
];

const CREATOR_KEYWORDS: &[&str] = &[
    "creator",
    "youtuber",
    "youtube",
    "podcast",
    "podcaster",
    "streamer",
    "blogger",
    "influencer",
    "artist",
    "photographer",
    "musician",
    "filmmaker",
];

const PERSONAL_MARKERS: &[&str] = &[
    "mom", "dad", "mother", "father", "wife", "husband", "lover", "fan", "dog", "cat", "family",
];

/// Sorted topic labels whose keywords appear in `bio`
pub fn extract_topics(bio: &str) -> Vec<String> {
    let words = word_tokens(bio);
    let mut topics: Vec<String> = TOPICS
        .iter()
        .filter(|(_, keywords)| {
            words
                .iter()
                .any(|word| keywords.iter().any(|kw| word.starts_with(kw)))
        })
        .map(|(topic, _)| topic.to_string())
        .collect();
    topics.sort();
    topics
}

/// `(positive - negative) / (positive + negative)`, 0 without lexicon hits
pub fn sentiment(bio: &str) -> f64 {
    let words = word_tokens(bio);
    let positive = words.iter().filter(|w| POSITIVE_WORDS.contains(&w.as_str())).count();
    let negative = words.iter().filter(|w| NEGATIVE_WORDS.contains(&w.as_str())).count();
    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    (positive as f64 - negative as f64) / total as f64
}

/// Professional wins over creator, creator over personal
pub fn classify_persona(bio: &str) -> Persona {
    if !matched_keywords(bio, PROFESSIONAL_KEYWORDS).is_empty() {
        return Persona::Professional;
    }
    if !matched_keywords(bio, CREATOR_KEYWORDS).is_empty() {
        return Persona::Creator;
    }
    let words = word_tokens(bio);
    if words.iter().any(|w| PERSONAL_MARKERS.contains(&w.as_str())) {
        return Persona::Personal;
    }
    Persona::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_sorted_and_deduplicated() {
        let topics = extract_topics("Software engineer and startup founder. Coffee and code.");
        assert_eq!(topics, vec!["business", "food", "technology"]);
    }

    #[test]
    fn test_sentiment_bounds() {
        assert_eq!(sentiment("I love and enjoy great coffee"), 1.0);
        assert_eq!(sentiment("I hate bad coffee"), -1.0);
        assert_eq!(sentiment("Coffee"), 0.0);
        assert_eq!(sentiment("love it, hate mondays"), 0.0);
    }

    #[test]
    fn test_persona_precedence() {
        assert_eq!(classify_persona("Podcast host and software engineer"), Persona::Professional);
        assert_eq!(classify_persona("YouTuber making travel videos"), Persona::Creator);
        assert_eq!(classify_persona("Proud dad of two"), Persona::Personal);
        assert_eq!(classify_persona("Here and there"), Persona::Unknown);
    }
}
