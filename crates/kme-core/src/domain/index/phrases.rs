//! Phrase extraction
//!
//! Sliding 2- and 3-token windows inside each sentence, kept only when they
//! match one of a fixed set of domain patterns.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::keywords::tokenize;

static PHRASE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let patterns = [
        r"^(battery|power|energy) \w+( \w+)?$",
        r"^\w+( \w+)? (optimization|efficiency|management)$",
        r"^(sensor|signal|network) \w+( \w+)?$",
        r"^\w+( \w+)? (pattern|patterns|strategy|protocol)$",
        r"^(threat|security|attack) \w+( \w+)?$",
        r"^\w+( \w+)? (analysis|detection|response)$",
    ];

    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
});

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', ';', '\n'])
        .filter(|s| !s.trim().is_empty())
}

pub fn is_domain_phrase(phrase: &str) -> bool {
    PHRASE_PATTERNS.iter().any(|p| p.is_match(phrase))
}

/// Domain phrases of `text` in first-seen order, at most `max`
pub fn extract_phrases(text: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut phrases = Vec::new();

    for sentence in sentences(text) {
        let tokens = tokenize(sentence);
        for width in [2, 3] {
            for window in tokens.windows(width) {
                let phrase = window.join(" ");
                if is_domain_phrase(&phrase) && seen.insert(phrase.clone()) {
                    phrases.push(phrase);
                    if phrases.len() >= max {
                        return phrases;
                    }
                }
            }
        }
    }

    phrases
}

/// Canonical key for a keyword pair: the two words sorted and space-joined
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{} {}", a, b)
    } else {
        format!("{} {}", b, a)
    }
}
