//! Keyword extraction
//!
//! Text is lowercased, punctuation becomes whitespace, and tokens of four or
//! more characters that are not stopwords are ranked by
//! `frequency + length bonus + domain bonus`. Ties keep first-occurrence order.

use std::collections::{HashMap, HashSet};

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "although", "always",
    "among", "another", "anything", "around", "because", "been", "before", "being",
    "below", "between", "both", "cannot", "could", "does", "doing", "down",
    "during", "each", "either", "else", "even", "every", "from", "further",
    "have", "having", "here", "hers", "herself", "himself", "however", "into",
    "itself", "just", "like", "many", "more", "most", "much", "must",
    "myself", "never", "once", "only", "other", "ours", "ourselves", "over",
    "same", "should", "since", "some", "still", "such", "than", "that",
    "their", "theirs", "them", "themselves", "then", "there", "these", "they",
    "this", "those", "though", "through", "till", "under", "until", "upon",
    "very", "were", "what", "whatever", "when", "where", "whether", "which",
    "while", "whom", "whose", "will", "with", "within", "without", "would",
    "your", "yours", "yourself", "yourselves",
];

/// Extra weight for terms the engine's collaborators care about
const DOMAIN_TERMS: &[(&str, u32)] = &[
    ("battery", 5),
    ("optimization", 5),
    ("security", 5),
    ("sensor", 5),
    ("threat", 5),
    ("attack", 4),
    ("detection", 4),
    ("energy", 4),
    ("network", 4),
    ("power", 4),
    ("protocol", 4),
    ("signal", 4),
    ("strategy", 4),
    ("tactical", 4),
    ("algorithm", 3),
    ("analysis", 3),
    ("efficiency", 3),
    ("latency", 3),
    ("memory", 3),
    ("pattern", 3),
    ("performance", 3),
    ("response", 3),
    ("thermal", 3),
];

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

fn domain_bonus(token: &str) -> u32 {
    DOMAIN_TERMS
        .iter()
        .find(|(term, _)| *term == token)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0)
}

fn length_bonus(token: &str) -> u32 {
    match token.chars().count() {
        n if n > 9 => 2,
        n if n > 6 => 1,
        _ => 0,
    }
}

/// Lowercase and split on anything that is not alphanumeric.
/// Apostrophes are dropped so "don't" stays one token.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();

    normalized.split_whitespace().map(str::to_string).collect()
}

fn is_candidate(token: &str) -> bool {
    token.chars().count() > 3 && !is_stopword(token)
}

/// Top `max` keywords of `text`, highest weight first
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut stats: HashMap<String, (u32, usize)> = HashMap::new();

    for (position, token) in tokenize(text).into_iter().enumerate() {
        if !is_candidate(&token) {
            continue;
        }
        stats
            .entry(token)
            .and_modify(|(freq, _)| *freq += 1)
            .or_insert((1, position));
    }

    let mut ranked: Vec<(String, u32, usize)> = stats
        .into_iter()
        .map(|(token, (freq, first))| {
            let weight = freq + length_bonus(&token) + domain_bonus(&token);
            (token, weight, first)
        })
        .collect();

    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(max);
    ranked.into_iter().map(|(token, _, _)| token).collect()
}

/// Jaccard similarity of two keyword sets; 0.0 when both are empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

pub fn keyword_set(keywords: &[String]) -> HashSet<String> {
    keywords.iter().cloned().collect()
}
