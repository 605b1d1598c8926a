//! Local named-entity chunking for page text.
//!
//! tokenize → tag → chunk contiguous proper-noun runs → flatten → dedupe.
//!
//! Tagging is a lightweight orthographic heuristic: capitalized or
//! all-caps tokens are proper nouns unless they are common function words;
//! a few lowercase particles (`of`, `de`, `van`, ...) may bridge two
//! proper nouns (`Bank of America`). Punctuation other than `&` ends an
//! entity span. Output order is first occurrence; duplicates are dropped by
//! exact string value. The same input always yields the same output.

use async_trait::async_trait;
use std::collections::HashSet;

use super::EntityExtractor;
use crate::error::ExtractionError;
use crate::models::{Artifact, ContentHandle, EntitySet};

/// Capitalized words that never start or continue an entity.
const COMMON_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "before", "but", "by", "can", "could", "did", "do", "does", "during", "each", "for",
    "from", "had", "has", "have", "he", "her", "here", "his", "how", "however", "i", "if", "in",
    "into", "is", "it", "its", "may", "more", "most", "my", "no", "not", "of", "on", "once",
    "or", "our", "over", "page", "she", "should", "since", "so", "some", "such", "than", "that",
    "the", "their", "then", "there", "these", "they", "this", "those", "through", "to", "under",
    "until", "up", "was", "we", "were", "what", "when", "where", "which", "while", "who", "why",
    "will", "with", "would", "yes", "you", "your",
];

/// Lowercase particles allowed between two proper nouns.
const BRIDGES: &[&str] = &[
    "of", "and", "de", "del", "der", "van", "von", "la", "le", "&",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Proper,
    Bridge,
    Other,
    /// Sentence end or span-breaking punctuation.
    Break,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token<'a> {
    text: &'a str,
    sentence_start: bool,
}

/// Extract named entities from page text.
pub fn extract_entities(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let tags: Vec<Tag> = tokens.iter().map(tag).collect();
    let spans = chunk(&tokens, &tags);

    let mut seen = HashSet::new();
    spans
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Split into word tokens and break markers. An empty token text is a break.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut sentence_start = true;
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() || c == '\'' || c == '’' || c == '-' {
            if start.is_none() {
                start = Some(i);
            }
            continue;
        }

        flush(text, &mut tokens, &mut start, i, &mut sentence_start);

        match c {
            '&' => tokens.push(Token {
                text: "&",
                sentence_start: false,
            }),
            '.' | '!' | '?' | '\n' => {
                tokens.push(Token {
                    text: "",
                    sentence_start: false,
                });
                sentence_start = true;
            }
            c if c.is_whitespace() => {}
            _ => tokens.push(Token {
                text: "",
                sentence_start: false,
            }),
        }
    }
    flush(text, &mut tokens, &mut start, text.len(), &mut sentence_start);

    tokens
}

fn flush<'a>(
    text: &'a str,
    tokens: &mut Vec<Token<'a>>,
    start: &mut Option<usize>,
    end: usize,
    sentence_start: &mut bool,
) {
    if let Some(begin) = start.take() {
        let word = text[begin..end].trim_matches(|c: char| c == '\'' || c == '-' || c == '’');
        if !word.is_empty() {
            tokens.push(Token {
                text: word,
                sentence_start: *sentence_start,
            });
            *sentence_start = false;
        }
    }
}

fn tag(token: &Token<'_>) -> Tag {
    let word = token.text;
    if word.is_empty() {
        return Tag::Break;
    }
    if word == "&" {
        return Tag::Bridge;
    }

    let lower = word.to_lowercase();
    if BRIDGES.contains(&lower.as_str()) && word.chars().all(|c| !c.is_uppercase()) {
        return Tag::Bridge;
    }

    let first = word.chars().next().unwrap_or(' ');
    if !first.is_uppercase() {
        return Tag::Other;
    }
    if COMMON_WORDS.contains(&lower.as_str()) {
        return Tag::Other;
    }
    // A lone capital letter opening a sentence is not a name.
    if token.sentence_start && word.chars().count() == 1 {
        return Tag::Other;
    }
    Tag::Proper
}

fn chunk(tokens: &[Token<'_>], tags: &[Tag]) -> Vec<String> {
    let mut spans = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for (i, (token, t)) in tokens.iter().zip(tags).enumerate() {
        match t {
            Tag::Proper => current.push(strip_possessive(token.text)),
            // Never bridge from a lone sentence-initial word.
            Tag::Bridge
                if !current.is_empty()
                    && !(current.len() == 1 && tokens[i - 1].sentence_start)
                    && tags.get(i + 1) == Some(&Tag::Proper) =>
            {
                current.push(token.text)
            }
            _ => {
                if !current.is_empty() {
                    spans.push(current.join(" "));
                    current.clear();
                }
            }
        }
    }
    if !current.is_empty() {
        spans.push(current.join(" "));
    }

    spans
}

fn strip_possessive(word: &str) -> &str {
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix("’s"))
        .unwrap_or(word)
}

/// Best-effort entity extraction for text artifacts. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextEntityExtractor;

#[async_trait]
impl EntityExtractor for TextEntityExtractor {
    async fn extract(&self, artifact: &Artifact) -> Result<EntitySet, ExtractionError> {
        let entities = match &artifact.content {
            ContentHandle::Text(text) => extract_entities(text),
            ContentHandle::ImagePath(_) => Vec::new(),
        };
        Ok(EntitySet {
            entities,
            raw: None,
            description: None,
        })
    }
}
