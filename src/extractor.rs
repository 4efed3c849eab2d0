//! Table-Mention Extractor
//!
//! Turns the chat service's free-form answer into an ordered list of catalog tables.
//! Each matcher is an independent pure function; the extractor runs them in order
//! against a shared accumulator, so later matchers can only add tables.

use crate::tables::KnownTableSet;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info};

lazy_static! {
    /// `1. policy (...)`, `- company`, `* endorsement`
    static ref LIST_ITEM: Option<Regex> =
        compile(r"(?m)^[ \t]*(?:\d+\.|[-*])[ \t]*([A-Za-z_][A-Za-z0-9_]*)");
    /// `` `policy` ``
    static ref BACKTICK: Option<Regex> = compile(r"`\s*([A-Za-z_][A-Za-z0-9_]*)\s*`");
    /// `the policy table`
    static ref TABLE_PHRASE: Option<Regex> = compile(r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s+table\b");
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("Failed to compile extraction pattern {}: {}", pattern, e);
            None
        }
    }
}

/// A matcher proposes candidate names in discovery order. Candidates are validated later.
pub type Matcher = fn(&str, &KnownTableSet) -> Vec<String>;

/// Matchers in application order
pub const MATCHERS: &[(&str, Matcher)] = &[
    ("list_item", match_list_items),
    ("backtick", match_backticks),
    ("table_phrase", match_table_phrases),
    ("word_boundary", match_word_boundaries),
];

fn captures(re: &Option<Regex>, text: &str) -> Vec<String> {
    match re {
        Some(re) => re
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect(),
        None => Vec::new(),
    }
}

pub fn match_list_items(text: &str, _known: &KnownTableSet) -> Vec<String> {
    captures(&LIST_ITEM, text)
}

pub fn match_backticks(text: &str, _known: &KnownTableSet) -> Vec<String> {
    captures(&BACKTICK, text)
}

pub fn match_table_phrases(text: &str, _known: &KnownTableSet) -> Vec<String> {
    captures(&TABLE_PHRASE, text)
}

/// Catch-all: any catalog name standing alone as a word, ordered by first occurrence.
pub fn match_word_boundaries(text: &str, known: &KnownTableSet) -> Vec<String> {
    let Some(re) = known.word_pattern() else {
        return Vec::new();
    };
    let mut hits: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let name = m.as_str().to_lowercase();
        if !hits.contains(&name) {
            hits.push(name);
        }
    }
    hits
}

/// Ordered, de-duplicated, catalog-validated accumulator
#[derive(Debug, Default)]
struct TableAccumulator {
    tables: Vec<String>,
}

impl TableAccumulator {
    fn offer(&mut self, candidate: &str, known: &KnownTableSet, source: &str) {
        let name = candidate.trim().to_lowercase();
        if name.is_empty() || !known.contains(&name) || self.tables.contains(&name) {
            return;
        }
        debug!("Found table '{}' via {}", name, source);
        self.tables.push(name);
    }
}

/// Extract known table names mentioned in `context_text`.
///
/// An empty result means "no hint": callers fall back to the full schema.
pub fn extract_tables(context_text: &str, known: &KnownTableSet) -> Vec<String> {
    let mut acc = TableAccumulator::default();
    if context_text.trim().is_empty() {
        return acc.tables;
    }

    for (source, matcher) in MATCHERS {
        for candidate in matcher(context_text, known) {
            acc.offer(&candidate, known, source);
        }
    }

    if acc.tables.is_empty() {
        info!("No catalog tables mentioned in context");
    } else {
        info!("Extracted tables from context: {:?}", acc.tables);
    }
    acc.tables
}
