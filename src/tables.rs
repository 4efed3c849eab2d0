//! Static table catalog for the policy database.

use regex::Regex;
use std::collections::HashSet;
use tracing::error;

/// Shared reference table resolving `*_lid` coded values to display text
pub const LOOKUP_TABLE: &str = "lookup_data";

/// Every table the policy database exposes, in catalog order
pub const POLICY_TABLES: &[&str] = &[
    "policy",
    "endorsement",
    "caution_deposit",
    "caution_deposit_transaction",
    "caution_deposit_policy_mapping",
    "company",
    "opportunity",
    LOOKUP_TABLE,
];

/// Immutable set of valid table names. The only source of truth for what extraction may emit.
#[derive(Debug, Clone)]
pub struct KnownTableSet {
    names: Vec<String>,
    index: HashSet<String>,
    /// `\b(name|...)\b`, compiled once per set
    word_pattern: Option<Regex>,
}

impl KnownTableSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered = Vec::new();
        let mut index = HashSet::new();
        for name in names {
            let name = name.as_ref().trim().to_lowercase();
            if !name.is_empty() && index.insert(name.clone()) {
                ordered.push(name);
            }
        }
        let word_pattern = word_pattern(&ordered);
        Self {
            names: ordered,
            index,
            word_pattern,
        }
    }

    /// The policy database catalog
    pub fn policy_catalog() -> Self {
        Self::new(POLICY_TABLES.iter().copied())
    }

    /// Case-insensitive membership test
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(&name.to_lowercase())
    }

    /// Case-insensitive whole-word matcher over every name in the set
    pub fn word_pattern(&self) -> Option<&Regex> {
        self.word_pattern.as_ref()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn word_pattern(names: &[String]) -> Option<Regex> {
    if names.is_empty() {
        return None;
    }
    let mut alternatives: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
    // Longer names first so a prefix never shadows a longer table name
    alternatives.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("Failed to compile table name pattern: {}", e);
            None
        }
    }
}

impl Default for KnownTableSet {
    fn default() -> Self {
        Self::policy_catalog()
    }
}
