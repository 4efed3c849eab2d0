//! Schema document loading and per-request filtering.

use crate::error::{Nl2SqlError, Result};
use crate::tables::LOOKUP_TABLE;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Full schema text: concatenated per-table sections, each opened by an unindented header line.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    text: Arc<str>,
}

impl Default for SchemaDocument {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl SchemaDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Arc::from(text.into()),
        }
    }

    /// Load the schema resource. A missing or empty file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Nl2SqlError::Configuration(format!(
                "Could not read policy schema at {}: {}",
                path.display(),
                e
            ))
        })?;
        if text.trim().is_empty() {
            return Err(Nl2SqlError::Configuration(format!(
                "Policy schema at {} is empty",
                path.display()
            )));
        }
        info!("Policy schema loaded from {} ({} bytes)", path.display(), text.len());
        Ok(Self::new(text))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Sections relevant to `wanted`, or the full document (see [`filter_schema`])
    pub fn filter(&self, wanted: &[String]) -> String {
        filter_schema(&self.text, wanted)
    }
}

fn starts_section(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.to_uppercase().starts_with("CREATE TABLE")
        || (!trimmed.is_empty() && !line.starts_with(' ') && !line.starts_with('\t'))
}

/// Split the schema at header lines. Text before the first header forms its own section.
pub fn split_sections(full_schema: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in full_schema.lines() {
        if starts_section(line) && !current.is_empty() {
            sections.push(current.join("\n"));
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current.join("\n"));
    }
    sections
}

/// Keep the sections mentioning any wanted table (case-insensitive substring).
///
/// Returns `full_schema` unchanged when `wanted` or the schema is empty, and also when
/// nothing matches: callers never get an empty schema while a non-empty one exists.
pub fn filter_schema(full_schema: &str, wanted: &[String]) -> String {
    if wanted.is_empty() || full_schema.is_empty() {
        return full_schema.to_string();
    }

    let needles: Vec<String> = wanted
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if needles.is_empty() {
        return full_schema.to_string();
    }

    let kept: Vec<String> = split_sections(full_schema)
        .into_iter()
        .filter(|section| {
            let lowered = section.to_lowercase();
            needles.iter().any(|n| lowered.contains(n.as_str()))
        })
        .collect();

    let filtered = kept.join("\n\n");
    if filtered.trim().is_empty() {
        warn!("No schema section matched {:?}, using full schema", wanted);
        return full_schema.to_string();
    }
    filtered
}

/// Widen a non-empty focus list with the lookup table, which generated queries
/// need for resolving `*_lid` columns. An empty list stays empty so the full schema is used.
pub fn with_reference_table(extracted: &[String]) -> Vec<String> {
    let mut focus = extracted.to_vec();
    if !focus.is_empty() && !focus.iter().any(|t| t.eq_ignore_ascii_case(LOOKUP_TABLE)) {
        focus.push(LOOKUP_TABLE.to_string());
    }
    focus
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "Table: policy\n  id BIGINT\n  status_lid BIGINT\n\nTable: company\n  id BIGINT\n  company_name TEXT\n\nTable: lookup_data\n  id BIGINT\n  value TEXT\n";

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identity_fallbacks() {
        assert_eq!(filter_schema(SCHEMA, &[]), SCHEMA);
        assert_eq!(filter_schema("", &names(&["policy"])), "");
    }

    #[test]
    fn test_keeps_only_matching_sections() {
        let filtered = filter_schema(SCHEMA, &names(&["COMPANY"]));
        assert!(filtered.contains("company_name"));
        assert!(!filtered.contains("status_lid"));
        assert!(!filtered.contains("Table: lookup_data"));
    }

    #[test]
    fn test_no_match_falls_back_to_full_schema() {
        let filtered = filter_schema(SCHEMA, &names(&["widgets"]));
        assert_eq!(filtered, SCHEMA);
        assert!(!filtered.is_empty());
    }

    #[test]
    fn test_split_sections_on_unindented_lines() {
        let sections = split_sections(SCHEMA);
        assert_eq!(sections.len(), 3);
        assert!(sections[0].starts_with("Table: policy"));
        assert!(sections[2].starts_with("Table: lookup_data"));
    }

    #[test]
    fn test_create_table_starts_section_even_when_indented() {
        let schema = "CREATE TABLE alpha (\n  x INT\n  );\n  CREATE TABLE beta (\n  y INT\n  );";
        let filtered = filter_schema(schema, &names(&["beta"]));
        assert!(filtered.contains("y INT"));
        assert!(!filtered.contains("x INT"));
    }

    #[test]
    fn test_reference_table_widening() {
        assert_eq!(
            with_reference_table(&names(&["policy"])),
            names(&["policy", LOOKUP_TABLE])
        );
        assert_eq!(
            with_reference_table(&names(&["lookup_data", "policy"])),
            names(&["lookup_data", "policy"])
        );
        assert!(with_reference_table(&[]).is_empty());
    }

    #[test]
    fn test_load_missing_file_is_configuration_error() {
        let err = SchemaDocument::load(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(err.is_configuration());
    }
}
