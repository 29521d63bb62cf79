//! Contraction table
//!
//! Static mapping from a lowercase contracted token to its ordered list of
//! full-form expansions, e.g. `"can't"` -> `["can not", "cannot"]`. Loaded
//! once at pipeline construction and immutable afterwards.
//!
//! The on-disk format is strict JSON (a string -> string-list object). The
//! parser is schema-checked; a missing or malformed file is fatal at load
//! time so the pipeline never runs with a silently empty table.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Immutable contraction -> expansions mapping.
#[derive(Debug, Clone)]
pub struct ContractionTable {
    entries: HashMap<String, Vec<String>>,
}

impl ContractionTable {
    /// Load and validate a table from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read contraction table {:?}", path))?;
        let entries: HashMap<String, Vec<String>> = serde_json::from_str(&content)
            .with_context(|| format!("contraction table {:?} is not a string -> string-list object", path))?;
        Self::from_entries(entries)
            .with_context(|| format!("invalid contraction table {:?}", path))
    }

    /// Build a table from already-parsed entries, validating the invariants:
    /// non-empty table, trimmed lowercase keys, non-empty expansion lists.
    pub fn from_entries(entries: HashMap<String, Vec<String>>) -> Result<Self> {
        if entries.is_empty() {
            bail!("table is empty; refusing to degrade to identity expansion");
        }
        for (key, expansions) in &entries {
            if key.is_empty() || key != key.trim() {
                bail!("key {:?} is empty or carries surrounding whitespace", key);
            }
            if *key != key.to_lowercase() {
                bail!("key {:?} is not lowercase", key);
            }
            if expansions.is_empty() {
                bail!("key {:?} has an empty expansion list", key);
            }
            if expansions.iter().any(|e| e.trim().is_empty()) {
                bail!("key {:?} has a blank expansion", key);
            }
        }
        Ok(Self { entries })
    }

    /// Expansion options for a token, looked up by its lowercase form.
    /// `None` means the token is not a known contraction.
    pub fn options(&self, token: &str) -> Option<&[String]> {
        self.entries.get(&token.to_lowercase()).map(Vec::as_slice)
    }

    /// Number of contractions in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries. Always false for a validated table.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, expansions: &[&str]) -> (String, Vec<String>) {
        (key.to_string(), expansions.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = ContractionTable::from_entries(
            [entry("can't", &["can not", "cannot"])].into_iter().collect(),
        )
        .unwrap();
        assert_eq!(table.options("CAN'T").unwrap().len(), 2);
        assert_eq!(table.options("can't").unwrap()[0], "can not");
        assert!(table.options("hello").is_none());
    }

    #[test]
    fn test_rejects_empty_table() {
        assert!(ContractionTable::from_entries(HashMap::new()).is_err());
    }

    #[test]
    fn test_rejects_uppercase_key() {
        let result = ContractionTable::from_entries(
            [entry("Can't", &["can not"])].into_iter().collect(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_expansion_list() {
        let result =
            ContractionTable::from_entries([entry("can't", &[])].into_iter().collect());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"can't\": \"not a list\"}}").unwrap();
        assert!(ContractionTable::load(file.path()).is_err());
    }

    #[test]
    fn test_load_round_trip() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"y'all've\": [\"you all have\"]}}").unwrap();
        let table = ContractionTable::load(file.path()).unwrap();
        assert_eq!(table.options("y'all've").unwrap(), ["you all have"]);
    }
}
