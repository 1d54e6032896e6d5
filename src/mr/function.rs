//! The map/reduce user functions (out of scope per spec.md §1, included
//! here as the one collaborator the core schedules around). Hard-coded to
//! the word-count variant; may grow into dynamic dispatch over more
//! applications later.

use serde::{Deserialize, Serialize};

/// One intermediate record, per the `KEY SPACE VALUE NEWLINE` line format
/// spec.md §6 defines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }
}

/// Word Count application.
pub mod wc {
    use super::KeyValue;

    pub fn map(contents: &str) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|word| KeyValue::new(word.to_string(), "1".to_string()))
            .collect()
    }

    pub fn reduce(_key: &str, values: &[&str]) -> String {
        values.len().to_string()
    }
}

// TODO: add more applications here once the function becomes pluggable.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_emits_one_record_per_word() {
        let kvs = wc::map("a b a");
        assert_eq!(kvs.len(), 3);
        assert!(kvs.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn reduce_counts_occurrences() {
        assert_eq!(wc::reduce("a", &["1", "1", "1"]), "3");
    }
}
