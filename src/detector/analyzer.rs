//! Pure response-comparison primitives shared by the detectors.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::detector::payloads::SQL_ERROR_PATTERNS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    pub baseline_length: usize,
    pub test_length: usize,
    pub length_delta: usize,
}

/// Byte-level similarity in [0, 1]: the fraction of positions that match
/// in the common prefix, over the longer length. Identical inputs are 1.0.
pub fn difference(baseline: &[u8], test: &[u8]) -> (f64, DiffDetail) {
    let detail = DiffDetail {
        baseline_length: baseline.len(),
        test_length: test.len(),
        length_delta: baseline.len().abs_diff(test.len()),
    };

    if baseline == test {
        return (1.0, detail);
    }

    let max_len = baseline.len().max(test.len());
    if max_len == 0 {
        return (1.0, detail);
    }

    let common = baseline
        .iter()
        .zip(test.iter())
        .filter(|(a, b)| a == b)
        .count();

    (common as f64 / max_len as f64, detail)
}

/// Case-insensitive substring scan of `body` against `patterns`.
pub fn contains_error_patterns<'a>(body: &[u8], patterns: &[&'a str]) -> (bool, Vec<&'a str>) {
    let content = String::from_utf8_lossy(body).to_lowercase();
    let hits: Vec<&str> = patterns
        .iter()
        .filter(|p| content.contains(&p.to_lowercase()))
        .copied()
        .collect();
    (!hits.is_empty(), hits)
}

/// Match the body against the compiled DBMS error-signature catalog.
/// Returns the first matching signature.
pub fn matches_sql_error(body: &str) -> Option<&'static str> {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let patterns = COMPILED.get_or_init(|| {
        SQL_ERROR_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok().map(|re| (re, *p)))
            .collect()
    });

    patterns
        .iter()
        .find(|(re, _)| re.is_match(body))
        .map(|(_, p)| *p)
}

/// Rough content divergence between two bodies: the share of distinct
/// words whose occurrence counts differ. Used to tell boolean TRUE/FALSE
/// pages apart when lengths alone are inconclusive.
pub fn word_histogram_diff(a: &str, b: &str) -> f64 {
    let count = |text: &str| {
        let mut map: HashMap<String, usize> = HashMap::new();
        for word in text.to_lowercase().split_whitespace() {
            *map.entry(word.to_string()).or_default() += 1;
        }
        map
    };

    let a_words = count(a);
    let b_words = count(b);
    let total = a.split_whitespace().count() + b.split_whitespace().count();
    if total == 0 {
        return 0.0;
    }

    let mut diff = 0usize;
    for (word, n) in &a_words {
        if b_words.get(word) != Some(n) {
            diff += 1;
        }
    }
    for (word, n) in &b_words {
        if a_words.get(word) != Some(n) {
            diff += 1;
        }
    }

    diff as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bodies_are_fully_similar() {
        let (sim, detail) = difference(b"same body", b"same body");
        assert_eq!(sim, 1.0);
        assert_eq!(detail.length_delta, 0);
    }

    #[test]
    fn disjoint_bodies_score_low() {
        let (sim, detail) = difference(b"aaaaaaaa", b"bbbbbbbbbbbbbbbb");
        assert!(sim < 0.1);
        assert_eq!(detail.baseline_length, 8);
        assert_eq!(detail.test_length, 16);
        assert_eq!(detail.length_delta, 8);
    }

    #[test]
    fn shared_prefix_counts() {
        let (sim, _) = difference(b"prefix-one", b"prefix-two");
        assert!(sim > 0.5 && sim < 1.0);
    }

    #[test]
    fn empty_bodies_are_similar() {
        let (sim, _) = difference(b"", b"");
        assert_eq!(sim, 1.0);
    }

    #[test]
    fn error_pattern_scan_is_case_insensitive() {
        let body = b"Warning: MYSQL_FETCH_ARRAY() expects parameter 1";
        let (found, hits) = contains_error_patterns(body, &["mysql_fetch_array()"]);
        assert!(found);
        assert_eq!(hits, vec!["mysql_fetch_array()"]);
    }

    #[test]
    fn sql_error_catalog_matches_major_dbms() {
        assert!(matches_sql_error("You have an error in your SQL syntax near ''1''").is_some());
        assert!(matches_sql_error("PostgreSQL query failed: syntax error").is_some());
        assert!(matches_sql_error("Unclosed quotation mark after the character string").is_some());
        assert!(matches_sql_error("ORA-01756: quoted string not properly terminated").is_some());
        assert!(matches_sql_error("SQLite3.OperationalError: no such column").is_some());
        assert!(matches_sql_error("a perfectly normal product page").is_none());
    }

    #[test]
    fn word_histogram_divergence() {
        let same = word_histogram_diff("ten items found in store", "ten items found in store");
        assert_eq!(same, 0.0);

        let different = word_histogram_diff(
            "results page with many many rows of data shown here",
            "no results",
        );
        assert!(different > 0.1);
    }
}
