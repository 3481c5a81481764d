//! The filter contract from `spec.md` §6.
//!
//! Filter predicate *syntax* (include/exclude glob lists parsed out of
//! configuration) is explicitly out of scope (`spec.md` §1); this module
//! only provides the compiled-predicate trait plus the couple of trivial
//! implementations needed to exercise and test it, the way
//! `metrics-util::layers::Filter` wraps a compiled `aho_corasick::AhoCorasick`
//! automaton behind a simple `should_filter` predicate.
use crate::intern::Tag;
use std::collections::HashSet;

/// A compiled predicate deciding whether a name (or a record's tags) should
/// be accepted into the pipeline.
pub trait Filter: Send + Sync {
    /// Whether a bare name (a source name, record name, or metric name) is accepted.
    fn accepts_name(&self, name: &str) -> bool;

    /// Whether a record, identified by its tags, is accepted.
    ///
    /// The default delegates to `accepts_name` on the single `"name":"value"`
    /// string form of each tag, per `spec.md` §6 ("the tag overload delegates
    /// to the single `"name":"value"` string form").
    fn accepts_tags(&self, tags: &[Tag]) -> bool {
        tags.iter()
            .all(|tag| self.accepts_name(&format!("{}:{}", tag.name(), tag.value())))
    }
}

/// A filter that accepts everything; the default when no filter is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Filter for AcceptAll {
    fn accepts_name(&self, _name: &str) -> bool {
        true
    }

    fn accepts_tags(&self, _tags: &[Tag]) -> bool {
        true
    }
}

/// A filter that accepts only names matching one of a fixed set of prefixes,
/// or only names equal to one of a fixed set of exact names.
///
/// Enough to express `spec.md` §8 scenario S3 (`sourceFilter =
/// accept("good*")`) without needing a glob-parsing dependency, which is
/// explicitly out of scope.
#[derive(Debug, Clone)]
pub struct NameSet {
    prefixes: Vec<String>,
    exact_names: HashSet<String>,
}

impl NameSet {
    /// Builds a filter that accepts names starting with any of `prefixes`.
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            exact_names: HashSet::new(),
        }
    }

    /// Builds a filter that accepts only these exact names, not anything
    /// they happen to prefix.
    pub fn exact<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: Vec::new(),
            exact_names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Filter for NameSet {
    fn accepts_name(&self, name: &str) -> bool {
        self.exact_names.contains(name) || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_set_prefix_matching() {
        let filter = NameSet::with_prefixes(["good"]);
        assert!(filter.accepts_name("good1"));
        assert!(!filter.accepts_name("bad1"));
    }

    #[test]
    fn name_set_exact_matching_rejects_mere_prefix_matches() {
        let filter = NameSet::exact(["foo"]);
        assert!(filter.accepts_name("foo"));
        assert!(!filter.accepts_name("foobar"));
    }

    #[test]
    fn accept_all_accepts_everything() {
        let filter = AcceptAll;
        assert!(filter.accepts_name("anything"));
    }
}
