//! Canonicalizing pool for `MetricInfo` and `Tag`.
//!
//! Mirrors the forward/backward interning approach the teacher workspace
//! uses for metric scopes (`ScopeRegistry`), generalized from "scope string"
//! to "(name, description) pair" and "(info, value) pair" so that two infos
//! or tags built from equal inputs share identity and are cheap to clone
//! into every `Record`.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq, Hash)]
struct MetricInfoInner {
    name: String,
    description: String,
}

/// A canonicalized `(name, description)` pair identifying a metric or a record.
///
/// Two `MetricInfo` values built from equal `(name, description)` pairs are
/// `==` and share the same backing allocation.
#[derive(Clone, Eq)]
pub struct MetricInfo(Arc<MetricInfoInner>);

impl MetricInfo {
    /// Interns `(name, description)`, returning the canonical instance.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        INFO_POOL.intern(name.into(), description.into())
    }

    /// Interns `name` with a description equal to `name`.
    ///
    /// Matches the convenience form `spec.md` describes for
    /// `Collector::addRecord(name)`: "synthesizes `info(name, name + " record")`"
    /// is handled by the caller; this constructor is for the plain
    /// name-as-description case used by metric fields.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let description = name.clone();
        Self::new(name, description)
    }

    /// The metric or record's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The metric or record's description.
    pub fn description(&self) -> &str {
        &self.0.description
    }
}

impl PartialEq for MetricInfo {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl std::hash::Hash for MetricInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
        self.0.description.hash(state);
    }
}

impl fmt::Debug for MetricInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricInfo")
            .field("name", &self.0.name)
            .field("description", &self.0.description)
            .finish()
    }
}

struct InfoPool {
    entries: RwLock<HashMap<(String, String), MetricInfo>>,
}

impl InfoPool {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn intern(&self, name: String, description: String) -> MetricInfo {
        let key = (name.clone(), description.clone());
        if let Some(existing) = self.entries.read().get(&key) {
            return existing.clone();
        }

        let mut entries = self.entries.write();
        entries
            .entry(key)
            .or_insert_with(|| {
                MetricInfo(Arc::new(MetricInfoInner { name, description }))
            })
            .clone()
    }
}

static INFO_POOL: Lazy<InfoPool> = Lazy::new(InfoPool::new);

/// A labeled string appended to a record, used for sink-side routing and filtering.
#[derive(Clone, Eq)]
pub struct Tag {
    info: MetricInfo,
    value: Arc<str>,
}

impl Tag {
    /// Interns a new tag from an info and a value.
    pub fn new(info: MetricInfo, value: impl Into<String>) -> Self {
        TAG_POOL.intern(info, value.into())
    }

    /// The tag's info (name/description).
    pub fn info(&self) -> &MetricInfo {
        &self.info
    }

    /// The tag's name, for convenience.
    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// The tag's value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info && self.value == other.value
    }
}

impl std::hash::Hash for Tag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.info.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.info.name(), self.value)
    }
}

struct TagPool {
    entries: RwLock<HashMap<(MetricInfo, String), Tag>>,
}

impl TagPool {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn intern(&self, info: MetricInfo, value: String) -> Tag {
        let key = (info.clone(), value.clone());
        if let Some(existing) = self.entries.read().get(&key) {
            return existing.clone();
        }

        let mut entries = self.entries.write();
        entries
            .entry(key)
            .or_insert_with(|| Tag {
                info,
                value: Arc::from(value.as_str()),
            })
            .clone()
    }
}

static TAG_POOL: Lazy<TagPool> = Lazy::new(TagPool::new);

#[cfg(test)]
mod tests {
    use super::{MetricInfo, Tag};

    #[test]
    fn info_interning_shares_identity() {
        let a = MetricInfo::new("requests", "request count");
        let b = MetricInfo::new("requests", "request count");
        assert_eq!(a, b);
        assert_eq!(a.name(), "requests");
    }

    #[test]
    fn info_interning_distinguishes_description() {
        let a = MetricInfo::new("requests", "request count");
        let b = MetricInfo::new("requests", "a different description");
        assert_ne!(a, b);
    }

    #[test]
    fn tag_interning_shares_identity() {
        let info = MetricInfo::new("context", "routing context");
        let a = Tag::new(info.clone(), "testctx");
        let b = Tag::new(info, "testctx");
        assert_eq!(a, b);
        assert_eq!(a.value(), "testctx");
    }
}
