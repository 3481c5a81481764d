//! Pre-parsed, hierarchical configuration (`spec.md` §6).
//!
//! Parsing configuration *files* is out of scope; `Config` only holds
//! already-resolved key/value pairs and knows how to carve off a
//! dot-prefixed section and apply this system's documented defaults,
//! the way `metrics-runtime::config::Configuration` holds already-resolved
//! `Duration`s pulled out of a `Builder`.
use metrics_system_core::sink::SinkConfig;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default base sampling period, in seconds (`spec.md` §6).
pub const DEFAULT_PERIOD_SECS: u64 = 10;
/// Default sink queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;
/// Default initial retry delay, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;
/// Default retry backoff multiplier.
pub const DEFAULT_RETRY_BACKOFF: f64 = 2.0;
/// Default maximum consecutive retries before a buffer is dropped.
pub const DEFAULT_RETRY_COUNT: u32 = 1;

/// A flat, section-scoped key/value configuration tree.
///
/// Keys are dot-separated (`"sink.file.queue.capacity"`); `section(prefix)`
/// returns a new `Config` holding only the keys under that prefix, with the
/// prefix stripped, mirroring the `*.sink.<name>.*` / `*.source.<name>.*`
/// subconfig carve-out `spec.md` §6 describes.
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Builds a configuration from already-resolved key/value pairs.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Sets a single key, overwriting any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Looks up a raw string value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Carves off the sub-configuration nested under `prefix.`, with the
    /// prefix stripped from every resulting key.
    pub fn section(&self, prefix: &str) -> Config {
        let dotted = format!("{prefix}.");
        let entries = self
            .entries
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&dotted).map(|rest| (rest.to_string(), v.clone())))
            .collect();
        Config { entries }
    }

    /// All top-level names one level below the root, deduplicated.
    ///
    /// Used to enumerate configured sink/source names out of
    /// `*.sink.<name>.*` / `*.source.<name>.*` keys.
    pub fn child_names(&self, prefix: &str) -> Vec<String> {
        let dotted = format!("{prefix}.");
        let mut names: Vec<String> = self
            .entries
            .keys()
            .filter_map(|k| k.strip_prefix(&dotted))
            .filter_map(|rest| rest.split('.').next())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Gets a value as a `Duration` in seconds, falling back to `default`.
    pub fn get_duration_secs(&self, key: &str, default: u64) -> Duration {
        let secs = self
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default);
        Duration::from_secs(secs)
    }

    /// Gets a value as a `Duration` in milliseconds, falling back to `default`.
    pub fn get_duration_millis(&self, key: &str, default: u64) -> Duration {
        let millis = self
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default);
        Duration::from_millis(millis)
    }

    /// Gets a value as a `usize`, falling back to `default`.
    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// Gets a value as an `f64`, falling back to `default`.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// Gets a value as a `u32`, falling back to `default`.
    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// Gets a value as a `bool`, falling back to `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

impl SinkConfig for Config {
    fn get(&self, key: &str) -> Option<&str> {
        Config::get(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_strips_prefix_and_filters() {
        let config = Config::from_entries([
            ("sink.file.queue.capacity", "5"),
            ("sink.file.retry.delay", "200"),
            ("sink.other.queue.capacity", "9"),
            ("period", "10"),
        ]);

        let file_section = config.section("sink.file");
        assert_eq!(file_section.get("queue.capacity"), Some("5"));
        assert_eq!(file_section.get("retry.delay"), Some("200"));
        assert_eq!(file_section.get("period"), None);
    }

    #[test]
    fn child_names_enumerates_and_dedups() {
        let config = Config::from_entries([
            ("sink.file.queue.capacity", "5"),
            ("sink.file.retry.delay", "200"),
            ("sink.console.period", "2"),
        ]);
        assert_eq!(config.child_names("sink"), vec!["console", "file"]);
    }

    #[test]
    fn typed_getters_fall_back_to_defaults() {
        let config = Config::new();
        assert_eq!(
            config.get_duration_secs("period", DEFAULT_PERIOD_SECS),
            Duration::from_secs(10)
        );
        assert_eq!(config.get_usize("queue.capacity", DEFAULT_QUEUE_CAPACITY), 1);
        assert_eq!(config.get_f64("retry.backoff", DEFAULT_RETRY_BACKOFF), 2.0);
    }
}
