//! The source contract from `spec.md` §6.
use crate::collector::Collector;

/// A producer-side object contributing metric samples when asked.
///
/// Implementations must not block on I/O and must not retain `collector` or
/// any record builder it hands out after `get_metrics` returns. Must
/// tolerate being invoked concurrently with producer mutations on the same
/// underlying metric objects (those mutations go through `MutableMetric`'s
/// own atomics/locks, never through the `Source` itself).
pub trait Source: Send + Sync {
    /// Samples this source's metrics into `collector`.
    ///
    /// `all = true` means emit every metric regardless of change state;
    /// `all = false` means emit only metrics changed since the last
    /// `all = false` call.
    fn get_metrics(&self, collector: &mut Collector, all: bool);
}

impl<F> Source for F
where
    F: Fn(&mut Collector, bool) + Send + Sync,
{
    fn get_metrics(&self, collector: &mut Collector, all: bool) {
        (self)(collector, all)
    }
}
