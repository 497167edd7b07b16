//! Shared blocklist snapshot: a single reference replaced wholesale by
//! Config Apply, read lock-free by both proxy managers (spec §5, §9).

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

#[derive(Clone)]
pub struct BlocklistHandle {
    inner: Arc<ArcSwap<HashSet<String>>>,
}

impl BlocklistHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashSet::new())),
        }
    }

    /// Atomically replaces the blocklist contents.
    pub fn swap(&self, entries: impl IntoIterator<Item = String>) {
        self.inner.store(Arc::new(entries.into_iter().collect()));
    }

    /// Takes a read-only snapshot, safe to hold across an accept/datagram.
    pub fn contains(&self, ip: &str) -> bool {
        self.inner.load().contains(ip)
    }
}

impl Default for BlocklistHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_replaces_wholesale() {
        let handle = BlocklistHandle::new();
        assert!(!handle.contains("1.1.1.1"));

        handle.swap(vec!["1.1.1.1".to_string()]);
        assert!(handle.contains("1.1.1.1"));

        handle.swap(vec!["2.2.2.2".to_string()]);
        assert!(!handle.contains("1.1.1.1"));
        assert!(handle.contains("2.2.2.2"));
    }
}
