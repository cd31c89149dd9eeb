use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rand::Rng;

use crate::{config::SelectorKind, core::connection::Connection};

/// Trait defining the interface for connection selection strategies.
///
/// Selectors are stateless with respect to the pool: they get a slice of live
/// connections and pick one. `None` means the slice was empty.
pub trait Selector: Send + Sync + 'static {
    /// Select a connection from a list of live connections
    fn select(&self, connections: &[Arc<Connection>]) -> Option<Arc<Connection>>;
    /// Create a new instance of this selector as a shared trait object
    fn shared(self) -> Arc<dyn Selector>
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

/// Round-robin selection strategy
pub struct RoundRobinSelector {
    counter: AtomicUsize,
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinSelector {
    /// Create a new round-robin selector positioned before the first connection
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Selector for RoundRobinSelector {
    fn select(&self, connections: &[Arc<Connection>]) -> Option<Arc<Connection>> {
        if connections.is_empty() {
            return None;
        }
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        Some(connections[count % connections.len()].clone())
    }
}

/// Random selection strategy
pub struct RandomSelector;

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSelector {
    /// Create a new random selector
    pub fn new() -> Self {
        Self
    }
}

impl Selector for RandomSelector {
    fn select(&self, connections: &[Arc<Connection>]) -> Option<Arc<Connection>> {
        if connections.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..connections.len());
        Some(connections[index].clone())
    }
}

/// Factory for creating selectors from configuration
pub struct SelectorFactory;

impl SelectorFactory {
    /// Create a new selector based on configuration
    pub fn create_selector(kind: &SelectorKind) -> Arc<dyn Selector> {
        match kind {
            SelectorKind::RoundRobin => RoundRobinSelector::new().shared(),
            SelectorKind::Random => RandomSelector::new().shared(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connections(urls: &[&str]) -> Vec<Arc<Connection>> {
        urls.iter()
            .map(|u| Arc::new(Connection::parse(u).unwrap()))
            .collect()
    }

    #[test]
    fn test_round_robin_selector() {
        let selector = RoundRobinSelector::new();
        let conns = connections(&["http://a", "http://b", "http://c"]);

        let picked: Vec<String> = (0..5)
            .map(|_| selector.select(&conns).unwrap().url().host_str().unwrap().to_string())
            .collect();

        assert_eq!(picked, vec!["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn test_round_robin_visits_each_connection_once_per_cycle() {
        let selector = RoundRobinSelector::new();
        let conns = connections(&["http://a", "http://b", "http://c", "http://d"]);

        let mut seen: Vec<String> = (0..conns.len())
            .map(|_| selector.select(&conns).unwrap().url().to_string())
            .collect();
        seen.sort();
        seen.dedup();

        assert_eq!(seen.len(), conns.len());
    }

    #[test]
    fn test_round_robin_empty_connections() {
        let selector = RoundRobinSelector::new();
        assert!(selector.select(&[]).is_none());
    }

    #[test]
    fn test_random_selector() {
        let selector = RandomSelector::new();
        let conns = connections(&["http://a", "http://b", "http://c"]);

        let selected = selector.select(&conns).unwrap();
        assert!(conns.iter().any(|c| Arc::ptr_eq(c, &selected)));
        assert!(selector.select(&[]).is_none());
    }

    #[test]
    fn test_selector_factory() {
        let conns = connections(&["http://a", "http://b"]);

        let rr = SelectorFactory::create_selector(&SelectorKind::RoundRobin);
        assert!(rr.select(&conns).is_some());

        let random = SelectorFactory::create_selector(&SelectorKind::Random);
        assert!(random.select(&conns).is_some());
    }
}
