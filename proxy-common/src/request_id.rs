//! Process-unique request identifier generation.
//!
//! `"{monotonic_ms}-{counter}"`. The counter is an atomically incremented
//! unsigned integer starting at 1 at process start; no uniqueness claim across
//! processes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct RequestIdGen {
    counter: AtomicU64,
}

impl RequestIdGen {
    pub fn new() -> Self {
        RequestIdGen {
            counter: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("{}-{}", now_ms, counter)
    }
}

impl Default for RequestIdGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_within_a_process() {
        let gen = RequestIdGen::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
    }

    #[test]
    fn counter_component_is_monotonic() {
        let gen = RequestIdGen::new();
        let a = gen.next();
        let b = gen.next();
        let counter_of = |id: &str| -> u64 { id.rsplit('-').next().unwrap().parse().unwrap() };
        assert!(counter_of(&b) > counter_of(&a));
    }
}
