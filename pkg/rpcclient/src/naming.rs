//! Process-local component naming.
//!
//! Components that aren't given an explicit name need a default log-line
//! prefix. Deriving one from the component's own address would leak an
//! implementation detail and make snapshot tests nondeterministic across
//! runs, so components here fall back to a monotonic counter instead.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a fresh id, unique for the lifetime of the process, suitable as
/// a default log-line prefix for a component that wasn't given an explicit
/// name.
pub fn next_component_id() -> u64 {
    NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = next_component_id();
        let b = next_component_id();
        assert!(b > a);
    }
}
