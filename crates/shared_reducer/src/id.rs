//! Correlation id allocation.

use shared_reducer_protocol::CorrelationId;

/// Hands out strictly increasing correlation ids, starting at 1.
///
/// One allocator belongs to one reducer instance; ids are never reused.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: CorrelationId,
}

impl IdAllocator {
    /// Creates a new allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id.
    pub fn next_id(&mut self) -> CorrelationId {
        self.last += 1;
        self.last
    }

    /// Returns the most recently allocated id, or 0 if none.
    pub fn last_id(&self) -> CorrelationId {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_above_zero_and_increase() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.last_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
        assert_eq!(ids.last_id(), 3);
    }

    #[test]
    fn allocators_are_independent() {
        let mut a = IdAllocator::new();
        let mut b = IdAllocator::new();
        a.next_id();
        a.next_id();
        assert_eq!(b.next_id(), 1);
    }
}
