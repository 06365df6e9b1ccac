use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::format_completion_id;

/// Cheap per-process unique ids: a random seed xor a counter.
///
/// The counter lands in the high 64 bits, which survive the truncation in
/// [`format_completion_id`].
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ (u128::from(request_seq) << 64))
    }

    /// `chatcmpl-…` id for the response to request `request_seq`.
    #[must_use]
    pub(crate) fn completion_id(&self, request_seq: u64) -> String {
        format_completion_id(self.request_uuid(request_seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_ids_are_distinct() {
        let ids = RequestIdGenerator::new();
        let first = ids.next_seq();
        let second = ids.next_seq();
        assert_ne!(first, second);
        let a = ids.completion_id(first);
        let b = ids.completion_id(second);
        assert_ne!(a, b);
        assert!(a.starts_with("chatcmpl-"));
        assert_eq!(a.len(), 38);
    }

    #[test]
    fn test_consecutive_ids_never_collide() {
        let ids = RequestIdGenerator::new();
        let seen: std::collections::HashSet<String> =
            (0..1000).map(|_| ids.completion_id(ids.next_seq())).collect();
        assert_eq!(seen.len(), 1000);
    }
}
