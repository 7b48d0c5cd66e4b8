use std::sync::atomic::{AtomicU64, Ordering};

/// The `nextCounter` cell. Only ever advanced by fetch-and-add.
#[derive(Debug, Default)]
pub(crate) struct CounterSource {
    next: AtomicU64,
}

impl CounterSource {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Claim the next counter. The first value handed out is 1.
    #[inline]
    pub fn advance(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of counters claimed so far, which is also the highest one.
    #[inline]
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_counter_is_one() {
        let source = CounterSource::new();
        assert_eq!(source.issued(), 0);
        assert_eq!(source.advance(), 1);
        assert_eq!(source.advance(), 2);
        assert_eq!(source.issued(), 2);
    }

    #[test]
    fn concurrent_claims_never_collide() {
        let source = Arc::new(CounterSource::new());
        let joins: Vec<_> = (0..4)
            .map(|_| {
                let source = source.clone();
                thread::spawn(move || (0..500).map(|_| source.advance()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for join in joins {
            for c in join.join().expect("worker panicked") {
                assert!(seen.insert(c), "counter {c} handed out twice");
            }
        }
        assert_eq!(seen.len(), 2_000);
        assert_eq!(source.issued(), 2_000);
        assert!(seen.contains(&1) && seen.contains(&2_000));
    }
}
