//! Redemption bookkeeping.
//!
//! Every counter at or below `min_counter` is spent. Above the floor,
//! redeemed counters are kept per expiry second until they either fold into
//! the floor or their bucket expires. `max_issued` remembers the highest
//! counter minted per expiry second so the floor can jump past a bucket once
//! it has expired.

use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Rejection;

#[derive(Debug, Default)]
struct Buckets {
    max_issued: BTreeMap<u64, u64>,
    redeemed: BTreeMap<u64, HashSet<u64>>,
}

/// Result of dropping expired buckets.
#[derive(Debug, Clone, Copy, Default)]
struct Expired {
    floor: u64,
    buckets: usize,
}

impl Buckets {
    /// Drop every bucket whose expiry is at or before `now`, raising the
    /// floor past everything minted into an expired `max_issued` bucket.
    fn expire(&mut self, now: u64, floor: u64) -> Expired {
        let first_live = now.saturating_add(1);

        let live = self.redeemed.split_off(&first_live);
        let mut freed = mem::replace(&mut self.redeemed, live).len();

        let live = self.max_issued.split_off(&first_live);
        let gone = mem::replace(&mut self.max_issued, live);
        freed += gone.len();
        let raised = gone.into_values().fold(floor, u64::max);

        if raised > floor {
            self.redeemed.retain(|_, set| {
                set.retain(|&c| c > raised);
                !set.is_empty()
            });
        }

        Expired {
            floor: raised,
            buckets: freed,
        }
    }

    /// Absorb redeemed counters that sit directly above the floor, walking
    /// buckets in expiry order and stopping at the first gap.
    fn fold(&mut self, mut floor: u64) -> u64 {
        let mut emptied = Vec::new();
        for (&expiry, set) in self.redeemed.iter_mut() {
            while set.remove(&(floor + 1)) {
                floor += 1;
            }
            if !set.is_empty() {
                break;
            }
            emptied.push(expiry);
        }
        for expiry in emptied {
            self.redeemed.remove(&expiry);
        }
        floor
    }

    fn pending_counters(&self) -> usize {
        self.redeemed.values().map(HashSet::len).sum()
    }
}

/// What a tidy pass left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LedgerReport {
    pub min_counter: u64,
    pub issued_buckets: usize,
    pub redeemed_buckets: usize,
    pub pending_counters: usize,
    pub freed_buckets: usize,
}

#[derive(Debug, Default)]
pub(crate) struct RedemptionLedger {
    /// Written only while `buckets` is locked; read without it on the fast reject path.
    min_counter: AtomicU64,
    buckets: Mutex<Buckets>,
}

impl RedemptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn floor(&self) -> u64 {
        self.min_counter.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Buckets> {
        // Every mutation leaves the maps consistent, so a panic elsewhere
        // while holding the guard does not corrupt them.
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Note that `counter` went out with the given expiry second.
    pub fn record_issued(&self, expiry: u64, counter: u64) {
        let mut buckets = self.lock();
        let max = buckets.max_issued.entry(expiry).or_insert(counter);
        *max = (*max).max(counter);
    }

    /// Spend `counter`. Succeeds at most once per counter.
    pub fn redeem(&self, counter: u64, expiry: u64, now: u64) -> Result<(), Rejection> {
        if expiry <= now {
            return Err(Rejection::Expired);
        }
        if counter <= self.min_counter.load(Ordering::Relaxed) {
            return Err(Rejection::Consumed);
        }

        let mut buckets = self.lock();
        let mut floor = self.min_counter.load(Ordering::Acquire);
        if counter <= floor {
            return Err(Rejection::Consumed);
        }
        if buckets
            .redeemed
            .get(&expiry)
            .is_some_and(|set| set.contains(&counter))
        {
            return Err(Rejection::Replayed);
        }

        let expired = buckets.expire(now, floor);
        if expired.floor > floor {
            floor = expired.floor;
            self.min_counter.store(floor, Ordering::Release);
        }
        if counter <= floor {
            return Err(Rejection::Consumed);
        }

        if counter == floor + 1 {
            floor = buckets.fold(counter);
            self.min_counter.store(floor, Ordering::Release);
        } else {
            buckets.redeemed.entry(expiry).or_default().insert(counter);
        }
        Ok(())
    }

    /// Reclaim expired buckets and fold contiguous redemptions into the floor.
    pub fn tidy(&self, now: u64) -> LedgerReport {
        let mut buckets = self.lock();
        let start = self.min_counter.load(Ordering::Acquire);

        let expired = buckets.expire(now, start);
        let floor = buckets.fold(expired.floor);
        if floor > start {
            self.min_counter.store(floor, Ordering::Release);
        }

        LedgerReport {
            min_counter: floor,
            issued_buckets: buckets.max_issued.len(),
            redeemed_buckets: buckets.redeemed.len(),
            pending_counters: buckets.pending_counters(),
            freed_buckets: expired.buckets,
        }
    }

    #[cfg(test)]
    pub fn redeemed_snapshot(&self) -> BTreeMap<u64, Vec<u64>> {
        self.lock()
            .redeemed
            .iter()
            .map(|(&expiry, set)| {
                let mut counters: Vec<u64> = set.iter().copied().collect();
                counters.sort_unstable();
                (expiry, counters)
            })
            .collect()
    }

    #[cfg(test)]
    pub fn issued_snapshot(&self) -> BTreeMap<u64, u64> {
        self.lock().max_issued.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const NOW: u64 = 10_000;
    const EXP: u64 = NOW + 90;

    fn ledger_with(issued: &[(u64, u64)]) -> RedemptionLedger {
        let ledger = RedemptionLedger::new();
        for &(expiry, counter) in issued {
            ledger.record_issued(expiry, counter);
        }
        ledger
    }

    #[test]
    fn record_issued_keeps_bucket_maximum() {
        let ledger = ledger_with(&[(EXP, 2), (EXP, 5), (EXP, 3), (EXP + 1, 6)]);
        let issued = ledger.issued_snapshot();
        assert_eq!(issued.get(&EXP), Some(&5));
        assert_eq!(issued.get(&(EXP + 1)), Some(&6));
    }

    #[test]
    fn in_order_redemption_stays_on_the_fast_path() {
        let ledger = ledger_with(&[(EXP, 3)]);
        for c in 1..=3 {
            ledger.redeem(c, EXP, NOW).expect("in-order redeem");
        }
        assert_eq!(ledger.floor(), 3);
        assert!(ledger.redeemed_snapshot().is_empty());
    }

    #[test]
    fn gaps_are_stored_then_folded_when_closed() {
        let ledger = ledger_with(&[(EXP, 4)]);
        ledger.redeem(2, EXP, NOW).expect("redeem 2");
        ledger.redeem(4, EXP, NOW).expect("redeem 4");
        assert_eq!(ledger.floor(), 0);
        assert_eq!(ledger.redeemed_snapshot().get(&EXP), Some(&vec![2, 4]));

        ledger.redeem(1, EXP, NOW).expect("redeem 1");
        assert_eq!(ledger.floor(), 2);
        assert_eq!(ledger.redeemed_snapshot().get(&EXP), Some(&vec![4]));

        ledger.redeem(3, EXP, NOW).expect("redeem 3");
        assert_eq!(ledger.floor(), 4);
        assert!(ledger.redeemed_snapshot().is_empty());
    }

    #[test]
    fn replay_and_floor_are_rejected() {
        let ledger = ledger_with(&[(EXP, 3)]);
        ledger.redeem(3, EXP, NOW).expect("redeem 3");
        assert_eq!(ledger.redeem(3, EXP, NOW), Err(Rejection::Replayed));

        ledger.redeem(1, EXP, NOW).expect("redeem 1");
        assert_eq!(ledger.redeem(1, EXP, NOW), Err(Rejection::Consumed));
    }

    #[test]
    fn expired_claims_are_rejected_without_touching_state() {
        let ledger = ledger_with(&[(EXP, 1)]);
        assert_eq!(ledger.redeem(1, NOW, NOW), Err(Rejection::Expired));
        assert_eq!(ledger.floor(), 0);
        assert_eq!(ledger.issued_snapshot().len(), 1);
    }

    #[test]
    fn expiry_raises_floor_to_bucket_maximum() {
        let ledger = ledger_with(&[(EXP, 3), (EXP + 10, 5)]);
        ledger.redeem(2, EXP, NOW).expect("redeem 2");
        ledger.redeem(5, EXP + 10, NOW).expect("redeem 5");

        let report = ledger.tidy(EXP);
        assert_eq!(report.min_counter, 3);
        assert_eq!(report.freed_buckets, 2);
        assert_eq!(report.issued_buckets, 1);
        assert_eq!(report.redeemed_buckets, 1);
        assert_eq!(report.pending_counters, 1);
        assert_eq!(ledger.redeem(3, EXP + 10, EXP), Err(Rejection::Consumed));

        // Closing the gap at 4 absorbs the stored 5.
        ledger.redeem(4, EXP + 10, EXP).expect("redeem 4");
        assert_eq!(ledger.floor(), 5);
        assert!(ledger.redeemed_snapshot().is_empty());
    }

    #[test]
    fn expiry_prunes_counters_below_the_new_floor() {
        let ledger = ledger_with(&[(EXP, 4), (EXP + 10, 5)]);
        // Counter 3 read the clock after counter 4 did, so it sits in the later bucket.
        ledger.redeem(3, EXP + 10, NOW).expect("redeem 3");
        ledger.redeem(5, EXP + 10, NOW).expect("redeem 5");

        let report = ledger.tidy(EXP);
        assert_eq!(report.min_counter, 5);
        assert_eq!(report.pending_counters, 0);
        assert_eq!(report.redeemed_buckets, 0);
    }

    #[test]
    fn redeem_reclaims_expired_buckets_inline() {
        let ledger = ledger_with(&[(NOW + 1, 2), (NOW + 90, 3)]);
        ledger.redeem(2, NOW + 1, NOW).expect("redeem 2");

        ledger.redeem(3, NOW + 90, NOW + 1).expect("redeem 3");
        assert_eq!(ledger.floor(), 3);
        assert!(ledger.redeemed_snapshot().is_empty());
        assert!(!ledger.issued_snapshot().contains_key(&(NOW + 1)));
    }

    #[test]
    fn fold_stops_at_first_gap() {
        let ledger = ledger_with(&[(EXP, 2), (EXP + 1, 5)]);
        ledger.redeem(2, EXP, NOW).expect("redeem 2");
        ledger.redeem(5, EXP + 1, NOW).expect("redeem 5");
        ledger.redeem(1, EXP, NOW).expect("redeem 1");

        assert_eq!(ledger.floor(), 2);
        let redeemed = ledger.redeemed_snapshot();
        assert!(!redeemed.contains_key(&EXP));
        assert_eq!(redeemed.get(&(EXP + 1)), Some(&vec![5]));
    }

    #[test]
    fn tidy_is_idempotent() {
        let ledger = ledger_with(&[(EXP, 4), (EXP + 5, 6)]);
        ledger.redeem(3, EXP, NOW).expect("redeem 3");
        ledger.redeem(6, EXP + 5, NOW).expect("redeem 6");

        let first = ledger.tidy(NOW + 1);
        let second = ledger.tidy(NOW + 1);
        assert_eq!(first, second);
    }

    #[test]
    fn tidy_bounds_bucket_count_by_validity() {
        let validity = 5u64;
        let ledger = RedemptionLedger::new();
        let mut counter = 0;
        for now in NOW..NOW + 20 {
            for _ in 0..3 {
                counter += 1;
                ledger.record_issued(now + validity, counter);
            }
            // Redeem the newest of each second out of order so buckets carry sets.
            ledger
                .redeem(counter, now + validity, now)
                .expect("redeem newest");
            let report = ledger.tidy(now);
            assert!(report.issued_buckets + report.redeemed_buckets <= 2 * validity as usize);
        }
    }

    #[test]
    fn concurrent_redeem_of_same_counter_succeeds_once() {
        let ledger = Arc::new(ledger_with(&[(EXP, 64)]));
        let joins: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    (1..=64)
                        .filter(|&c| ledger.redeem(c, EXP, NOW).is_ok())
                        .count()
                })
            })
            .collect();

        let total: usize = joins
            .into_iter()
            .map(|j| j.join().expect("worker panicked"))
            .sum();
        assert_eq!(total, 64);
        assert_eq!(ledger.tidy(NOW).min_counter, 64);
        assert!(ledger.redeemed_snapshot().is_empty());
    }
}
