// Utility functions for feed-ranking-service

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Age of an item in fractional hours. Timestamps in the future count as age 0.
pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - created_at).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

/// Deterministic pseudo-random stream derived from SHA-256 in counter mode.
///
/// Same seed gives the same sequence on every host and every release.
pub struct SeededStream {
    seed: [u8; 32],
    counter: u64,
}

impl SeededStream {
    pub fn new(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Self {
            seed: hasher.finalize().into(),
            counter: 0,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_be_bytes());
        self.counter += 1;
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Uniform value in `[0, 1)`
    pub fn next_fraction(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform index in `[0, bound)` without modulo bias
    pub fn next_below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let value = self.next_u64();
            if value < zone {
                return value % bound;
            }
        }
    }

    /// Hex fingerprint of the seed, for logs
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.seed[..8])
    }
}

/// Fisher-Yates shuffle keyed by `seed`. Same seed and same input order give the same output.
pub fn seeded_shuffle<T>(items: &mut [T], seed: &[&[u8]]) {
    let mut stream = SeededStream::new(seed);
    for i in (1..items.len()).rev() {
        let j = stream.next_below(i as u64 + 1) as usize;
        items.swap(i, j);
    }
}

/// Stable merge sort that tolerates comparators which are not a total order.
///
/// `slice::sort_by` may panic on such comparators; the near-tie band used by the
/// feed is intentionally non-transitive, so it goes through here instead.
pub fn stable_sort_by<T, F>(items: Vec<T>, mut compare: F) -> Vec<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    merge_sort(items, &mut compare)
}

fn merge_sort<T, F>(mut items: Vec<T>, compare: &mut F) -> Vec<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    if items.len() <= 1 {
        return items;
    }

    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, compare);
    let right = merge_sort(right, compare);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(r, l) == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        if let Some(item) = next {
            merged.push(item);
        }
    }

    merged
}
