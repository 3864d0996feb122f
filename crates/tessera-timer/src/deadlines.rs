//! Keyed one-shot timers.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::trace;

/// A set of one-shot timers, at most one per key.
///
/// Timers fire in deadline order; two timers with the same deadline fire in
/// the order they were scheduled. The set is plain data: it only reads the
/// clock inside [`next_expired`](Self::next_expired) and
/// [`schedule_in`](Self::schedule_in), so owners can drive it with explicit
/// instants in tests.
#[derive(Debug)]
pub struct Deadlines<K> {
    queue: BTreeMap<(Instant, u64), K>,
    index: HashMap<K, (Instant, u64)>,
    seq: u64,
}

impl<K> Default for Deadlines<K> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
        }
    }
}

impl<K> Deadlines<K>
where
    K: Clone + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key` to fire at `at`, replacing any timer it already had.
    /// Returns the replaced deadline.
    pub fn schedule(&mut self, key: K, at: Instant) -> Option<Instant> {
        let previous = self.cancel(&key);
        self.seq += 1;
        let slot = (at, self.seq);
        self.queue.insert(slot, key.clone());
        trace!(?key, "timer armed");
        self.index.insert(key, slot);
        previous
    }

    /// Arms `key` to fire `after` from now.
    pub fn schedule_in(&mut self, key: K, after: Duration) -> Option<Instant> {
        self.schedule(key, Instant::now() + after)
    }

    /// Disarms `key`. Returns the deadline it had, if any.
    pub fn cancel(&mut self, key: &K) -> Option<Instant> {
        let slot = self.index.remove(key)?;
        self.queue.remove(&slot);
        trace!(?key, "timer cancelled");
        Some(slot.0)
    }

    /// Disarms every key matching `pred`. Returns how many were disarmed.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let doomed: Vec<K> =
            self.index.keys().filter(|k| pred(k)).cloned().collect();
        for key in &doomed {
            self.cancel(key);
        }
        doomed.len()
    }

    /// Disarms everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.index.get(key).map(|slot| slot.0)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|slot| slot.0)
    }

    /// Removes and returns the earliest timer if it is due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<K> {
        let (&slot, _) = self.queue.iter().next()?;
        if slot.0 > now {
            return None;
        }
        let key = self.queue.remove(&slot)?;
        self.index.remove(&key);
        Some(key)
    }

    /// Waits for the earliest timer and returns its key, disarmed.
    ///
    /// Pends forever while nothing is armed. Cancel-safe: the timer is only
    /// removed once this future completes.
    pub async fn next_expired(&mut self) -> K {
        loop {
            let Some(at) = self.next_deadline() else {
                return std::future::pending().await;
            };
            time::sleep_until(at).await;
            if let Some(key) = self.pop_expired(Instant::now()) {
                return key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Key {
        Turn,
        Seat(u8),
    }

    #[test]
    fn test_reschedule_replaces_previous_timer() {
        let base = Instant::now();
        let mut timers = Deadlines::new();
        timers.schedule(Key::Turn, base + Duration::from_secs(60));
        let previous =
            timers.schedule(Key::Turn, base + Duration::from_secs(30));

        assert_eq!(previous, Some(base + Duration::from_secs(60)));
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.deadline(&Key::Turn), Some(base + Duration::from_secs(30)));
    }

    #[test]
    fn test_pop_expired_respects_order_and_now() {
        let base = Instant::now();
        let mut timers = Deadlines::new();
        timers.schedule(Key::Seat(2), base + Duration::from_secs(5));
        timers.schedule(Key::Seat(1), base + Duration::from_secs(5));
        timers.schedule(Key::Turn, base + Duration::from_secs(1));

        assert_eq!(timers.pop_expired(base), None);
        let later = base + Duration::from_secs(10);
        assert_eq!(timers.pop_expired(later), Some(Key::Turn));
        assert_eq!(timers.pop_expired(later), Some(Key::Seat(2)));
        assert_eq!(timers.pop_expired(later), Some(Key::Seat(1)));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_where_disarms_matching_keys() {
        let base = Instant::now();
        let mut timers = Deadlines::new();
        timers.schedule(Key::Turn, base);
        timers.schedule(Key::Seat(1), base);
        timers.schedule(Key::Seat(2), base);

        let removed = timers.cancel_where(|k| matches!(k, Key::Seat(_)));
        assert_eq!(removed, 2);
        assert!(timers.contains(&Key::Turn));
        assert_eq!(timers.cancel(&Key::Seat(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_expired_sleeps_until_deadline() {
        let start = Instant::now();
        let mut timers = Deadlines::new();
        timers.schedule_in(Key::Seat(1), Duration::from_secs(3));
        timers.schedule_in(Key::Turn, Duration::from_secs(1));

        assert_eq!(timers.next_expired().await, Key::Turn);
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
        assert_eq!(timers.next_expired().await, Key::Seat(1));
        assert_eq!(Instant::now() - start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_expired_pends_when_empty() {
        let mut timers: Deadlines<Key> = Deadlines::new();
        let result =
            time::timeout(Duration::from_secs(3600), timers.next_expired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_losing_a_select_race_keeps_the_timer() {
        let mut timers = Deadlines::new();
        timers.schedule_in(Key::Turn, Duration::from_secs(5));

        tokio::select! {
            _ = timers.next_expired() => panic!("fired early"),
            _ = time::sleep(Duration::from_secs(1)) => {}
        }

        assert!(timers.contains(&Key::Turn));
        assert_eq!(timers.next_expired().await, Key::Turn);
    }
}
