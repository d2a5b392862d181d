use std::time::{Duration, Instant};

// Upper bound on up front allocation for size limited rounds
const PREALLOCATE_MAX: usize = 1024;

/// Reason a round has ended.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Cutoff {
    /// Round collected `max_size` items.
    Size,
    /// Round time budget has elapsed.
    Timeout,
    /// All sending ends are gone; no more items will arrive.
    ///
    /// Never returned by `Round::poll`; reported by channel driven collectors that own the round.
    Disconnected,
}

/// Represents result from `poll` function where round is `Ready` to be delivered or `NotReady` yet.
#[derive(Debug, PartialEq, Eq)]
pub enum PollResult {
    Ready(Cutoff),
    /// Round will be ready after given duration unless it fills up first.
    NotReady(Duration),
}

/// Collects items of a single round.
///
/// The round time budget counts from the moment the round was started, not from its first item,
/// so a round can end with no items at all.
#[derive(Debug)]
pub struct Round<I> {
    items: Vec<I>,
    started: Instant,
    // 0 means no size limit
    max_size: usize,
    timeout: Duration,
}

impl<I> Round<I> {
    /// Starts a round given maximum number of items (`max_size`, 0 for unbounded) and its
    /// time budget (`timeout`).
    ///
    /// Panics if `timeout` is zero.
    pub fn new(max_size: usize, timeout: Duration) -> Round<I> {
        assert!(timeout > Duration::from_secs(0), "Round::new bad timeout");

        Round {
            items: Vec::with_capacity(max_size.min(PREALLOCATE_MAX)),
            started: Instant::now(),
            max_size,
            timeout,
        }
    }

    /// Check if round has reached one of its limits.
    ///
    /// Size limit takes priority over time budget.
    ///
    /// Returns:
    /// * `PollResult::Ready(Cutoff::Size)` if round is full,
    /// * `PollResult::Ready(Cutoff::Timeout)` if time budget has elapsed,
    /// * `PollResult::NotReady(duration)` if round will time out after duration.
    pub fn poll(&self) -> PollResult {
        if self.is_full() {
            return PollResult::Ready(Cutoff::Size)
        }

        let since_start = self.started.elapsed();
        if since_start >= self.timeout {
            return PollResult::Ready(Cutoff::Timeout)
        }

        PollResult::NotReady(self.timeout - since_start)
    }

    /// Appends item to round.
    ///
    /// Panics if trying to append to a round that reached its `max_size` limit.
    pub fn append(&mut self, item: I) {
        if self.is_full() {
            panic!("Round append on full round");
        }

        self.items.push(item);
    }

    fn is_full(&self) -> bool {
        self.max_size > 0 && self.items.len() >= self.max_size
    }

    /// Number of items collected.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Return slice of collected items.
    pub fn as_slice(&self) -> &[I] {
        self.items.as_slice()
    }

    /// Convert into collected items.
    pub fn into_vec(self) -> Vec<I> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    pub use super::*;
    use assert_matches::assert_matches;
    use std::thread::sleep;

    #[test]
    fn test_round_max_size() {
        let mut round = Round::new(2, Duration::from_secs(10));

        assert_matches!(round.poll(), PollResult::NotReady(_));
        round.append(1);
        assert_matches!(round.poll(), PollResult::NotReady(_));
        round.append(2);
        assert_matches!(round.poll(), PollResult::Ready(Cutoff::Size));

        assert_eq!(round.into_vec(), [1, 2]);
    }

    #[test]
    fn test_round_timeout_counts_from_start() {
        let round: Round<u8> = Round::new(0, Duration::from_millis(50));

        assert_matches!(round.poll(), PollResult::NotReady(left) => assert!(left <= Duration::from_millis(50)));
        sleep(Duration::from_millis(60));

        // empty round still times out
        assert_matches!(round.poll(), PollResult::Ready(Cutoff::Timeout));
        assert!(round.into_vec().is_empty());
    }

    #[test]
    fn test_round_size_before_timeout() {
        let mut round = Round::new(1, Duration::from_millis(10));

        round.append("a");
        sleep(Duration::from_millis(20));

        assert_matches!(round.poll(), PollResult::Ready(Cutoff::Size));
    }

    #[test]
    fn test_round_unbounded() {
        let mut round = Round::new(0, Duration::from_secs(10));

        for i in 0..1000 {
            round.append(i);
        }

        assert_matches!(round.poll(), PollResult::NotReady(_));
        assert_eq!(round.len(), 1000);
        assert_eq!(round.as_slice()[999], 999);
    }

    #[test]
    #[should_panic(expected = "Round append on full round")]
    fn test_append_full() {
        let mut round = Round::new(1, Duration::from_secs(10));
        round.append(1);
        round.append(2);
    }

    #[test]
    #[should_panic(expected = "Round::new bad timeout")]
    fn test_zero_timeout() {
        let _round: Round<u8> = Round::new(0, Duration::from_secs(0));
    }
}
