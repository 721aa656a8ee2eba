//! Deterministic retry-delay generation for the reconnect loop (spec §4.2).

use std::cmp::min;
use std::time::Duration;

use rand::Rng;

/// Which family of delay curve a [`Backoff`] produces.
///
/// Corresponds to the `backoff_type` configuration key (spec §6): `exp`,
/// `rand`, `rand_exp`, or `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Doubles the delay on every attempt, clamped to `max`.
    Exp,
    /// Picks uniformly in `[min, max]` on every attempt.
    Rand,
    /// Picks uniformly in `[min, current_exponential_delay]`.
    RandExp,
    /// Never retries; the holder that observes this terminates instead.
    Stop,
}

/// A cursor over a reconnect backoff curve.
///
/// `next` is the only way to advance it, matching spec §4.2's
/// `next() -> (delay, backoff')` — here expressed as `&mut self` mutation
/// rather than a returned successor value, since there is no reason to keep
/// the old cursor around in Rust.
#[derive(Debug, Clone)]
pub struct Backoff {
    kind: BackoffKind,
    min: Duration,
    max: Duration,
    current: Duration,
    started: bool,
}

impl Backoff {
    /// The spec's default `backoff_min` (1000 ms).
    pub const DEFAULT_MIN: Duration = Duration::from_millis(1000);
    /// The spec's default `backoff_max` (30000 ms).
    pub const DEFAULT_MAX: Duration = Duration::from_millis(30_000);

    /// Builds a new cursor. `min` is used as-is for the first non-stop delay,
    /// per spec §4.2 ("Initial delay for all non-stop types is `min`").
    pub fn new(kind: BackoffKind, min: Duration, max: Duration) -> Self {
        Backoff {
            kind,
            min,
            max,
            current: min,
            started: false,
        }
    }

    /// Advances the cursor and returns the delay to wait before the next
    /// connect attempt, or `None` if `kind` is [`BackoffKind::Stop`] and the
    /// holder should terminate instead of retrying.
    pub fn next(&mut self) -> Option<Duration> {
        let delay = match self.kind {
            BackoffKind::Stop => return None,
            BackoffKind::Exp => {
                let delay = self.current;
                self.current = min(self.current * 2, self.max);
                delay
            }
            BackoffKind::Rand => {
                if self.started {
                    uniform(self.min, self.max)
                } else {
                    self.min
                }
            }
            BackoffKind::RandExp => {
                let delay = uniform(self.min, self.current.max(self.min));
                self.current = min(self.current * 2, self.max);
                delay
            }
        };
        self.started = true;
        Some(delay)
    }

    /// Resets the cursor back to its initial delay, e.g. after a successful
    /// reconnect so the next disconnect starts the curve over.
    pub fn reset(&mut self) {
        self.current = self.min;
        self.started = false;
    }
}

fn uniform(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_doubles_and_clamps() {
        let mut b = Backoff::new(BackoffKind::Exp, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(b.next(), Some(Duration::from_millis(100)));
        assert_eq!(b.next(), Some(Duration::from_millis(200)));
        assert_eq!(b.next(), Some(Duration::from_millis(350)));
        assert_eq!(b.next(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn stop_never_retries() {
        let mut b = Backoff::new(BackoffKind::Stop, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(b.next(), None);
        assert_eq!(b.next(), None);
    }

    #[test]
    fn rand_stays_in_bounds() {
        let mut b = Backoff::new(BackoffKind::Rand, Duration::from_millis(50), Duration::from_millis(60));
        for _ in 0..20 {
            let d = b.next().unwrap();
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(60));
        }
    }

    #[test]
    fn rand_initial_delay_is_min() {
        let mut b = Backoff::new(BackoffKind::Rand, Duration::from_millis(50), Duration::from_millis(60));
        assert_eq!(b.next(), Some(Duration::from_millis(50)));
        b.reset();
        assert_eq!(b.next(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn reset_restores_min() {
        let mut b = Backoff::new(BackoffKind::Exp, Duration::from_millis(100), Duration::from_millis(1000));
        b.next();
        b.next();
        b.reset();
        assert_eq!(b.next(), Some(Duration::from_millis(100)));
    }
}
