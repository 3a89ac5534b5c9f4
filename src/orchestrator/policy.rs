use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification of a failed attempt, derived from the engine's diagnostic text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limiting or a ban; retried with a fresh identity
    TransientThrottle,

    /// Connection trouble; retried
    TransientNetwork,

    /// Anything the vocabulary does not recognise
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(&self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::TransientThrottle => write!(f, "rate limited"),
            ErrorClass::TransientNetwork => write!(f, "network"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Marker words used to classify engine failures.
///
/// Matching is a case-insensitive substring search; throttle markers win over network
/// markers when both appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    throttle: Vec<String>,
    network: Vec<String>,
}

impl Vocabulary {
    pub fn new<T, N>(throttle: T, network: N) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        let normalize = |marker: &str| marker.trim().to_lowercase();
        Self {
            throttle: throttle
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
            network: network
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, message: &str) -> ErrorClass {
        let lower = message.to_lowercase();

        if self.throttle.iter().any(|m| lower.contains(m.as_str())) {
            ErrorClass::TransientThrottle
        } else if self.network.iter().any(|m| lower.contains(m.as_str())) {
            ErrorClass::TransientNetwork
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Delay inserted between a failed attempt and the next one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Uniformly random delay within `[min_secs, max_secs]`
    Jitter { min_secs: f64, max_secs: f64 },

    /// `base_secs * 2^(attempt - 1)`, capped at `max_secs`
    Doubling { base_secs: f64, max_secs: f64 },
}

impl Backoff {
    /// Delay following the failure of `attempt` (1-indexed)
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let secs = match *self {
            Backoff::Jitter { min_secs, max_secs } => {
                if max_secs > min_secs {
                    rng.gen_range(min_secs..=max_secs)
                } else {
                    min_secs
                }
            }
            Backoff::Doubling { base_secs, max_secs } => {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                (base_secs * 2f64.powi(exponent)).min(max_secs)
            }
        };

        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    /// Smallest and largest delay this backoff can ever produce
    pub fn bounds(&self) -> (Duration, Duration) {
        let (low, high) = match *self {
            Backoff::Jitter { min_secs, max_secs } => (min_secs, max_secs.max(min_secs)),
            Backoff::Doubling { base_secs, max_secs } => (base_secs.min(max_secs), max_secs),
        };
        (
            Duration::try_from_secs_f64(low).unwrap_or(Duration::ZERO),
            Duration::try_from_secs_f64(high).unwrap_or(Duration::ZERO),
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        let (low, high, what) = match *self {
            Backoff::Jitter { min_secs, max_secs } => (min_secs, max_secs, "jitter"),
            Backoff::Doubling { base_secs, max_secs } => (base_secs, max_secs, "doubling"),
        };

        if !low.is_finite() || !high.is_finite() || low <= 0.0 {
            return Err(format!("{} backoff bounds must be positive numbers", what));
        }
        if high < low {
            return Err(format!("{} backoff upper bound {} is below {}", what, high, low));
        }
        Ok(())
    }
}

/// Engine-specific retry parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    pub backoff: Backoff,

    pub vocabulary: Vocabulary,

    /// Give up on the first failure the vocabulary does not recognise
    pub abort_on_permanent: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff, vocabulary: Vocabulary) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            vocabulary,
            abort_on_permanent: false,
        }
    }

    pub fn abort_on_permanent(mut self, abort: bool) -> Self {
        self.abort_on_permanent = abort;
        self
    }
}

/// Fixed pool of request identities (User-Agent strings) rotated on throttling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPool {
    identities: Vec<String>,
    current: usize,
}

impl IdentityPool {
    /// Blank entries are dropped; returns `None` when nothing is left
    pub fn new(identities: Vec<String>) -> Option<Self> {
        let identities: Vec<String> = identities
            .into_iter()
            .map(|identity| identity.trim().to_string())
            .filter(|identity| !identity.is_empty())
            .collect();
        if identities.is_empty() {
            return None;
        }
        Some(Self {
            identities,
            current: 0,
        })
    }

    pub fn current(&self) -> &str {
        &self.identities[self.current]
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Pick a random starting identity
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.current = rng.gen_range(0..self.identities.len());
    }

    /// Switch to a different identity, chosen at random
    pub fn rotate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &str {
        let len = self.identities.len();
        if len > 1 {
            self.current = (self.current + rng.gen_range(1..len)) % len;
        }
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_classify_is_case_insensitive() {
        let vocabulary = Vocabulary::new(["Rate Limit", "429"], ["connect"]);

        assert_eq!(vocabulary.classify("HTTP Error 429: Too Many Requests"), ErrorClass::TransientThrottle);
        assert_eq!(vocabulary.classify("YOU HIT A RATE LIMIT"), ErrorClass::TransientThrottle);
        assert_eq!(vocabulary.classify("Unable to CONNECT to host"), ErrorClass::TransientNetwork);
        assert_eq!(vocabulary.classify("Unsupported URL"), ErrorClass::Permanent);
        assert_eq!(vocabulary.classify("429 while connecting"), ErrorClass::TransientThrottle);
    }

    #[test]
    fn test_empty_markers_are_ignored() {
        let vocabulary = Vocabulary::new(["", "  "], Vec::<String>::new());
        assert_eq!(vocabulary.classify("anything"), ErrorClass::Permanent);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::Jitter {
            min_secs: 4.0,
            max_secs: 10.0,
        };
        let (low, high) = backoff.bounds();
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 1..=1000 {
            let delay = backoff.delay(attempt, &mut rng);
            assert!(delay >= low && delay <= high, "{:?} outside [{:?}, {:?}]", delay, low, high);
        }
    }

    #[test]
    fn test_doubling_grows_and_caps() {
        let backoff = Backoff::Doubling {
            base_secs: 5.0,
            max_secs: 60.0,
        };
        let mut rng = StdRng::seed_from_u64(1);

        let delays: Vec<u64> = (1..=6).map(|a| backoff.delay(a, &mut rng).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_backoff_validation() {
        assert!(Backoff::Jitter { min_secs: 4.0, max_secs: 10.0 }.validate().is_ok());
        assert!(Backoff::Jitter { min_secs: 10.0, max_secs: 4.0 }.validate().is_err());
        assert!(Backoff::Doubling { base_secs: 0.0, max_secs: 4.0 }.validate().is_err());
        assert!(Backoff::Doubling { base_secs: f64::NAN, max_secs: 4.0 }.validate().is_err());
    }

    #[test]
    fn test_identity_rotation_always_changes_identity() {
        let mut pool = IdentityPool::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        pool.randomize(&mut rng);

        for _ in 0..50 {
            let before = pool.current().to_string();
            let after = pool.rotate(&mut rng).to_string();
            assert_ne!(before, after);
        }
    }

    #[test]
    fn test_single_identity_pool_and_empty_pool() {
        let mut pool = IdentityPool::new(vec!["only".into()]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(pool.rotate(&mut rng), "only");
        assert!(IdentityPool::new(Vec::new()).is_none());
        assert!(IdentityPool::new(vec![" ".into(), String::new()]).is_none());
    }

    #[test]
    fn test_blank_identities_are_never_used() {
        let mut pool = IdentityPool::new(vec!["".into(), "agent".into(), "  ".into()]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(pool.len(), 1);

        pool.randomize(&mut rng);
        assert_eq!(pool.current(), "agent");
        assert_eq!(pool.rotate(&mut rng), "agent");
    }
}
