//! Saga expiry policies.

use chrono::{DateTime, Duration, Utc};

/// Policy for computing a saga's liveness deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStrategy {
    /// The saga never expires.
    NoTimeout,
    /// The deadline is fixed at creation time plus the duration and never
    /// recomputed.
    SinceStart(Duration),
    /// The deadline slides forward to now plus the duration on every
    /// accepted transition.
    SinceLastEvent(Duration),
}

impl TimeoutStrategy {
    /// Computes the deadline for a saga created at `created_at`.
    #[must_use]
    pub fn initial_deadline(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            TimeoutStrategy::NoTimeout => DateTime::<Utc>::MAX_UTC,
            TimeoutStrategy::SinceStart(duration) | TimeoutStrategy::SinceLastEvent(duration) => {
                created_at
                    .checked_add_signed(duration)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
        }
    }

    /// Computes the deadline after an accepted transition at `now`, given
    /// the currently scheduled deadline.
    #[must_use]
    pub fn next_deadline(&self, current: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            TimeoutStrategy::NoTimeout => DateTime::<Utc>::MAX_UTC,
            TimeoutStrategy::SinceStart(_) => current,
            TimeoutStrategy::SinceLastEvent(duration) => now
                .checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}
