//! Token expiry, wall clock and refresh delay arithmetic

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Expiry reported by the server for a negotiated token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenExpiry {
    /// Token expires at the given instant
    At(DateTime<Utc>),
    /// Token never expires; no renewal is scheduled
    Never,
}

impl TokenExpiry {
    /// Expiry `lifetime` after `now`
    pub fn after(now: DateTime<Utc>, lifetime: Duration) -> Self {
        match chrono::Duration::from_std(lifetime) {
            Ok(lifetime) => now
                .checked_add_signed(lifetime)
                .map(TokenExpiry::At)
                .unwrap_or(TokenExpiry::Never),
            Err(_) => TokenExpiry::Never,
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, TokenExpiry::Never)
    }

    /// True when the grant is already unusable at `now`
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            TokenExpiry::At(at) => *at < now,
            TokenExpiry::Never => false,
        }
    }

    /// Time left until expiry, zero when already past. `None` for [`TokenExpiry::Never`].
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            TokenExpiry::At(at) => Some((*at - now).to_std().unwrap_or(Duration::ZERO)),
            TokenExpiry::Never => None,
        }
    }
}

impl fmt::Display for TokenExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenExpiry::At(at) => write!(f, "{}", at.to_rfc3339()),
            TokenExpiry::Never => f.write_str("never"),
        }
    }
}

/// Delay before the next renewal after a successful negotiation.
///
/// Renews one buffer period ahead of expiry, and never sooner than one buffer
/// period from now.
pub fn next_refresh_delay(expiry: TokenExpiry, now: DateTime<Utc>, buffer_period: Duration) -> Duration {
    let remaining = match expiry.remaining(now) {
        Some(remaining) => remaining,
        None => return buffer_period,
    };
    remaining.saturating_sub(buffer_period).max(buffer_period)
}

/// Source of wall-clock time for expiry arithmetic
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that advances with tokio's clock, so paused-time tests see
/// expiry arithmetic and timers move together.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.origin.elapsed();
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|elapsed| self.origin_wall.checked_add_signed(elapsed))
            .unwrap_or(self.origin_wall)
    }
}
