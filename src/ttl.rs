//! Time-to-live rules for pooled items

use std::time::{Duration, Instant};

/// How long a value stays servable after it is returned to a pool
///
/// # Examples
///
/// ```
/// use ttlpool::Ttl;
/// use std::time::Duration;
///
/// assert_eq!(Ttl::from_millis(0), Ttl::Never);
/// assert_eq!(Ttl::from_millis(-1), Ttl::Immediate);
/// assert_eq!(Ttl::from_millis(1500), Ttl::After(Duration::from_millis(1500)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ttl {
    /// Items never expire
    #[default]
    Never,

    /// Items are expired the moment they are returned. They are never
    /// served again and only wait for the reaper.
    Immediate,

    /// Items expire this long after being returned
    After(Duration),
}

impl Ttl {
    /// Signed millisecond form: zero never expires, negative expires at once.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => Ttl::Never,
            m if m < 0 => Ttl::Immediate,
            m => Ttl::After(Duration::from_millis(m.unsigned_abs())),
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Ttl::Never)
    }

    pub(crate) fn expiry_from(&self, returned_at: Instant) -> Expiry {
        match self {
            Ttl::Never => Expiry::Never,
            Ttl::Immediate => Expiry::At(returned_at),
            Ttl::After(ttl) => Expiry::At(returned_at + *ttl),
        }
    }
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Ttl::Never
        } else {
            Ttl::After(ttl)
        }
    }
}

/// Absolute expiry stamped on an item when it enters the pool.
///
/// With a fixed per-pool [`Ttl`], items appended at the back carry
/// non-decreasing expiries from front to back. The reaper relies on this to
/// stop at the first unexpired item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Expiry {
    At(Instant),
    Never,
}

impl Expiry {
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => *at <= now,
        }
    }
}
