use core::time::Duration;
use std::time::Instant;

/// A compatibility wrapper around an optional expiry time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Expiry(Option<Instant>);

impl Expiry {
    /// An expiry which is never reached
    pub const NEVER: Expiry = Expiry(None);

    /// Determine if there is a defined expiry
    pub const fn is_some(self) -> bool {
        self.0.is_some()
    }

    /// Access the expiry as an optional instant
    pub const fn instant(self) -> Option<Instant> {
        self.0
    }

    /// Convert the expiry into a duration from now. Returns `None` if there
    /// is no expiry or if it has already passed.
    #[inline]
    pub fn checked_duration(self) -> Option<Duration> {
        self.0
            .and_then(|inst| inst.checked_duration_since(Instant::now()))
    }

    /// Determine if the expiry time has been reached
    #[inline]
    pub fn has_passed(self) -> bool {
        self.0.map(|inst| inst <= Instant::now()).unwrap_or(false)
    }
}

impl From<Duration> for Expiry {
    #[inline]
    fn from(dur: Duration) -> Expiry {
        Self(Some(Instant::now() + dur))
    }
}

impl From<Instant> for Expiry {
    #[inline]
    fn from(inst: Instant) -> Expiry {
        Self(Some(inst))
    }
}

impl From<Option<Duration>> for Expiry {
    #[inline]
    fn from(dur: Option<Duration>) -> Expiry {
        Self(dur.map(|d| Instant::now() + d))
    }
}

impl From<Option<Instant>> for Expiry {
    #[inline]
    fn from(inst: Option<Instant>) -> Expiry {
        Self(inst)
    }
}
