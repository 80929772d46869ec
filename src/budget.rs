//! Wall-clock budgets for the search stages.
//!
//! `std::time::Instant` panics on `wasm32-unknown-unknown`, so the browser
//! build reads the JS clock instead.

#[cfg(not(target_arch = "wasm32"))]
mod clock {
    use std::time::Instant;

    pub type Stamp = Instant;

    pub fn now() -> Stamp {
        Instant::now()
    }

    pub fn millis_since(stamp: &Stamp) -> f64 {
        stamp.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(target_arch = "wasm32")]
mod clock {
    pub type Stamp = f64;

    pub fn now() -> Stamp {
        js_sys::Date::now()
    }

    pub fn millis_since(stamp: &Stamp) -> f64 {
        (js_sys::Date::now() - stamp).max(0.0)
    }
}

/// A best-effort time limit. Searches poll `is_expired` every few hundred
/// explored states and return what they have when it fires.
#[derive(Clone, Debug)]
pub struct Deadline {
    start: clock::Stamp,
    limit_ms: Option<f64>,
}

impl Deadline {
    /// Budget that never expires
    pub fn unbounded() -> Self {
        Self {
            start: clock::now(),
            limit_ms: None,
        }
    }

    /// Budget of `seconds` starting now. Non-positive or non-finite values
    /// are treated as unbounded.
    pub fn after_seconds(seconds: f64) -> Self {
        let limit_ms = if seconds.is_finite() && seconds > 0.0 {
            Some(seconds * 1000.0)
        } else {
            None
        };
        Self {
            start: clock::now(),
            limit_ms,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        clock::millis_since(&self.start)
    }

    /// Remaining milliseconds, `None` when unbounded.
    pub fn remaining_ms(&self) -> Option<f64> {
        self.limit_ms
            .map(|limit| (limit - self.elapsed_ms()).max(0.0))
    }

    pub fn is_expired(&self) -> bool {
        match self.limit_ms {
            Some(limit) => self.elapsed_ms() >= limit,
            None => false,
        }
    }

    /// A child budget covering `fraction` of what is left of this one.
    pub fn share(&self, fraction: f64) -> Deadline {
        let fraction = fraction.clamp(0.0, 1.0);
        Deadline {
            start: clock::now(),
            limit_ms: self.remaining_ms().map(|left| left * fraction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_expires() {
        let deadline = Deadline::unbounded();
        assert!(!deadline.is_expired());
        assert!(deadline.remaining_ms().is_none());
        assert!(deadline.share(0.5).remaining_ms().is_none());
    }

    #[test]
    fn test_non_positive_budget_is_unbounded() {
        assert!(Deadline::after_seconds(0.0).remaining_ms().is_none());
        assert!(Deadline::after_seconds(-1.0).remaining_ms().is_none());
        assert!(Deadline::after_seconds(f64::NAN).remaining_ms().is_none());
    }

    #[test]
    fn test_share_is_fraction_of_remaining() {
        let deadline = Deadline::after_seconds(100.0);
        let child = deadline.share(0.25);
        let left = child.remaining_ms().unwrap();
        assert!(left <= 25_000.0 && left > 24_000.0, "unexpected share {}", left);
        assert!(!child.is_expired());
    }

    #[test]
    fn test_zero_share_expires_immediately() {
        let deadline = Deadline::after_seconds(10.0);
        assert!(deadline.share(0.0).is_expired());
    }
}
