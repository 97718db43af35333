//! In-flight limit for the query path
//!
//! Over the limit a call fails immediately; nothing is queued. The permit
//! gives the slot back when dropped, on every exit path.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max: usize,
    in_flight: AtomicUsize,
}

#[must_use = "the slot is released when the permit is dropped"]
#[derive(Debug)]
pub struct Permit<'a> {
    limiter: &'a ConcurrencyLimiter,
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max).then_some(current + 1)
            })
            .ok()
            .map(|_| Permit { limiter: self })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limiter.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fails_fast_at_limit() {
        let limiter = ConcurrencyLimiter::new(3);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        let _c = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_flight(), 3);

        drop(a);
        assert_eq!(limiter.in_flight(), 2);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_permits_released_on_drop() {
        let limiter = ConcurrencyLimiter::new(1);
        {
            let _permit = limiter.try_acquire().unwrap();
        }
        assert_eq!(limiter.in_flight(), 0);
    }
}
