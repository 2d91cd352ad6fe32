//! The class-keyed SendQ pool.
//!
//! Class caps are process-wide mutable state shared by every link in that
//! class. This is single-writer by construction: the only mutator is
//! the burst-expansion path below, driven from the one task that owns the
//! [`crate::Core`]. `AtomicU64` is used for the counters anyway so that
//! operator-facing reads (`cres_mem`-style reporting) never need to take a
//! lock out from under the writer.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use ahash::AHashMap;

/// Outcome of a SendQ enqueue admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The write fits under the cap, no expansion needed.
    Accepted,
    /// The write only fit because this call doubled the class cap (the
    /// link was in connect burst); `new_poolsize` is the pool's aggregate
    /// size after the adjustment, for the operator-facing notice.
    AcceptedAfterBurstExpansion { new_poolsize: u64 },
    /// The link must be killed with `ExitCode::SendQ`.
    Overflow { current: u64, cap: u64 },
    /// The allocator refused outright; kill with `ExitCode::MBuf`.
    AllocatorRefused,
}

/// A named grouping of peers sharing a SendQ cap.
pub struct SendClass {
    pub name: String,
    cap: AtomicU64,
}

impl SendClass {
    pub fn new(name: impl Into<String>, cap: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            cap: AtomicU64::new(cap),
        })
    }

    pub fn cap(&self) -> u64 {
        self.cap.load(Ordering::Relaxed)
    }

    fn double(&self) -> u64 {
        let old = self.cap.load(Ordering::Relaxed);
        let new = old.saturating_mul(2);
        self.cap.store(new, Ordering::Relaxed);
        new - old
    }
}

/// The process-wide ceiling on aggregate SendQ allocation; class caps are
/// carved out of it. Only ever grows, and only via burst expansion.
#[derive(Default)]
pub struct Pool {
    size: AtomicU64,
    classes: RwLock<AHashMap<String, Arc<SendClass>>>,
}

impl Pool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn poolsize(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Registers (or replaces) a named class with an initial cap. Also
    /// folds its cap into the pool size, matching the meaning of "class
    /// caps are carved out of [the pool]".
    pub fn register_class(&self, name: impl Into<String>, cap: u64) -> Arc<SendClass> {
        let class = SendClass::new(name, cap);
        self.size.fetch_add(cap, Ordering::Relaxed);
        self.classes.write().insert(class.name.clone(), class.clone());
        class
    }

    pub fn class(&self, name: &str) -> Option<Arc<SendClass>> {
        self.classes.read().get(name).cloned()
    }

    /// Admission check for appending `additional` bytes to a link currently
    /// holding `current` bytes in its outbound dbuf.
    ///
    /// `burst` marks the link as being in its initial connect-burst window,
    /// the only state in which the class cap may auto-enlarge. The retry
    /// here is a bounded two-iteration check rather than a goto: burst
    /// expansion fires at most once per call.
    pub fn admit(&self, class: &SendClass, current: u64, additional: u64, burst: bool) -> Admission {
        let cap = class.cap();
        let projected = current + additional;

        if current > cap {
            return Admission::Overflow { current, cap };
        }

        if projected <= cap {
            return Admission::Accepted;
        }

        if burst {
            let delta = class.double();
            let previous_poolsize = self.size.fetch_add(delta / 2, Ordering::Relaxed);
            let new_cap = class.cap();
            return if projected <= new_cap {
                Admission::AcceptedAfterBurstExpansion {
                    new_poolsize: previous_poolsize + delta / 2,
                }
            } else {
                Admission::Overflow {
                    current: projected,
                    cap: new_cap,
                }
            };
        }

        Admission::Overflow {
            current: projected,
            cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_burst_overflow_is_rejected_exactly_at_cap_plus_one() {
        let pool = Pool::new();
        let class = pool.register_class("server", 1_000);
        assert_eq!(pool.admit(&class, 1_000, 0, false), Admission::Accepted);
        assert_eq!(
            pool.admit(&class, 1_000, 1, false),
            Admission::Overflow {
                current: 1_001,
                cap: 1_000
            }
        );
    }

    #[test]
    fn burst_doubles_cap_and_grows_poolsize_by_half_delta() {
        let pool = Pool::new();
        let class = pool.register_class("peer.example.", 1_000_000);
        let before = pool.poolsize();

        let admitted = pool.admit(&class, 0, 1_200_000, true);
        assert_eq!(
            admitted,
            Admission::AcceptedAfterBurstExpansion {
                new_poolsize: before + 500_000
            }
        );
        assert_eq!(class.cap(), 2_000_000);
        assert_eq!(pool.poolsize(), before + 500_000);
    }

    #[test]
    fn burst_cannot_rescue_a_write_that_still_overflows_the_doubled_cap() {
        let pool = Pool::new();
        let class = pool.register_class("peer.example.", 100);
        let admitted = pool.admit(&class, 0, 1_000, true);
        assert!(matches!(admitted, Admission::Overflow { .. }));
        assert_eq!(class.cap(), 200);
    }
}
