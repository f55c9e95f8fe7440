use crate::complex::GrainComplex;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Slot {
    /// Nobody has offered anything yet and the waiter is still waiting.
    Open,
    /// An offer was accepted but the waiter has not picked it up.
    Offered(Arc<GrainComplex>),
    /// The waiter took its lease.
    Claimed,
    /// The waiter gave up; offers are refused from now on.
    Expired,
}

/// One-shot hand-off between a resource's queue and one blocked caller.
///
/// Exactly one offer can ever be accepted. The waiter's timeout and a
/// concurrent offer both resolve under the same lock, so either the offer
/// lands before the waiter gives up or the offer is refused and the
/// resource moves on to the next request.
pub struct LockWait {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl LockWait {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Open),
            ready: Condvar::new(),
        }
    }

    /// Offers a lease to the waiter.
    ///
    /// Returns `false` if the waiter already expired (or was already served);
    /// the caller keeps responsibility for the lease in that case.
    pub fn offer(&self, complex: Arc<GrainComplex>) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Open) {
            return false;
        }
        *slot = Slot::Offered(complex);
        self.ready.notify_one();
        true
    }

    /// Blocks until an offer arrives or `timeout` elapses (`None` waits
    /// indefinitely).
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Arc<GrainComplex>> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut slot = self.slot.lock();

        while matches!(*slot, Slot::Open) {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }

        // Still holding the guard: an offer that raced the deadline is seen here.
        match std::mem::replace(&mut *slot, Slot::Expired) {
            Slot::Offered(complex) => {
                *slot = Slot::Claimed;
                Some(complex)
            }
            Slot::Claimed => {
                *slot = Slot::Claimed;
                None
            }
            Slot::Open | Slot::Expired => None,
        }
    }

    /// Gives up on behalf of the waiter, waking it if it is blocked.
    ///
    /// Returns `true` if the wait was still open.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Open) {
            return false;
        }
        *slot = Slot::Expired;
        self.ready.notify_all();
        true
    }

    /// True once the waiter gave up without being served.
    pub fn is_expired(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Expired)
    }
}

impl Default for LockWait {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complex::GrainComplex;
    use cereal_core::Grain;
    use std::thread;

    fn lease(subject: &str) -> Arc<GrainComplex> {
        GrainComplex::detached(Grain::issue(subject, "A", Duration::from_secs(5)))
    }

    #[test]
    fn test_offer_before_wait() {
        let wait = LockWait::new();
        let complex = lease("alice");

        assert!(wait.offer(complex.clone()));
        let got = wait.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(Arc::ptr_eq(&got, &complex));
    }

    #[test]
    fn test_only_one_offer_wins() {
        let wait = LockWait::new();
        assert!(wait.offer(lease("alice")));
        assert!(!wait.offer(lease("bob")));

        let got = wait.wait(None).unwrap();
        assert_eq!(got.grain().subject(), "alice");
        assert!(!wait.offer(lease("carol")));
    }

    #[test]
    fn test_timeout_expires_and_refuses_late_offer() {
        let wait = LockWait::new();
        let started = Instant::now();

        assert!(wait.wait(Some(Duration::from_millis(50))).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(wait.is_expired());
        assert!(!wait.offer(lease("alice")));
    }

    #[test]
    fn test_offer_wakes_blocked_waiter() {
        let wait = Arc::new(LockWait::new());
        let waiter = {
            let wait = wait.clone();
            thread::spawn(move || wait.wait(None))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(wait.offer(lease("alice")));

        let got = waiter.join().unwrap();
        assert_eq!(got.unwrap().grain().subject(), "alice");
    }

    #[test]
    fn test_cancel_wakes_waiter_empty_handed() {
        let wait = Arc::new(LockWait::new());
        let waiter = {
            let wait = wait.clone();
            thread::spawn(move || wait.wait(None))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(wait.cancel());
        assert!(waiter.join().unwrap().is_none());
        assert!(!wait.cancel());
    }
}
