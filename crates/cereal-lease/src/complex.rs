use crate::resource::Resource;
use cereal_core::Grain;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

/// Why a lease ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The holder gave it back.
    Returned,
    /// Its duration ran out.
    Expired,
}

/// Called once per lease after it has ended and its resource moved on.
pub(crate) type ReleaseHook = Arc<dyn Fn(&Grain, ReleaseReason) + Send + Sync>;

/// A granted [`Grain`] together with the timer that takes it back.
///
/// Whichever comes first, an explicit return or the expiry timer, releases
/// the lease on its resource and fires the release hook. The other path then
/// does nothing.
pub struct GrainComplex {
    grain: Grain,
    granted: Instant,
    resource: Weak<Resource>,
    hook: ReleaseHook,
    returned: AtomicBool,
    expiry: Mutex<Option<AbortHandle>>,
}

impl GrainComplex {
    pub(crate) fn new(grain: Grain, resource: Weak<Resource>, hook: ReleaseHook) -> Arc<Self> {
        Arc::new(Self {
            grain,
            granted: Instant::now(),
            resource,
            hook,
            returned: AtomicBool::new(false),
            expiry: Mutex::new(None),
        })
    }

    /// A lease bound to no resource, for exercising hand-off in isolation.
    #[cfg(test)]
    pub(crate) fn detached(grain: Grain) -> Arc<Self> {
        Self::new(grain, Weak::new(), Arc::new(|_, _| {}))
    }

    pub fn grain(&self) -> &Grain {
        &self.grain
    }

    pub fn is_returned(&self) -> bool {
        self.returned.load(Ordering::Acquire)
    }

    /// True once the lease outlived its duration, whether or not the timer
    /// has caught up yet.
    pub fn is_expired(&self) -> bool {
        self.granted.elapsed() >= self.grain.duration()
    }

    /// Schedules the expiry for whatever is left of the lease's duration.
    pub(crate) fn arm(self: &Arc<Self>, timers: &Handle) {
        let remaining = self.grain.duration().saturating_sub(self.granted.elapsed());
        let lease = Arc::downgrade(self);

        let task = timers.spawn(async move {
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
            if let Some(lease) = lease.upgrade() {
                lease.finish(ReleaseReason::Expired);
            }
        });

        let mut expiry = self.expiry.lock();
        if self.is_returned() {
            task.abort();
        } else {
            *expiry = Some(task.abort_handle());
        }
    }

    /// Gives the lease back. Returns `false` if it had already ended.
    pub fn return_lease(&self) -> bool {
        self.finish(ReleaseReason::Returned)
    }

    fn finish(&self, reason: ReleaseReason) -> bool {
        if !self.mark_returned() {
            return false;
        }
        if reason == ReleaseReason::Returned {
            self.cancel_expiry();
        }

        debug!(grain = %self.grain.id(), ?reason, "lease ending");

        if let Some(resource) = self.resource.upgrade() {
            resource.release(&self.grain, reason);
        }
        (self.hook)(&self.grain, reason);
        true
    }

    /// Ends the lease without touching its resource; the caller already
    /// holds the resource and vacates it itself. Follow with [`announce`](Self::announce).
    pub(crate) fn retire(&self) -> bool {
        if !self.mark_returned() {
            return false;
        }
        self.cancel_expiry();
        true
    }

    pub(crate) fn announce(&self, reason: ReleaseReason) {
        (self.hook)(&self.grain, reason);
    }

    /// Stops the timer without releasing anything. Used at shutdown.
    pub(crate) fn disarm(&self) {
        self.returned.store(true, Ordering::Release);
        self.cancel_expiry();
    }

    fn mark_returned(&self) -> bool {
        !self.returned.swap(true, Ordering::AcqRel)
    }

    fn cancel_expiry(&self) {
        if let Some(task) = self.expiry.lock().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for GrainComplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrainComplex")
            .field("grain", &self.grain)
            .field("returned", &self.is_returned())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting(grain: Grain, calls: Arc<AtomicUsize>) -> Arc<GrainComplex> {
        GrainComplex::new(
            grain,
            Weak::new(),
            Arc::new(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_return_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lease = counting(Grain::issue("alice", "A", Duration::from_secs(5)), calls.clone());

        assert!(lease.return_lease());
        assert!(!lease.return_lease());
        assert!(lease.is_returned());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiry_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lease = counting(Grain::issue("alice", "A", Duration::from_millis(30)), calls.clone());

        lease.arm(&Handle::current());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(lease.is_returned());
        assert!(!lease.return_lease());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_return_cancels_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lease = counting(Grain::issue("alice", "A", Duration::from_millis(30)), calls.clone());

        lease.arm(&Handle::current());
        assert!(lease.return_lease());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
