use crate::complex::{GrainComplex, ReleaseHook, ReleaseReason};
use crate::lock_wait::LockWait;
use cereal_core::Grain;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info};

/// A request parked behind the current holder.
struct LockRequest {
    subject: String,
    duration: Duration,
    wait: Arc<LockWait>,
}

struct State {
    current: Option<Arc<GrainComplex>>,
    pending: VecDeque<LockRequest>,
    last_access: Instant,
    /// Set once the resource was reclaimed or shut down. A retired resource
    /// accepts no requests; callers look it up again.
    retired: bool,
}

/// Outcome of [`Resource::request_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new lease was offered to the request's wait.
    Granted,
    /// The requester already holds the resource; its current lease was offered.
    Reentered,
    /// The request joined the queue.
    Queued,
    /// The resource is gone; nothing was offered or queued.
    Retired,
}

/// One lockable resource: the current lease plus a FIFO of waiting requests.
///
/// All state changes happen under this resource's own lock, so contention on
/// one resource never stalls another.
pub struct Resource {
    id: String,
    state: Mutex<State>,
    timers: Handle,
    hook: ReleaseHook,
    this: Weak<Resource>,
}

impl Resource {
    pub(crate) fn new(id: impl Into<String>, timers: Handle, hook: ReleaseHook) -> Arc<Self> {
        let id = id.into();
        Arc::new_cyclic(|this| Self {
            id,
            state: Mutex::new(State {
                current: None,
                pending: VecDeque::new(),
                last_access: Instant::now(),
                retired: false,
            }),
            timers,
            hook,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The subject holding the resource right now, if any.
    pub fn holder(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .current
            .as_ref()
            .map(|current| current.grain().subject().to_string())
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Number of queued requests, including ones whose waiters gave up but
    /// have not been pruned yet.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn last_access(&self) -> Instant {
        self.state.lock().last_access
    }

    /// Grants, re-grants or queues a request. Whatever is granted is offered
    /// through `wait`; queued requests are offered later by the hand-off.
    pub(crate) fn request_lock(
        &self,
        subject: &str,
        duration: Duration,
        wait: &Arc<LockWait>,
    ) -> Admission {
        let (admission, overdue) = {
            let mut state = self.state.lock();
            if state.retired {
                return Admission::Retired;
            }
            state.last_access = Instant::now();

            // A lease that is ending or overdue is vacated before anything else,
            // so it is never re-entered.
            let overdue = self.vacate_ending(&mut state);

            let admission = match state.current.clone() {
                Some(current) if current.grain().subject() == subject => {
                    wait.offer(current);
                    Admission::Reentered
                }
                None if state.pending.is_empty() => {
                    if self.grant(&mut state, subject, duration, wait) {
                        Admission::Granted
                    } else {
                        // Only a wait cancelled by shutdown refuses a fresh offer.
                        Admission::Retired
                    }
                }
                _ => {
                    Self::prune_abandoned(&mut state);
                    state.pending.push_back(LockRequest {
                        subject: subject.to_string(),
                        duration,
                        wait: wait.clone(),
                    });
                    Admission::Queued
                }
            };
            (admission, overdue)
        };

        if let Some(lease) = overdue {
            lease.announce(ReleaseReason::Expired);
        }

        debug!(resource = %self.id, subject, ?admission, "lock requested");
        admission
    }

    /// Vacates the resource if `grain` is its current lease.
    ///
    /// Expiry serves the queue right away, before anything else can be
    /// granted. An explicit return hands the queue off to the timer runtime
    /// so the releasing caller is not kept waiting.
    pub(crate) fn release(&self, grain: &Grain, reason: ReleaseReason) {
        let mut state = self.state.lock();
        state.last_access = Instant::now();

        let is_current = state
            .current
            .as_ref()
            .is_some_and(|current| current.grain() == grain);
        if !is_current {
            debug!(resource = %self.id, grain = %grain.id(), "release of a lease that is no longer current");
            return;
        }

        state.current = None;
        info!(resource = %self.id, grain = %grain.id(), subject = grain.subject(), ?reason, "resource vacated");

        match reason {
            ReleaseReason::Expired => self.serve_queue(&mut state),
            ReleaseReason::Returned => {
                if state.pending.is_empty() {
                    return;
                }
                drop(state);
                let this = self.this.clone();
                self.timers.spawn(async move {
                    if let Some(resource) = this.upgrade() {
                        resource.process_queue();
                    }
                });
            }
        }
    }

    /// Hands the resource to the next live request in the queue.
    pub(crate) fn process_queue(&self) {
        let mut state = self.state.lock();
        state.last_access = Instant::now();
        self.serve_queue(&mut state);
    }

    fn serve_queue(&self, state: &mut State) {
        if state.current.is_some() || state.retired {
            return;
        }

        while let Some(request) = state.pending.pop_front() {
            if !self.grant(state, &request.subject, request.duration, &request.wait) {
                debug!(resource = %self.id, subject = %request.subject, "waiter gave up before hand-off");
                continue;
            }

            debug!(resource = %self.id, subject = %request.subject, "lease handed off");

            // Requests from the new holder that queued meanwhile share its lease.
            if let Some(current) = state.current.clone() {
                state.pending.retain(|queued| {
                    if queued.subject != request.subject {
                        return true;
                    }
                    queued.wait.offer(current.clone());
                    false
                });
            }
            return;
        }
    }

    /// Creates a lease for `subject` and offers it. Only an accepted lease
    /// becomes current and starts its expiry clock.
    fn grant(&self, state: &mut State, subject: &str, duration: Duration, wait: &LockWait) -> bool {
        let lease = GrainComplex::new(
            Grain::issue(subject, &self.id, duration),
            self.this.clone(),
            self.hook.clone(),
        );

        if !wait.offer(lease.clone()) {
            return false;
        }

        lease.arm(&self.timers);
        state.current = Some(lease);
        true
    }

    /// Takes the current lease out if it is already being returned or has
    /// outlived its duration, and serves the queue in its place. Queued
    /// requests go first, so a holder re-requesting its overdue resource
    /// only gets a fresh lease when nobody else is waiting.
    ///
    /// Returns the lease if this call ended it and must announce it.
    fn vacate_ending(&self, state: &mut State) -> Option<Arc<GrainComplex>> {
        let ending = state
            .current
            .as_ref()
            .is_some_and(|current| current.is_returned() || current.is_expired());
        if !ending {
            return None;
        }

        let ended = state.current.take()?;
        self.serve_queue(state);

        // Whoever marked it returned first (a return or the timer) also
        // announces it; do not do it twice.
        ended.retire().then_some(ended)
    }

    fn prune_abandoned(state: &mut State) {
        state.pending.retain(|request| !request.wait.is_expired());
    }

    /// Cheap check used to pick reclamation candidates. Never blocks; a busy
    /// resource is simply not a candidate.
    pub(crate) fn looks_idle(&self, threshold: Duration) -> bool {
        self.state.try_lock().is_some_and(|state| {
            state.current.is_none()
                && !state.retired
                && state.last_access.elapsed() >= threshold
                && state.pending.iter().all(|request| request.wait.is_expired())
        })
    }

    /// Confirms under the resource lock that it is still idle and stale, and
    /// if so retires it. Returns whether it was retired.
    pub(crate) fn retire_if_stale(&self, threshold: Duration) -> bool {
        let mut state = self.state.lock();
        Self::prune_abandoned(&mut state);

        if state.retired
            || state.current.is_some()
            || !state.pending.is_empty()
            || state.last_access.elapsed() < threshold
        {
            return false;
        }

        state.retired = true;
        true
    }

    /// Retires the resource for good: stops the current lease's timer and
    /// wakes every queued waiter empty-handed.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.retired = true;

        if let Some(current) = state.current.take() {
            current.disarm();
        }
        for request in state.pending.drain(..) {
            request.wait.cancel();
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").field("id", &self.id).finish_non_exhaustive()
    }
}
