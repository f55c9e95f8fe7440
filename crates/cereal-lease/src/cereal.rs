use crate::complex::{GrainComplex, ReleaseHook, ReleaseReason};
use crate::config::CerealConfig;
use crate::lock_wait::LockWait;
use crate::resource::{Admission, Resource};
use crate::subject::{DeadlockDetector, NoDetection, SubjectContext, SubjectRegistry};
use cereal_core::{Grain, LockError, LockServer, Timeout};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

/// Indices shared between the facade and the release hook.
struct Ledger {
    resources: DashMap<String, Arc<Resource>>,
    leases: DashMap<String, Weak<GrainComplex>>,
    detector: Box<dyn DeadlockDetector>,
}

/// Transport independent resource lock server.
///
/// Grants exclusive, self-expiring leases ([`Grain`]s) on named resources to
/// named subjects. Contending requests wait in a FIFO per resource; a subject
/// asking again for a resource it already holds gets the same grain back.
///
/// `Cereal` is meant to be shared (`Arc<Cereal>`) between the threads acting
/// for different subjects. [`lock`](Self::lock) blocks the calling thread;
/// do not call it from inside an async task without `spawn_blocking`.
pub struct Cereal {
    identifier: String,
    config: CerealConfig,
    ledger: Arc<Ledger>,
    hook: ReleaseHook,
    timers: Handle,
    runtime: Mutex<Option<Runtime>>,
    trim: Mutex<()>,
    disposed: AtomicBool,
    unmatched_releases: AtomicU64,
}

impl Cereal {
    /// Starts a lock server.
    ///
    /// Fails only if the runtime driving lease expiry cannot be started.
    pub fn new(config: CerealConfig) -> std::io::Result<Self> {
        let identifier = format!("cereal.{}", config.system);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.timer_threads.max(1))
            .thread_name(format!("{identifier}.timer"))
            .enable_time()
            .build()?;
        let timers = runtime.handle().clone();

        let detector: Box<dyn DeadlockDetector> = if config.detect_deadlocks {
            Box::new(SubjectRegistry::new())
        } else {
            Box::new(NoDetection)
        };

        let ledger = Arc::new(Ledger {
            resources: DashMap::new(),
            leases: DashMap::new(),
            detector,
        });
        let hook = release_hook(&ledger);

        info!(system = %identifier, deadlock_detection = config.detect_deadlocks, "lock server started");

        Ok(Self {
            identifier,
            config,
            ledger,
            hook,
            timers,
            runtime: Mutex::new(Some(runtime)),
            trim: Mutex::new(()),
            disposed: AtomicBool::new(false),
            unmatched_releases: AtomicU64::new(0),
        })
    }

    /// Starts a lock server for `system` with default settings.
    pub fn with_system(system: impl Into<String>) -> std::io::Result<Self> {
        Self::new(CerealConfig::builder().system(system).build())
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn config(&self) -> &CerealConfig {
        &self.config
    }

    pub fn has_deadlock_detection(&self) -> bool {
        self.ledger.detector.is_enabled()
    }

    /// Request a lease on `resource` for `duration`, waiting up to `timeout`.
    ///
    /// # Returns
    /// * `Ok(grain)` once granted; the same grain again if `subject` already
    ///   holds `resource`.
    /// * `Ok(Grain::empty())` if the wait timed out.
    /// * `Err(LockError::PossibleDeadlock)` if detection is on, the wait is
    ///   indefinite, and waiting would close a two-subject cycle.
    /// * `Err(LockError::Disposed)` after [`shutdown`](Self::shutdown).
    pub fn lock(
        &self,
        subject: &str,
        resource: &str,
        duration: Duration,
        timeout: impl Into<Timeout>,
    ) -> Result<Grain, LockError> {
        let timeout = timeout.into();
        let bound = timeout.resolve(self.config.default_wait_timeout);
        let duration = if duration.is_zero() {
            self.config.default_lease_duration
        } else {
            duration
        };

        let deadline = bound.and_then(|bound| Instant::now().checked_add(bound));

        loop {
            let Some((lease, admission)) =
                self.admit(subject, resource, duration, timeout, deadline)?
            else {
                warn!(subject, resource, ?timeout, "gave up waiting for lease");
                return Ok(Grain::empty());
            };

            let grain = lease.grain().clone();
            self.ledger
                .leases
                .insert(grain.id().to_string(), Arc::downgrade(&lease));
            self.ledger.detector.wait_succeeded(&grain);

            // The lease may already be over (tiny durations, or a return by
            // another thread of the same subject); undo what the release hook
            // could not see yet.
            if lease.is_returned() {
                self.ledger.leases.remove(grain.id());
                self.ledger.detector.released(&grain);

                // A re-entered lease that ended under us was never ours to
                // hand out; ask again.
                if admission == Admission::Reentered {
                    debug!(subject, resource, grain = %grain.id(), "re-entered lease ended, retrying");
                    continue;
                }
            }

            debug!(subject, resource, grain = %grain.id(), "lease granted");
            return Ok(grain);
        }
    }

    /// Gets a request admitted on `resource` and waits for its lease.
    /// `None` means the wait timed out.
    fn admit(
        &self,
        subject: &str,
        resource: &str,
        duration: Duration,
        timeout: Timeout,
        deadline: Option<Instant>,
    ) -> Result<Option<(Arc<GrainComplex>, Admission)>, LockError> {
        let wait = Arc::new(LockWait::new());
        let admission = loop {
            self.ensure_live()?;

            let target = self.resource(resource);
            let holder = target.holder();
            self.ledger.detector.begin_wait(
                subject,
                resource,
                holder.as_deref(),
                timeout.is_forever(),
            )?;

            let admission = target.request_lock(subject, duration, &wait);

            // Shutdown may have cleared the index after the liveness check;
            // a resource created or served past that point must not outlive it.
            if self.is_disposed() {
                target.close();
                self.ledger
                    .resources
                    .remove_if(resource, |_, live| Arc::ptr_eq(live, &target));
                self.ledger.detector.wait_abandoned(subject, resource);
                return Err(self.disposed_error());
            }

            match admission {
                Admission::Retired => {
                    // Reclaimed between lookup and request: forget it and start over.
                    self.ledger.detector.wait_abandoned(subject, resource);
                    self.ledger
                        .resources
                        .remove_if(resource, |_, live| Arc::ptr_eq(live, &target));
                }
                Admission::Queued => {
                    debug!(subject, resource, holder = ?holder, ?timeout, "waiting for lease");
                    break admission;
                }
                Admission::Granted | Admission::Reentered => break admission,
            }
        };

        let remaining =
            deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match wait.wait(remaining) {
            Some(lease) => Ok(Some((lease, admission))),
            None => {
                self.ledger.detector.wait_abandoned(subject, resource);
                self.ensure_live()?;
                Ok(None)
            }
        }
    }

    /// Give a lease back.
    ///
    /// Unknown grains, grains that already expired and grains released twice
    /// are ignored; each such call is logged and counted in
    /// [`unmatched_releases`](Self::unmatched_releases).
    pub fn release(&self, grain: &Grain) -> Result<(), LockError> {
        self.ensure_live()?;

        let lease = self
            .ledger
            .leases
            .get(grain.id())
            .and_then(|entry| entry.value().upgrade());

        match lease {
            Some(lease) if lease.return_lease() => {
                self.ledger.leases.remove(grain.id());
            }
            _ => {
                self.ledger.leases.remove(grain.id());
                self.unmatched_releases.fetch_add(1, Ordering::Relaxed);
                warn!(
                    grain = %grain.id(),
                    subject = grain.subject(),
                    resource = grain.resource(),
                    "release of unknown or already ended grain ignored"
                );
            }
        }
        Ok(())
    }

    /// Reclaims resources that nobody holds or waits for and that have been
    /// idle longer than the staleness threshold.
    ///
    /// Candidates are picked without blocking anyone; each one is confirmed
    /// under its own lock before removal, so a resource that just became busy
    /// again survives. Returns the number of reclaimed resources.
    pub fn optimize(&self) -> Result<usize, LockError> {
        self.ensure_live()?;
        let _trim = self.trim.lock();
        let threshold = self.config.staleness_threshold;

        let candidates: Vec<Arc<Resource>> = self
            .ledger
            .resources
            .iter()
            .filter(|entry| entry.value().looks_idle(threshold))
            .map(|entry| entry.value().clone())
            .collect();

        let mut reclaimed = 0;
        for resource in candidates {
            if !resource.retire_if_stale(threshold) {
                continue;
            }
            if self
                .ledger
                .resources
                .remove_if(resource.id(), |_, live| Arc::ptr_eq(live, &resource))
                .is_some()
            {
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            info!(system = %self.identifier, reclaimed, "reclaimed idle resources");
        }
        Ok(reclaimed)
    }

    /// Shuts the server down: wakes every waiter, stops every expiry timer
    /// and clears all indices. Later calls fail with [`LockError::Disposed`].
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let resources: Vec<Arc<Resource>> = self
            .ledger
            .resources
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for resource in &resources {
            resource.close();
        }

        self.ledger.resources.clear();
        self.ledger.leases.clear();
        self.ledger.detector.clear();

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!(system = %self.identifier, "lock server shut down");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn resource_count(&self) -> usize {
        self.ledger.resources.len()
    }

    /// Leases granted and not yet ended.
    pub fn active_lease_count(&self) -> usize {
        self.ledger
            .leases
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .upgrade()
                    .is_some_and(|lease| !lease.is_returned())
            })
            .count()
    }

    pub fn is_held(&self, resource: &str) -> bool {
        self.existing(resource).is_some_and(|r| r.is_held())
    }

    pub fn holder(&self, resource: &str) -> Option<String> {
        self.existing(resource).and_then(|r| r.holder())
    }

    /// Requests queued on `resource`.
    pub fn pending(&self, resource: &str) -> usize {
        self.existing(resource).map_or(0, |r| r.pending())
    }

    /// Snapshot of a subject's wait/hold context when detection is on.
    pub fn subject_context(&self, subject: &str) -> Option<SubjectContext> {
        self.ledger.detector.context(subject)
    }

    /// Releases that matched no live lease.
    pub fn unmatched_releases(&self) -> u64 {
        self.unmatched_releases.load(Ordering::Relaxed)
    }

    fn existing(&self, resource: &str) -> Option<Arc<Resource>> {
        self.ledger
            .resources
            .get(resource)
            .map(|entry| entry.value().clone())
    }

    fn resource(&self, resource: &str) -> Arc<Resource> {
        self.ledger
            .resources
            .entry(resource.to_string())
            .or_insert_with(|| Resource::new(resource, self.timers.clone(), self.hook.clone()))
            .value()
            .clone()
    }

    fn ensure_live(&self) -> Result<(), LockError> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        Ok(())
    }

    fn disposed_error(&self) -> LockError {
        LockError::Disposed {
            system: self.identifier.clone(),
        }
    }
}

/// Drops ended leases from the index and from their subject's context.
fn release_hook(ledger: &Arc<Ledger>) -> ReleaseHook {
    let ledger = Arc::downgrade(ledger);
    Arc::new(move |grain: &Grain, reason: ReleaseReason| {
        let Some(ledger) = ledger.upgrade() else {
            return;
        };
        ledger.leases.remove(grain.id());
        ledger.detector.released(grain);
        info!(
            grain = %grain.id(),
            subject = grain.subject(),
            resource = grain.resource(),
            ?reason,
            "lease ended"
        );
    })
}

impl LockServer for Cereal {
    fn lock(
        &self,
        subject: &str,
        resource: &str,
        duration: Duration,
        timeout: Timeout,
    ) -> Result<Grain, LockError> {
        Cereal::lock(self, subject, resource, duration, timeout)
    }

    fn release(&self, grain: &Grain) -> Result<(), LockError> {
        Cereal::release(self, grain)
    }

    fn optimize(&self) -> Result<usize, LockError> {
        Cereal::optimize(self)
    }

    fn has_deadlock_detection(&self) -> bool {
        Cereal::has_deadlock_detection(self)
    }
}

impl Drop for Cereal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Cereal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cereal")
            .field("identifier", &self.identifier)
            .field("resources", &self.ledger.resources.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
