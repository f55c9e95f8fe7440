//! Per-subject wait/hold bookkeeping for deadlock detection.
//!
//! Only the two-party case is caught: A waits for a resource B holds while B
//! already waits for a resource A holds. Longer cycles go unnoticed.

use cereal_core::{Grain, LockError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// What one subject is waiting for and what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectContext {
    subject: String,
    waiting_for: Option<String>,
    /// Held resource to the id of the lease holding it.
    held: BTreeMap<String, String>,
}

impl SubjectContext {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            waiting_for: None,
            held: BTreeMap::new(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn waiting_for(&self) -> Option<&str> {
        self.waiting_for.as_deref()
    }

    pub fn held_resources(&self) -> impl ExactSizeIterator<Item = &str> {
        self.held.keys().map(String::as_str)
    }

    pub fn holds(&self, resource: &str) -> bool {
        self.held.contains_key(resource)
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting_for.is_some()
    }

    /// True if this subject waits for a resource `other` holds.
    pub fn is_waiting_on(&self, other: &SubjectContext) -> bool {
        self.waiting_for
            .as_deref()
            .is_some_and(|resource| other.holds(resource))
    }

    /// Neither waiting nor holding anything; the context can be dropped.
    pub fn is_idle(&self) -> bool {
        self.waiting_for.is_none() && self.held.is_empty()
    }

    fn begin_wait(&mut self, resource: &str) {
        self.waiting_for = Some(resource.to_string());
    }

    fn wait_succeeded(&mut self, grain: &Grain) {
        self.held
            .insert(grain.resource().to_string(), grain.id().to_string());
        self.stop_waiting(grain.resource());
    }

    fn wait_abandoned(&mut self, resource: &str) {
        self.stop_waiting(resource);
    }

    /// Only the lease recorded for the resource counts; a late release of
    /// an earlier lease leaves a newer one in place.
    fn released(&mut self, grain: &Grain) {
        if self.held.get(grain.resource()).is_some_and(|id| id == grain.id()) {
            self.held.remove(grain.resource());
        }
    }

    fn stop_waiting(&mut self, resource: &str) {
        if self.waiting_for.as_deref() == Some(resource) {
            self.waiting_for = None;
        }
    }
}

/// Tracks wait/hold transitions and refuses waits that would deadlock.
pub trait DeadlockDetector: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Records that `subject` is about to wait for `resource`, currently held
    /// by `holder`.
    ///
    /// # Returns
    /// * `Err(LockError::PossibleDeadlock)` if the wait is indefinite and the
    ///   holder is itself waiting for something `subject` holds.
    fn begin_wait(
        &self,
        subject: &str,
        resource: &str,
        holder: Option<&str>,
        indefinite: bool,
    ) -> Result<(), LockError>;

    fn wait_succeeded(&self, grain: &Grain);

    fn wait_abandoned(&self, subject: &str, resource: &str);

    fn released(&self, grain: &Grain);

    /// Snapshot of a subject's context, if one is tracked.
    fn context(&self, subject: &str) -> Option<SubjectContext>;

    fn clear(&self);
}

/// Detection turned off: every call is a no-op.
#[derive(Debug, Default)]
pub struct NoDetection;

impl DeadlockDetector for NoDetection {
    fn is_enabled(&self) -> bool {
        false
    }

    fn begin_wait(&self, _: &str, _: &str, _: Option<&str>, _: bool) -> Result<(), LockError> {
        Ok(())
    }

    fn wait_succeeded(&self, _: &Grain) {}

    fn wait_abandoned(&self, _: &str, _: &str) {}

    fn released(&self, _: &Grain) {}

    fn context(&self, _: &str) -> Option<SubjectContext> {
        None
    }

    fn clear(&self) {}
}

/// Detection backed by one [`SubjectContext`] per active subject.
///
/// The cycle check and the registration of the new wait happen under one
/// lock, so two subjects racing into each other's resources cannot both slip
/// past the check.
#[derive(Debug, Default)]
pub struct SubjectRegistry {
    contexts: Mutex<HashMap<String, SubjectContext>>,
}

impl SubjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    fn update(&self, subject: &str, apply: impl FnOnce(&mut SubjectContext)) {
        let mut contexts = self.contexts.lock();
        if let Some(context) = contexts.get_mut(subject) {
            apply(context);
            if context.is_idle() {
                contexts.remove(subject);
            }
        }
    }
}

impl DeadlockDetector for SubjectRegistry {
    fn is_enabled(&self) -> bool {
        true
    }

    fn begin_wait(
        &self,
        subject: &str,
        resource: &str,
        holder: Option<&str>,
        indefinite: bool,
    ) -> Result<(), LockError> {
        let mut contexts = self.contexts.lock();

        if indefinite
            && let Some(holder) = holder.filter(|holder| *holder != subject)
            && let (Some(peer), Some(own)) = (contexts.get(holder), contexts.get(subject))
            && peer.is_waiting_on(own)
        {
            warn!(subject, resource, holder, "refusing wait that would deadlock");
            return Err(LockError::PossibleDeadlock {
                subject: subject.to_string(),
                resource: resource.to_string(),
                holder: holder.to_string(),
            });
        }

        contexts
            .entry(subject.to_string())
            .or_insert_with(|| SubjectContext::new(subject))
            .begin_wait(resource);
        Ok(())
    }

    fn wait_succeeded(&self, grain: &Grain) {
        self.contexts
            .lock()
            .entry(grain.subject().to_string())
            .or_insert_with(|| SubjectContext::new(grain.subject()))
            .wait_succeeded(grain);
    }

    fn wait_abandoned(&self, subject: &str, resource: &str) {
        self.update(subject, |context| context.wait_abandoned(resource));
    }

    fn released(&self, grain: &Grain) {
        self.update(grain.subject(), |context| context.released(grain));
    }

    fn context(&self, subject: &str) -> Option<SubjectContext> {
        self.contexts.lock().get(subject).cloned()
    }

    fn clear(&self) {
        self.contexts.lock().clear();
    }
}
