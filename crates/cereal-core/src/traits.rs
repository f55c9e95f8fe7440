use crate::{Grain, Timeout};
use std::time::Duration;
use thiserror::Error;

/// The boundary every lock server front end talks to.
///
/// Implementations are shared between many threads, each acting for some
/// subject, so every method takes `&self`.
pub trait LockServer: Send + Sync {
    /// Request an exclusive lease on `resource` for `duration`.
    ///
    /// # Arguments
    /// * `subject` - The caller requesting the lease.
    /// * `resource` - Identifier of the resource to lock.
    /// * `duration` - How long the lease lasts before it expires on its own.
    ///   Zero asks for the server's default lease duration.
    /// * `timeout` - How long to wait for a grant.
    ///
    /// # Returns
    /// * `Ok(grain)` with the granted lease, or [`Grain::empty`] if the wait
    ///   timed out.
    /// * `Err(LockError)` if waiting would deadlock or the server is gone.
    fn lock(
        &self,
        subject: &str,
        resource: &str,
        duration: Duration,
        timeout: Timeout,
    ) -> Result<Grain, LockError>;

    /// Give a lease back. Unknown, expired and already released grains are
    /// ignored.
    fn release(&self, grain: &Grain) -> Result<(), LockError>;

    /// Reclaim bookkeeping for resources nobody has touched in a while.
    /// Returns how many resources were reclaimed.
    fn optimize(&self) -> Result<usize, LockError>;

    /// Whether [`LockError::PossibleDeadlock`] can ever be returned.
    fn has_deadlock_detection(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Waiting would close a cycle between two subjects.
    #[error(
        "possible deadlock: {subject} waits for {resource} held by {holder}, which waits for a resource {subject} holds"
    )]
    PossibleDeadlock {
        subject: String,
        resource: String,
        holder: String,
    },

    /// The server was shut down.
    #[error("{system} has been shut down")]
    Disposed { system: String },
}
