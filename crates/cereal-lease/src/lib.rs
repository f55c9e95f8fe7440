//! Lease engine for the Cereal lock server.
//!
//! [`Cereal`] is the entry point. Each resource identifier maps to a
//! [`Resource`] holding the current lease and a FIFO of waiting requests.
//! Granted leases are [`GrainComplex`]es that release themselves when their
//! duration runs out. A blocked caller sits on its own [`LockWait`] until a
//! resource hands it a lease or its timeout passes.

mod cereal;
mod complex;
mod config;
mod lock_wait;
mod resource;
mod subject;

pub use cereal::Cereal;
pub use cereal_core::{Grain, LockError, LockServer, Timeout};
pub use complex::{GrainComplex, ReleaseReason};
pub use config::{CerealConfig, CerealConfigBuilder};
pub use lock_wait::LockWait;
pub use resource::{Admission, Resource};
pub use subject::{DeadlockDetector, NoDetection, SubjectContext, SubjectRegistry};
