//! Cereal: an embeddable resource lock server.
//!
//! Subjects ask for exclusive, self-expiring leases ([`Grain`]s) on named
//! resources. Contended requests wait in FIFO order, a subject may re-enter a
//! resource it already holds, and two subjects that would wait on each other
//! indefinitely can be refused up front.
//!
//! ```no_run
//! use cereal::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), CerealError> {
//! let cereal = Cereal::new(CerealConfig::builder().system("orders").build())?;
//! let grain = cereal.lock("worker-1", "order/42", Duration::from_secs(5), Timeout::Forever)?;
//! // ... exclusive work ...
//! cereal.release(&grain)?;
//! # Ok(())
//! # }
//! ```

pub use cereal_core as core;
pub use cereal_lease as lease;
#[cfg(feature = "wire")]
pub use cereal_wire as wire;

pub mod error;
pub mod telemetry;

pub use cereal_core::{Grain, LockError, LockServer, Timeout};
pub use cereal_lease::{Cereal, CerealConfig, CerealConfigBuilder};
pub use error::CerealError;

/// The handful of names almost every user needs.
pub mod prelude {
    pub use crate::CerealError;
    pub use cereal_core::{Grain, LockError, LockServer, Timeout};
    pub use cereal_lease::{Cereal, CerealConfig};
}
