mod grain;
mod timeout;
mod traits;

pub use grain::Grain;
pub use timeout::Timeout;
pub use traits::{LockError, LockServer};
