use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a lock request is willing to wait for its grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Timeout {
    /// Use the server's configured default wait.
    #[default]
    Default,
    /// Wait until granted. Required for deadlock detection to apply.
    Forever,
    /// Give up after the given period.
    Within(Duration),
}

impl Timeout {
    /// Interprets a millisecond count the way wire clients express it:
    /// negative waits forever, zero means "server default".
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => Timeout::Forever,
            0 => Timeout::Default,
            m => Timeout::Within(Duration::from_millis(m as u64)),
        }
    }

    /// Inverse of [`Timeout::from_millis`], saturating at `i32::MAX`.
    pub fn as_millis(&self) -> i32 {
        match self {
            Timeout::Default => 0,
            Timeout::Forever => -1,
            Timeout::Within(d) => d.as_millis().clamp(1, i32::MAX as u128) as i32,
        }
    }

    /// Resolves to a concrete bound, `None` meaning indefinitely.
    pub fn resolve(&self, default: Duration) -> Option<Duration> {
        match self {
            Timeout::Default => Some(default),
            Timeout::Forever => None,
            Timeout::Within(d) => Some(*d),
        }
    }

    pub fn is_forever(&self) -> bool {
        matches!(self, Timeout::Forever)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::Within(d)
    }
}
