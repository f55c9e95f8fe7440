use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A granted lease on a named resource.
///
/// A `Grain` is an immutable receipt: once issued its fields never change, and
/// every new lease gets a new `Grain` with a fresh identifier. Two grains are
/// equal when their identifiers are equal.
///
/// The distinguished [`Grain::empty`] value stands for "no lease" and is what
/// a lock request returns when it could not be satisfied in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grain {
    id: String,
    subject: String,
    resource: String,
    granted_at: SystemTime,
    duration: Duration,
}

impl Grain {
    /// Rebuilds a grain from its parts, e.g. after decoding it from the wire.
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        resource: impl Into<String>,
        granted_at: SystemTime,
        duration: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            resource: resource.into(),
            granted_at,
            duration,
        }
    }

    /// Issues a brand new grain for `subject` on `resource`, stamped now.
    ///
    /// Identifiers have the shape `<unix-micros>:<resource>/<random hex>` so
    /// they are unique across the process and still readable in logs.
    pub fn issue(subject: &str, resource: &str, duration: Duration) -> Self {
        let granted_at = SystemTime::now();
        let micros = granted_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        let suffix: u128 = rand::random();

        Self {
            id: format!("{micros}:{resource}/{suffix:032x}"),
            subject: subject.to_string(),
            resource: resource.to_string(),
            granted_at,
            duration,
        }
    }

    /// The "no lease" grain.
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            subject: String::new(),
            resource: String::new(),
            granted_at: UNIX_EPOCH,
            duration: Duration::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn granted_at(&self) -> SystemTime {
        self.granted_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// How long the lease has been held so far.
    ///
    /// A clock that stepped backwards reports zero rather than failing.
    pub fn held_for(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.granted_at)
            .unwrap_or_default()
    }

    /// Time left before the lease runs out, zero once it has.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.held_for())
    }

    pub fn is_expired(&self) -> bool {
        !self.is_empty() && self.held_for() >= self.duration
    }

    /// True once the lease has been overdue for at least `minimum`.
    pub fn has_expired_by(&self, minimum: Duration) -> bool {
        let held = self.held_for();
        if held < self.duration {
            return false;
        }
        held - self.duration >= minimum
    }
}

impl PartialEq for Grain {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Grain {}

impl Hash for Grain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Default for Grain {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Grain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grain:{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_issue_is_unique() {
        let a = Grain::issue("alice", "A", Duration::from_secs(1));
        let b = Grain::issue("alice", "A", Duration::from_secs(1));

        assert_ne!(a, b);
        assert!(a.id().contains(":A/"));
        assert_eq!(a.subject(), "alice");
        assert_eq!(a.resource(), "A");
    }

    #[test]
    fn test_equality_is_by_id() {
        let issued = Grain::issue("alice", "A", Duration::from_secs(5));
        let copy = Grain::new(
            issued.id(),
            "someone-else",
            "B",
            UNIX_EPOCH,
            Duration::ZERO,
        );

        assert_eq!(issued, copy);

        let mut set = HashSet::new();
        set.insert(issued);
        assert!(set.contains(&copy));
    }

    #[test]
    fn test_empty_grain() {
        let empty = Grain::empty();
        assert!(empty.is_empty());
        assert!(!empty.is_expired());
        assert_eq!(empty, Grain::default());
        assert_eq!(empty.to_string(), "Grain:");
    }

    #[test]
    fn test_expiry() {
        let grain = Grain::issue("alice", "A", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));

        assert!(grain.is_expired());
        assert_eq!(grain.remaining(), Duration::ZERO);
        assert!(grain.has_expired_by(Duration::from_millis(1)));
        assert!(!grain.has_expired_by(Duration::from_secs(60)));

        let fresh = Grain::issue("alice", "A", Duration::from_secs(60));
        assert!(!fresh.is_expired());
        assert!(!fresh.has_expired_by(Duration::ZERO));
        assert!(fresh.remaining() > Duration::from_secs(50));
    }

    #[test]
    fn test_serde_keeps_identity() {
        let grain = Grain::issue("alice", "A", Duration::from_secs(3));
        let json = serde_json::to_string(&grain).unwrap();
        let back: Grain = serde_json::from_str(&json).unwrap();

        assert_eq!(back, grain);
        assert_eq!(back.duration(), Duration::from_secs(3));
        assert_eq!(back.granted_at(), grain.granted_at());
    }
}
