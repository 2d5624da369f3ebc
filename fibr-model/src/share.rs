use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public link granting access to a path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub root_name: String,
    #[serde(default)]
    pub edit: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub file: bool,
    pub creation: DateTime<Utc>,
    /// Lifetime of the share, zero meaning forever.
    #[serde(default, with = "duration_secs")]
    pub duration: Duration,
}

impl Share {
    /// Mirror message announcing the removal of `id`.
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: String::new(),
            root_name: String::new(),
            edit: false,
            password: String::new(),
            file: false,
            creation: DateTime::UNIX_EPOCH,
            duration: Duration::ZERO,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.creation == DateTime::UNIX_EPOCH
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.duration.is_zero() {
            return false;
        }
        // Lifetimes past the representable range never end.
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|duration| self.creation.checked_add_signed(duration))
            .is_some_and(|end| now > end)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(duration: Duration) -> Share {
        Share {
            id: "abcd1234".into(),
            path: "/site".into(),
            root_name: "site".into(),
            edit: false,
            password: String::new(),
            file: false,
            creation: Utc::now(),
            duration,
        }
    }

    #[test]
    fn zero_duration_never_expires() {
        let s = share(Duration::ZERO);
        assert!(!s.is_expired(Utc::now() + chrono::Duration::days(3650)));
    }

    #[test]
    fn expires_after_duration() {
        let s = share(Duration::from_secs(3600));
        assert!(!s.is_expired(s.creation + chrono::Duration::minutes(59)));
        assert!(s.is_expired(s.creation + chrono::Duration::minutes(61)));
    }

    #[test]
    fn huge_duration_never_expires() {
        let s = share(Duration::from_secs(10_000_000_000_000));
        assert!(!s.is_expired(Utc::now()));
        assert!(!s.is_expired(Utc::now() + chrono::Duration::days(365_000)));
    }

    #[test]
    fn tombstone_is_recognised() {
        assert!(Share::tombstone("x").is_tombstone());
        assert!(!share(Duration::ZERO).is_tombstone());
    }
}
