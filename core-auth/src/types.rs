use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The access/refresh token pair plus its expiry bookkeeping.
///
/// All timestamps are Unix epoch milliseconds. A record is created on a
/// successful code exchange and replaced wholesale on every refresh.
///
/// The `Debug` implementation never prints token values.
///
/// # Examples
///
/// ```
/// use core_auth::CredentialRecord;
/// use std::time::Duration;
///
/// let now = 1_700_000_000_000;
/// let record = CredentialRecord::issued("access", "refresh", 3600, now);
///
/// assert_eq!(record.expires_at, now + 3_600_000);
/// assert!(!record.needs_refresh(now, Duration::from_secs(600)));
/// assert!(record.needs_refresh(now + 3_000_001, Duration::from_secs(600)));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub obtained_at: i64,
}

impl CredentialRecord {
    /// Build a record from a token endpoint response received at `now_ms`.
    pub fn issued(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: now_ms.saturating_add(expires_in_secs.saturating_mul(1000)),
            obtained_at: now_ms,
        }
    }

    /// The record that replaces `self` after a refresh.
    ///
    /// The refresh token is kept unless the endpoint issued a new one.
    pub fn refreshed(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: i64,
        now_ms: i64,
    ) -> Self {
        Self::issued(
            access_token,
            refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
            expires_in_secs,
            now_ms,
        )
    }

    /// True once `now_ms` is within `margin` of expiry.
    pub fn needs_refresh(&self, now_ms: i64, margin: Duration) -> bool {
        let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
        now_ms >= self.expires_at.saturating_sub(margin_ms)
    }

    /// Milliseconds until expiry, zero once expired.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.expires_at.saturating_sub(now_ms).max(0)
    }

    /// Structural validity: both tokens present and `expires_at > obtained_at`.
    pub fn is_well_formed(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && self.expires_at > self.obtained_at
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Credential lifecycle state.
///
/// ```text
/// Unauthenticated ──exchange──> Authenticated ──margin──> RefreshPending
///        ^                           ^                         │
///        │                           └────────success──────────┤
///        └──────────── failure / disconnect ───────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
    RefreshPending,
}

impl AuthState {
    /// True while a credential exists, including during a refresh.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::RefreshPending)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "Unauthenticated"),
            AuthState::Authenticated => write!(f, "Authenticated"),
            AuthState::RefreshPending => write!(f, "Refreshing Token..."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_refresh_margin_boundary() {
        let record = CredentialRecord::issued("a", "r", 3600, NOW);
        let margin = Duration::from_secs(600);

        // 50 minutes left
        assert!(!record.needs_refresh(NOW + 600_000, margin));
        // exactly 10 minutes left
        assert!(record.needs_refresh(record.expires_at - 600_000, margin));
        // one minute left
        assert!(record.needs_refresh(record.expires_at - 60_000, margin));
    }

    #[test]
    fn test_refreshed_keeps_refresh_token_when_absent() {
        let record = CredentialRecord::issued("a1", "r1", 3600, NOW);

        let kept = record.refreshed("a2", None, 3600, NOW + 1000);
        assert_eq!(kept.refresh_token, "r1");
        assert_eq!(kept.access_token, "a2");
        assert_eq!(kept.expires_at, NOW + 1000 + 3_600_000);
        assert_eq!(kept.obtained_at, NOW + 1000);

        let rotated = record.refreshed("a3", Some("r2".to_string()), 1800, NOW);
        assert_eq!(rotated.refresh_token, "r2");
    }

    #[test]
    fn test_well_formed() {
        assert!(CredentialRecord::issued("a", "r", 1, NOW).is_well_formed());
        assert!(!CredentialRecord::issued("a", "r", 0, NOW).is_well_formed());
        assert!(!CredentialRecord::issued("", "r", 60, NOW).is_well_formed());
    }

    #[test]
    fn test_issued_saturates_huge_lifetime() {
        let record = CredentialRecord::issued("a", "r", i64::MAX / 1000, NOW);
        assert_eq!(record.expires_at, i64::MAX);
        assert_eq!(record.remaining_ms(i64::MIN), i64::MAX);
    }

    #[test]
    fn test_debug_hides_tokens() {
        let record = CredentialRecord::issued("BQDaccess", "AQBrefresh", 3600, NOW);
        let debug = format!("{:?}", record);

        assert!(!debug.contains("BQDaccess"));
        assert!(!debug.contains("AQBrefresh"));
        assert!(debug.contains("expires_at"));
    }

    #[test]
    fn test_auth_state() {
        assert_eq!(AuthState::default(), AuthState::Unauthenticated);
        assert!(AuthState::RefreshPending.is_authenticated());
        assert!(!AuthState::Unauthenticated.is_authenticated());
    }
}
