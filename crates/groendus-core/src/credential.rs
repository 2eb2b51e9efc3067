//! Short-lived bearer credentials and the clock used to age them.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

/// How long before expiry a credential is treated as stale.
pub const REFRESH_MARGIN: Duration = Duration::seconds(60);

/// Token lifetime assumed when the identity provider omits `ExpiresIn`.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// A token set issued by the identity provider.
///
/// Credentials are never mutated; a refresh replaces the whole value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    id_token: String,
    access_token: String,
    refresh_token: Option<String>,
    issued_at: OffsetDateTime,
    ttl_seconds: u64,
}

impl Credential {
    /// Create a credential issued at `issued_at`, valid for `ttl_seconds`.
    pub fn new(
        id_token: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        issued_at: OffsetDateTime,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: access_token.into(),
            refresh_token,
            issued_at,
            ttl_seconds,
        }
    }

    /// The identity token sent in the `Authorization` header.
    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// When the credential stops being accepted.
    pub fn expires_at(&self) -> OffsetDateTime {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        self.issued_at.saturating_add(Duration::seconds(ttl))
    }

    /// Whether the credential is expired or within [`REFRESH_MARGIN`] of it.
    pub fn needs_refresh(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at().saturating_sub(REFRESH_MARGIN)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id_token", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("issued_at", &self.issued_at)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

/// Source of the current time.
///
/// Injected into the client and auth session so tests can age credentials
/// without sleeping.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> OffsetDateTime {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn credential(ttl: u64) -> Credential {
        Credential::new(
            "id",
            "access",
            None,
            datetime!(2024-03-01 10:00:00 UTC),
            ttl,
        )
    }

    #[test]
    fn test_expiry_window() {
        let cred = credential(3600);
        let issued = cred.issued_at();

        assert_eq!(cred.expires_at(), datetime!(2024-03-01 11:00:00 UTC));
        assert!(!cred.needs_refresh(issued));
        assert!(!cred.needs_refresh(issued + Duration::seconds(3539)));
        assert!(cred.needs_refresh(issued + Duration::seconds(3540)));
    }

    #[test]
    fn test_short_ttl_is_always_stale() {
        let cred = credential(30);
        assert!(cred.needs_refresh(cred.issued_at()));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = Credential::new(
            "eyJ.secret.id",
            "eyJ.secret.access",
            Some("refresh".into()),
            OffsetDateTime::UNIX_EPOCH,
            3600,
        );
        let debug = format!("{cred:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("has_refresh_token: true"));
    }
}
