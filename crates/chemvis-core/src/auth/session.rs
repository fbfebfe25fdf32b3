use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::token::{decode_claims, AccessClaims, MalformedCredential, UserId};
use super::CredentialStore;

/// Decoded view of the current access token.
///
/// Derived on demand from the stored token and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub claims: AccessClaims,
    pub expires_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn from_token(token: &str) -> Result<Self, MalformedCredential> {
        let claims = decode_claims(token)?;
        let expires_at = claims.expires_at()?;
        Ok(Self { claims, expires_at })
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.claims.user_id.as_ref()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

/// Whether the stored access token decodes and has not yet expired.
///
/// A malformed token counts as "not authenticated"; nothing is surfaced as an error.
pub fn is_authenticated(store: &CredentialStore) -> bool {
    is_authenticated_at(store, Utc::now())
}

pub fn is_authenticated_at(store: &CredentialStore, now: DateTime<Utc>) -> bool {
    let Some(token) = store.access() else {
        return false;
    };
    match SessionInfo::from_token(&token) {
        Ok(session) => !session.is_expired_at(now),
        Err(e) => {
            debug!(error = %e, "Stored access token is malformed");
            false
        }
    }
}

/// The decoded session for the stored access token, expired or not.
pub fn current_session(store: &CredentialStore) -> Option<SessionInfo> {
    store
        .access()
        .and_then(|token| SessionInfo::from_token(&token).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{mint_access_token, mint_token};
    use serde_json::json;

    #[test]
    fn test_no_token_is_not_authenticated() {
        let store = CredentialStore::in_memory();
        assert!(!is_authenticated(&store));
    }

    #[test]
    fn test_expired_token_is_not_authenticated() {
        let store = CredentialStore::in_memory();
        store.set_access(&mint_access_token(-1)).unwrap();
        assert!(!is_authenticated(&store));
    }

    #[test]
    fn test_fresh_token_is_authenticated() {
        let store = CredentialStore::in_memory();
        store.set_access(&mint_access_token(300)).unwrap();
        assert!(is_authenticated(&store));
    }

    #[test]
    fn test_expiry_must_be_strictly_in_future() {
        let store = CredentialStore::in_memory();
        store.set_access(&mint_token(json!({"exp": 1_800_000_000}))).unwrap();

        let at_expiry = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        assert!(!is_authenticated_at(&store, at_expiry));
        assert!(is_authenticated_at(&store, at_expiry - Duration::seconds(1)));
        assert!(!is_authenticated_at(&store, at_expiry + Duration::milliseconds(1)));
    }

    #[test]
    fn test_malformed_token_is_not_authenticated() {
        let store = CredentialStore::in_memory();
        for bad in ["garbage", "a.b", "a.%%%.c", "e30.e30.sig"] {
            store.set_access(bad).unwrap();
            assert!(!is_authenticated(&store), "token {:?} should be rejected", bad);
            assert_eq!(current_session(&store), None);
        }
    }

    #[test]
    fn test_session_info_minutes_until_expiry() {
        let session = SessionInfo::from_token(&mint_access_token(30 * 60 + 30)).unwrap();
        assert_eq!(session.minutes_until_expiry(), 30);
        assert_eq!(session.user_id(), Some(&UserId::Number(7)));

        let expired = SessionInfo::from_token(&mint_access_token(-120)).unwrap();
        assert!(expired.is_expired());
        assert_eq!(expired.minutes_until_expiry(), 0);
    }
}
