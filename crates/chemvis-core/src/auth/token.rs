//! Decoding of access-token claims.
//!
//! Tokens are decoded without verifying the signature. The server is the
//! authority on validity; the client only needs the expiry to decide which
//! view to show and whether a session is worth resuming.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a stored access token could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedCredential {
    #[error("token is not a JWT")]
    Structure,

    #[error("token is not valid base64url: {0}")]
    Encoding(String),

    #[error("token payload is not a claims object: {0}")]
    Claims(String),

    #[error("token expiry {0} is out of range")]
    ExpiryOutOfRange(i64),
}

impl From<jsonwebtoken::errors::Error> for MalformedCredential {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidToken => MalformedCredential::Structure,
            ErrorKind::Base64(_) => MalformedCredential::Encoding(e.to_string()),
            _ => MalformedCredential::Claims(e.to_string()),
        }
    }
}

/// User identifier claim. The server may encode it as a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Expiry as seconds since the Unix epoch
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl AccessClaims {
    pub fn expires_at(&self) -> Result<DateTime<Utc>, MalformedCredential> {
        DateTime::from_timestamp(self.exp, 0).ok_or(MalformedCredential::ExpiryOutOfRange(self.exp))
    }
}

/// Validation that only parses: no signature, expiry or audience checks.
fn unverified() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    // Presence of `exp` is enforced by `AccessClaims` itself
    validation.required_spec_claims.clear();
    validation
}

/// Decode the claims of a JWT without checking its signature.
pub fn decode_claims(token: &str) -> Result<AccessClaims, MalformedCredential> {
    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &unverified())?;
    Ok(data.claims)
}

/// Build a token with the given claims, signed with a throwaway key, for tests.
#[cfg(test)]
pub(crate) fn mint_token(claims: serde_json::Value) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
}

/// Build an access token expiring `secs_from_now` seconds from now, for tests.
#[cfg(test)]
pub(crate) fn mint_access_token(secs_from_now: i64) -> String {
    let now = Utc::now().timestamp();
    mint_token(serde_json::json!({
        "token_type": "access",
        "exp": now + secs_from_now,
        "iat": now,
        "jti": format!("jti-{}", secs_from_now),
        "user_id": 7,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Swap the payload segment of a well-formed token
    fn with_payload(payload: &str) -> String {
        let token = mint_token(json!({"exp": 1}));
        let mut segments: Vec<&str> = token.split('.').collect();
        segments[1] = payload;
        segments.join(".")
    }

    #[test]
    fn test_decode_claims() {
        let token = mint_token(json!({
            "token_type": "access",
            "exp": 1_900_000_000,
            "iat": 1_899_999_700,
            "jti": "abc",
            "user_id": 42,
        }));

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.exp, 1_900_000_000);
        assert_eq!(claims.iat, Some(1_899_999_700));
        assert_eq!(claims.user_id, Some(UserId::Number(42)));
        assert_eq!(claims.token_type.as_deref(), Some("access"));
        assert_eq!(claims.expires_at().unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_decode_string_user_id() {
        let token = mint_token(json!({"exp": 1_900_000_000, "user_id": "u-1"}));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.user_id, Some(UserId::Text("u-1".to_string())));
        assert_eq!(claims.user_id.unwrap().to_string(), "u-1");
    }

    #[test]
    fn test_signature_and_expiry_are_not_checked() {
        let token = mint_token(json!({"exp": 10, "aud": "someone-else"}));
        let (unsigned, _) = token.rsplit_once('.').unwrap();
        let forged = format!("{}.bm90LWEtc2lnbmF0dXJl", unsigned);

        assert_eq!(decode_claims(&token).unwrap().exp, 10);
        assert_eq!(decode_claims(&forged).unwrap().exp, 10);
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(decode_claims(""), Err(MalformedCredential::Structure));
        assert_eq!(decode_claims("not-a-jwt"), Err(MalformedCredential::Structure));
        assert!(decode_claims("a.b.c.d").is_err());
        assert!(matches!(
            decode_claims(&with_payload("!!!")),
            Err(MalformedCredential::Encoding(_))
        ));

        // "hello" in base64url
        assert!(matches!(
            decode_claims(&with_payload("aGVsbG8")),
            Err(MalformedCredential::Claims(_))
        ));

        // Missing expiry claim
        let no_exp = mint_token(json!({"user_id": 1}));
        assert!(matches!(decode_claims(&no_exp), Err(MalformedCredential::Claims(_))));
    }

    #[test]
    fn test_expiry_out_of_range() {
        let token = mint_token(json!({"exp": i64::MAX}));
        assert_eq!(
            decode_claims(&token).unwrap().expires_at(),
            Err(MalformedCredential::ExpiryOutOfRange(i64::MAX))
        );
    }
}
