//! Signed, time-bounded bearer tokens.
//!
//! Tokens are HS256 JWTs carrying a subject id and a display name. The
//! verifier is a pure function of the token, the process-wide secret and the
//! current Unix time: signature first, expiry second, with no leeway.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity claims embedded in a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identifier (the user id, as a string).
    pub sub: String,
    /// Display name shown as the prefix of relayed messages.
    pub username: String,
    /// Issued-at, Unix seconds.
    pub iat: u64,
    /// Expiry, Unix seconds. The token is invalid from this instant on.
    pub exp: u64,
}

/// Why a token failed verification.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Not a well-formed signed token (includes the empty string).
    #[error("malformed token")]
    Malformed,
    /// Signature valid, but the validity window has passed.
    #[error("token expired")]
    Expired,
    /// Signature does not match the server secret.
    #[error("bad token signature")]
    BadSignature,
}

impl InvalidReason {
    /// Short label used for metrics and structured logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Expired => "expired",
            Self::BadSignature => "bad_signature",
        }
    }
}

/// Token signing failed.
#[derive(Error, Debug)]
#[error("failed to sign token: {0}")]
pub struct IssueError(#[from] jsonwebtoken::errors::Error);

/// Signing and verification keys derived from the process-wide secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys").finish_non_exhaustive()
    }
}

impl TokenKeys {
    /// Build keys from raw secret bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_common::token::TokenKeys;
    ///
    /// let keys = TokenKeys::new(b"example-secret");
    /// let token = keys.issue("1", "maxcarrion31", 900).unwrap();
    /// let claims = keys.verify(&token).unwrap();
    /// assert_eq!(claims.username, "maxcarrion31");
    /// ```
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against an explicit clock in `verify_at`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a token for `sub`/`username` valid for `ttl_secs` from now.
    ///
    /// # Errors
    ///
    /// Returns [`IssueError`] if the claims cannot be encoded.
    pub fn issue(&self, sub: &str, username: &str, ttl_secs: u64) -> Result<String, IssueError> {
        self.issue_at(sub, username, ttl_secs, unix_now())
    }

    /// Sign a token as if issued at Unix time `now`.
    ///
    /// # Errors
    ///
    /// Returns [`IssueError`] if the claims cannot be encoded.
    pub fn issue_at(
        &self,
        sub: &str,
        username: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<String, IssueError> {
        let claims = Claims {
            sub: sub.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now.saturating_add(ttl_secs),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding,
        )?)
    }

    /// Verify `token` against the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns the [`InvalidReason`] the token was rejected for.
    pub fn verify(&self, token: &str) -> Result<Claims, InvalidReason> {
        self.verify_at(token, unix_now())
    }

    /// Verify `token` as of Unix time `now`.
    ///
    /// # Errors
    ///
    /// Returns the [`InvalidReason`] the token was rejected for.
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Claims, InvalidReason> {
        if token.is_empty() {
            return Err(InvalidReason::Malformed);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| classify(e.kind()))?;
        if now >= data.claims.exp {
            return Err(InvalidReason::Expired);
        }
        Ok(data.claims)
    }
}

fn classify(kind: &ErrorKind) -> InvalidReason {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => InvalidReason::BadSignature,
        ErrorKind::ExpiredSignature => InvalidReason::Expired,
        _ => InvalidReason::Malformed,
    }
}

/// Returns the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
