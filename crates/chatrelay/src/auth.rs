//! Credential issuance: username/password lookup producing a signed token.

use crate::metrics::counters;
use chat_common::token::TokenKeys;
use chat_common::wire::{NO_MATCHING_CREDENTIALS, UNKNOWN_USER};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// One account known to the issuance endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserRecord {
    /// Login name; also the display name embedded in issued tokens.
    pub username: String,
    /// Plaintext password.
    pub password: String,
    /// Numeric user id; becomes the token subject.
    pub user_id: u64,
    /// Free-form profile text served by `/userInfo`.
    pub user_info: String,
}

/// In-memory account table.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: Vec<UserRecord>,
}

impl Default for UserDirectory {
    /// The three lab accounts.
    fn default() -> Self {
        let user = |username: &str, password: &str, user_id: u64| UserRecord {
            username: username.to_string(),
            password: password.to_string(),
            user_id,
            user_info: format!("I am {username}."),
        };
        Self {
            users: vec![
                user("maxcarrion31", "1234", 1),
                user("maxcarrion32", "1234", 2),
                user("userC", "passwordC", 3),
            ],
        }
    }
}

impl UserDirectory {
    /// Build a directory from explicit records.
    #[must_use]
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self { users }
    }

    /// Load a JSON array of [`UserRecord`]s.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let users: Vec<UserRecord> = serde_json::from_str(&data)?;
        if users.is_empty() {
            warn!("user directory {} is empty", path.display());
        }
        Ok(Self { users })
    }

    /// Find the account matching both `username` and `password`.
    #[must_use]
    pub fn authenticate(&self, username: &str, password: &str) -> Option<&UserRecord> {
        self.users
            .iter()
            .find(|u| u.username == username && u.password == password)
    }

    /// Find an account by id.
    #[must_use]
    pub fn by_id(&self, user_id: u64) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.user_id == user_id)
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if there are no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Issues tokens for directory accounts and answers user-info lookups.
///
/// Responses are plain text. Failures are reported in-band as text
/// containing `"Error"`, never as HTTP errors.
#[derive(Debug, Clone)]
pub struct Issuer {
    directory: UserDirectory,
    keys: TokenKeys,
    ttl_secs: u64,
}

impl Issuer {
    /// Create an issuer signing with `keys` for `ttl_secs`.
    #[must_use]
    pub fn new(directory: UserDirectory, keys: TokenKeys, ttl_secs: u64) -> Self {
        Self {
            directory,
            keys,
            ttl_secs,
        }
    }

    /// Token for a matching account, or the no-match diagnostic.
    #[must_use]
    pub fn fetch_user_token(&self, username: &str, password: &str) -> String {
        let Some(user) = self.directory.authenticate(username, password) else {
            counters::tokens_issued_total("rejected");
            debug!(username, "no matching credentials");
            return NO_MATCHING_CREDENTIALS.to_string();
        };
        match self
            .keys
            .issue(&user.user_id.to_string(), &user.username, self.ttl_secs)
        {
            Ok(token) => {
                counters::tokens_issued_total("issued");
                debug!(username, "issued token");
                token
            }
            Err(e) => {
                warn!("{}", e);
                format!("Error: {e}")
            }
        }
    }

    /// Profile text for the subject of `token`, or a diagnostic.
    #[must_use]
    pub fn fetch_user_info(&self, token: &str) -> String {
        let claims = match self.keys.verify(token) {
            Ok(claims) => claims,
            Err(reason) => return format!("Error: {reason}"),
        };
        claims
            .sub
            .parse::<u64>()
            .ok()
            .and_then(|id| self.directory.by_id(id))
            .map_or_else(|| UNKNOWN_USER.to_string(), |u| u.user_info.clone())
    }
}
