//! Text wire format and protocol constants.
//!
//! Relayed chat lines are plain text `"<displayName>: <payload>"`. Server
//! diagnostics are plain text containing [`ERROR_MARKER`]; clients tell the
//! two apart by that substring alone.

use serde::{Deserialize, Serialize};

/// Path the relay accepts WebSocket upgrades on.
pub const RELAY_PATH: &str = "/ws";

/// Query parameter carrying the bearer token on the upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Default token lifetime handed out by the issuance endpoint (15 minutes).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 900;

/// Substring that marks a server message as a diagnostic rather than chat.
pub const ERROR_MARKER: &str = "Error";

/// Sent once to a recipient whose token failed re-verification, before close.
pub const TOKEN_INVALID_DIAGNOSTIC: &str =
    "Error: Your token is no longer valid. Please reauthenticate.";

/// Returned by the issuance endpoint when no user matches.
pub const NO_MATCHING_CREDENTIALS: &str = "Error: No matching user credentials found.";

/// Returned by the user-info endpoint when the user id is unknown.
pub const UNKNOWN_USER: &str = "Error: Unable to fulfill the request.";

/// Format a relayed chat line.
///
/// # Examples
///
/// ```
/// assert_eq!(
///     chat_common::wire::relayed_line("maxcarrion31", "hello"),
///     "maxcarrion31: hello"
/// );
/// ```
#[must_use]
pub fn relayed_line(display_name: &str, payload: &str) -> String {
    let mut line = String::with_capacity(display_name.len() + 2 + payload.len());
    line.push_str(display_name);
    line.push_str(": ");
    line.push_str(payload);
    line
}

/// Split a relayed line back into `(display_name, payload)`.
///
/// Splits on the first `": "`, so payloads may themselves contain it.
#[must_use]
pub fn split_relayed_line(line: &str) -> Option<(&str, &str)> {
    line.split_once(": ")
}

/// Returns `true` if `text` is a server diagnostic (or an issuance failure).
#[must_use]
pub fn is_diagnostic(text: &str) -> bool {
    text.contains(ERROR_MARKER)
}

/// JSON envelope sent by the richer open-chat client.
///
/// The relay never parses this; in open mode it forwards payloads verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    /// Message body.
    pub message: String,
    /// Self-declared sender name.
    pub username: String,
    /// Client-side timestamp, free-form.
    pub timestamp: String,
}

impl ChatEnvelope {
    /// Serialize to the JSON text carried in a WebSocket text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        // A struct of plain strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse an envelope from a text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if `text` is not a valid envelope.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
