use chat_common::token::{Claims, InvalidReason, TokenKeys};
use chat_common::wire::TOKEN_QUERY_PARAM;

/// A connection attempt that passed the token check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    /// Raw token string; becomes the registry key.
    pub key: String,
    /// Claims decoded from the token.
    pub claims: Claims,
}

/// Pull the `token` query parameter out of an upgrade request's query string.
///
/// A missing query or parameter yields the empty string, which the verifier
/// rejects as malformed.
pub fn extract_token(query: Option<&str>) -> String {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(name, _)| name == TOKEN_QUERY_PARAM)
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default()
}

/// Gate a connection attempt on the token carried in its query string.
pub fn admit(keys: &TokenKeys, query: Option<&str>) -> Result<Admitted, InvalidReason> {
    let key = extract_token(query);
    let claims = keys.verify(&key)?;
    Ok(Admitted { key, claims })
}
