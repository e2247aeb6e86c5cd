//! Decoding the expiry claim embedded in an issued token
//!
//! Tokens are opaque to the proxy except for one detail: the middle of the
//! three dot-separated segments is base64url JSON carrying a numeric `exp`
//! claim, and the cache entry's lifetime is derived from it. The signature is
//! never verified here; the token arrived over a trusted channel and is only
//! being scheduled for eviction, not trusted for authorization.

use aliri_clock::UnixTime;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;

/// Failure to read the expiry claim embedded in a token
#[derive(Debug, Error)]
pub enum InvalidTokenError {
    /// The token does not have a claims segment
    #[error("token does not have the expected segmented structure")]
    MissingClaimsSegment,
    /// The claims segment is not valid base64url
    #[error("token claims segment is not valid base64url")]
    ClaimsEncoding(#[from] base64::DecodeError),
    /// The claims segment is not a JSON object of the expected shape
    #[error("token claims segment is not a valid JSON object")]
    ClaimsJson(#[from] serde_json::Error),
    /// The claims carry no `exp` field
    #[error("token claims are missing an exp claim")]
    MissingExpiry,
    /// The `exp` field is numeric but not a representable timestamp
    #[error("token exp claim is not a representable timestamp")]
    UnrepresentableExpiry,
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<ExpiryClaim>,
}

/// The wire may carry `exp` as an integer or as a float; both are accepted
/// and converted to whole seconds. Anything else fails the decode.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiryClaim {
    Seconds(u64),
    Fractional(f64),
}

/// Extracts the `exp` claim from a token's claims segment
pub(crate) fn token_expiry(token: &str) -> Result<UnixTime, InvalidTokenError> {
    let claims_segment = token
        .split('.')
        .nth(1)
        .ok_or(InvalidTokenError::MissingClaimsSegment)?;
    let decoded = URL_SAFE_NO_PAD.decode(claims_segment)?;
    let claims: Claims = serde_json::from_slice(&decoded)?;

    match claims.exp {
        Some(ExpiryClaim::Seconds(seconds)) => Ok(UnixTime(seconds)),
        Some(ExpiryClaim::Fractional(seconds)) if seconds.is_finite() => {
            // Saturating cast: a negative exp becomes the epoch, and the
            // caller's caching floor takes over from there.
            Ok(UnixTime(seconds as u64))
        }
        Some(ExpiryClaim::Fractional(_)) => Err(InvalidTokenError::UnrepresentableExpiry),
        None => Err(InvalidTokenError::MissingExpiry),
    }
}
