//! The credential payload submitted to an application's token endpoint

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A deterministic, keyed representation of a username/password pair
///
/// The plaintext password is fingerprinted under the application secret at
/// construction time and never retained. Serialization uses a stable field
/// order, so byte-equality of two serialized payloads is payload equality;
/// that property is what lets previously supplied credentials be verified
/// against the cache without a live round trip to the authority.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
    user: String,
    password_hash: String,
    hospital_code: String,
}

impl CredentialPayload {
    /// Builds a payload for the given credentials under `secret`
    pub fn new(username: &str, password: &str, secret: &str, hospital_code: &str) -> Self {
        Self {
            user: username.to_owned(),
            password_hash: fingerprint(password, secret),
            hospital_code: hospital_code.to_owned(),
        }
    }

    /// The identity the payload was built for
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The tenant code the payload carries
    pub fn hospital_code(&self) -> &str {
        &self.hospital_code
    }
}

impl fmt::Debug for CredentialPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPayload")
            .field("user", &self.user)
            .field("password_hash", &"***FINGERPRINT***")
            .field("hospital_code", &self.hospital_code)
            .finish()
    }
}

/// Hex-encoded HMAC-SHA256 of the password under the application secret
fn fingerprint(password: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(password.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
