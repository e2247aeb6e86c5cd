//! Cache-aside management of short-lived bearer tokens
//!
//! The proxy authenticates to several upstream services with short-lived
//! bearer tokens issued by per-application token endpoints. This crate owns
//! the token lifecycle: reading a cached token, acquiring a fresh one from
//! the application's authority when the cache is cold or a refresh is forced,
//! decoding the token's embedded expiry claim, and storing it back with a
//! safety margin so an about-to-expire token is never served.
//!
//! Credentials are never cached in clear. A [`CredentialPayload`] carries a
//! keyed fingerprint of the password under the application's secret, and the
//! serialized payload that most recently obtained a token is kept alongside
//! the token so that later refreshes (and credential checks) can proceed
//! without the caller re-supplying a password.
//!
//! # Concurrency
//!
//! There is deliberately no mutual exclusion around a refresh. Concurrent
//! callers racing on a cold cache may each request a token from the authority
//! and each write wins the cache in turn; both writers hold semantically valid
//! credentials, so last-write-wins is an accepted outcome rather than a bug.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod claims;
mod manager;
mod payload;
mod registry;

use thiserror::Error;

pub use claims::InvalidTokenError;
pub use manager::{TokenManager, TokenOptions};
pub use payload::CredentialPayload;
pub use registry::{AppCredentials, AppRegistry};

/// An error while obtaining or verifying a token
#[derive(Debug, Error)]
pub enum TokenError {
    /// A cache operation failed
    #[error("cache operation failed")]
    Cache(#[from] mophgate_cache::CacheError),
    /// The application label is not in the registry
    #[error("unsupported application {0:?}")]
    UnsupportedApp(String),
    /// No credentials were supplied and none were previously cached
    #[error("no cached credentials available for {app}")]
    NoCredentials {
        /// The application the credentials were needed for
        app: String,
    },
    /// The cached credential payload could not be decoded
    #[error("error decoding cached credential payload")]
    PayloadDecode(#[source] serde_json::Error),
    /// The credential payload could not be serialized
    #[error("error serializing credential payload")]
    PayloadEncode(#[source] serde_json::Error),
    /// The HTTP client for token endpoints could not be constructed
    #[error("error building token endpoint HTTP client")]
    ClientBuild(#[source] reqwest::Error),
    /// The request to the token endpoint could not be sent
    #[error("error sending request to token endpoint")]
    RequestSend(#[source] reqwest::Error),
    /// The token endpoint response body could not be read
    #[error("error reading token endpoint response")]
    BodyRead(#[source] reqwest::Error),
    /// The token endpoint answered with a non-success status
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint {
        /// The status the endpoint answered with
        status: reqwest::StatusCode,
        /// The trimmed response body, for diagnostics
        body: String,
    },
    /// The token endpoint answered success with an empty body
    #[error("received an empty token from the token endpoint")]
    EmptyToken,
    /// The issued token's expiry claim could not be read
    #[error("received a malformed token")]
    InvalidToken(#[from] InvalidTokenError),
}
