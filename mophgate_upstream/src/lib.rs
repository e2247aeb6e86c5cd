//! Token-injecting HTTP clients for the proxy's upstream services
//!
//! Each upstream service gets an [`UpstreamClient`] that resolves inbound
//! paths against the service's base URL, forwards the caller's headers
//! (except `Host`), and stamps the current bearer token onto every outbound
//! request. When the upstream answers `401 Unauthorized` the client forces a
//! token refresh and retries exactly once; every other status, redirects
//! included, is relayed to the caller untouched.
//!
//! Unlike the cache layer, these clients keep a persistent keep-alive
//! connection pool per upstream: proxied calls are frequent and
//! latency-sensitive, so the dial cost is paid once.
//!
//! The [`UpstreamSet`] is the table behind endpoint selection: the outer
//! router reads `X-API-ENDPOINT` (or the `endpoint` query parameter), strips
//! it, and looks the name up here, with an empty name falling back to the
//! default endpoint.

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

mod client;
mod set;

use thiserror::Error;

pub use client::{ProxyRequest, UpstreamClient};
pub use set::UpstreamSet;

/// An error while building or using an upstream client
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The endpoint name is not in the set
    #[error("unsupported endpoint {0:?}")]
    UnknownEndpoint(String),
    /// The configured base URL could not be parsed
    #[error("invalid upstream base URL {url:?}")]
    InvalidBaseUrl {
        /// The rejected URL text
        url: String,
        /// The parse failure
        #[source]
        source: url::ParseError,
    },
    /// The request path could not be resolved against the base URL
    #[error("invalid request path {path:?}")]
    InvalidPath {
        /// The rejected path
        path: String,
        /// The parse failure
        #[source]
        source: url::ParseError,
    },
    /// The upstream HTTP client could not be constructed
    #[error("error building upstream HTTP client")]
    ClientBuild(#[source] reqwest::Error),
    /// A token could not be obtained for the request
    #[error("token acquisition failed")]
    Token(#[from] mophgate_tokens::TokenError),
    /// The token is not representable as a header value
    #[error("bearer token is not a valid header value")]
    BearerValue(#[source] reqwest::header::InvalidHeaderValue),
    /// The request could not be sent upstream
    #[error("error sending request upstream")]
    Send(#[source] reqwest::Error),
}
