//! A hand-rolled cache client speaking the RESP wire protocol over a socket
//!
//! The proxy keeps its bearer tokens and credential payloads in an external
//! key-value cache. Rather than pulling in a full client library, this crate
//! implements the five operations the proxy actually needs: `PING`, `GET`,
//! `SET`, `SETEX`, and `DEL`, plus `AUTH` when the server requires a password.
//!
//! Every operation dials a fresh connection, writes exactly one command, reads
//! exactly one reply, and drops the socket on every exit path. There is no
//! pooling and no retry: resource usage is bounded to one socket per in-flight
//! call, and retry policy belongs to the caller.
//!
//! The client distinguishes an absent key from an empty value: a `$-1` bulk
//! reply surfaces as `None`, never as `""`.

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

mod resp;

use std::time::Duration;

use aliri_clock::{Clock, System, UnixTime};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use resp::Reply;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// An error arising from a single cache operation
///
/// Transport failures, malformed replies, and errors reported by the cache
/// server itself are kept distinct so that callers can tell an unreachable
/// cache apart from one that rejected the command.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The connection could not be established before the dial timeout
    #[error("timed out connecting to cache at {0}")]
    ConnectTimeout(String),
    /// The underlying socket failed
    #[error("cache transport error")]
    Io(#[from] std::io::Error),
    /// The cache server replied with an error
    #[error("cache server error: {0}")]
    Server(String),
    /// The reply did not conform to the wire grammar
    #[error("malformed cache reply: {0}")]
    Protocol(String),
    /// The reply was well formed but not of the kind the command expects
    #[error("unexpected cache reply to {command}")]
    UnexpectedReply {
        /// The command whose reply was surprising
        command: &'static str,
    },
}

/// A cache client bound to a single server address
///
/// The client holds no connection state; it remembers only the address and
/// the optional password, and dials anew for each operation. Cloning is cheap
/// and clones are fully independent.
#[derive(Clone, Debug)]
pub struct CacheClient<C = System> {
    addr: String,
    password: Option<String>,
    clock: C,
}

impl CacheClient {
    /// Constructs a client for the given server without touching the network
    pub fn new(host: &str, port: u16, password: Option<String>) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            password,
            clock: System,
        }
    }

    /// Constructs a client and verifies the server is reachable with `PING`
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<String>,
    ) -> Result<Self, CacheError> {
        let client = Self::new(host, port, password);
        client.ping().await?;
        Ok(client)
    }
}

impl<C> CacheClient<C> {
    /// Replaces the clock used for expiry arithmetic
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CacheClient<D> {
        CacheClient {
            addr: self.addr,
            password: self.password,
            clock,
        }
    }
}

impl<C: Clock> CacheClient<C> {
    /// Checks server liveness
    #[tracing::instrument(level = "trace", skip(self), fields(addr = %self.addr))]
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.exec(&["PING"]).await?;
        Ok(())
    }

    /// Fetches the value stored under `key`
    ///
    /// Returns `None` when the key is absent. An empty stored value comes
    /// back as `Some("")`.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.exec(&["GET", key]).await? {
            Reply::Bulk(value) => Ok(Some(value)),
            Reply::Null => Ok(None),
            _ => Err(CacheError::UnexpectedReply { command: "GET" }),
        }
    }

    /// Stores `value` under `key` without an expiry
    #[tracing::instrument(level = "trace", skip(self, value))]
    pub async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.exec(&["SET", key, value]).await?;
        Ok(())
    }

    /// Stores `value` under `key`, expiring at the absolute time `expire_at`
    ///
    /// If `expire_at` is not in the future the key is deleted instead, so a
    /// stale value is never written with a non-positive time to live.
    #[tracing::instrument(level = "trace", skip(self, value), fields(expire_at = expire_at.0))]
    pub async fn set_expire_at(
        &self,
        key: &str,
        value: &str,
        expire_at: UnixTime,
    ) -> Result<(), CacheError> {
        let now = self.clock.now();
        if expire_at <= now {
            tracing::debug!(key, "expiry already past, deleting key instead");
            return self.del(key).await;
        }
        let seconds = (expire_at - now).0.max(1).to_string();
        self.exec(&["SETEX", key, seconds.as_str(), value]).await?;
        Ok(())
    }

    /// Removes `key`
    ///
    /// Deleting an absent key is not an error.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.exec(&["DEL", key]).await?;
        Ok(())
    }

    /// Dials, authenticates if needed, sends one command, and reads its reply
    ///
    /// Error replies are lifted into [`CacheError::Server`] here so that the
    /// operations above only ever see the replies they asked for.
    async fn exec(&self, command: &[&str]) -> Result<Reply, CacheError> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| CacheError::ConnectTimeout(self.addr.clone()))??;
        let mut conn = BufReader::new(stream);

        if let Some(password) = self.password.as_deref() {
            if let Reply::Error(message) = resp::roundtrip(&mut conn, &["AUTH", password]).await? {
                return Err(CacheError::Server(message));
            }
        }

        match resp::roundtrip(&mut conn, command).await? {
            Reply::Error(message) => Err(CacheError::Server(message)),
            reply => Ok(reply),
        }
    }
}
