//! The cache-aside token manager

use std::time::Duration;

use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use mophgate_cache::CacheClient;
use reqwest::{header, Url};

use crate::payload::CredentialPayload;
use crate::registry::AppRegistry;
use crate::{claims, TokenError};

/// Reduction applied to a token's own expiry before caching, so a token on
/// the verge of expiring is never served from the cache.
const SAFETY_MARGIN: DurationSecs = DurationSecs(60);

/// Total time allowed for one request to a token endpoint; a hung authority
/// must not stall the proxied call behind it indefinitely.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Cache lifetime used when the margin-adjusted expiry is already past.
const FALLBACK_VALIDITY: DurationSecs = DurationSecs(300);

/// Default key suffixes under which tokens and payloads are cached,
/// prefixed by the application label.
const TOKEN_KEY_SUFFIX: &str = "-auth-token";
const PAYLOAD_KEY_SUFFIX: &str = "-auth-payload";

/// Options controlling a single token request
#[derive(Clone, Default)]
pub struct TokenOptions {
    /// Bypass the cache read path, guaranteeing a fresh upstream request
    pub force: bool,
    /// Identity to build a fresh credential payload from
    pub username: Option<String>,
    /// Password to build a fresh credential payload from
    pub password: Option<String>,
}

impl TokenOptions {
    /// Options that force a refresh using the cached credential payload
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// Options carrying explicit credentials
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            force: false,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    fn has_credentials(&self) -> bool {
        matches!(
            (&self.username, &self.password),
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty()
        )
    }
}

impl std::fmt::Debug for TokenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenOptions")
            .field("force", &self.force)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***PASSWORD***"))
            .finish()
    }
}

/// Acquires, caches, and refreshes per-application bearer tokens
///
/// One manager serves every registered application. It holds the cache
/// client, the application registry, and a dedicated pooled HTTP client for
/// talking to token endpoints. No locking guards the refresh path; see the
/// crate docs for why racing refreshes are accepted.
#[derive(Clone, Debug)]
pub struct TokenManager<C = System> {
    cache: CacheClient<C>,
    registry: AppRegistry,
    http: reqwest::Client,
    token_key_suffix: String,
    payload_key_suffix: String,
    clock: C,
}

impl TokenManager {
    /// Constructs a manager over the given cache and registry
    ///
    /// Token endpoints are called through a dedicated pooled HTTP client with
    /// a 15 second total timeout.
    pub fn new(cache: CacheClient, registry: AppRegistry) -> Result<Self, TokenError> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(TokenError::ClientBuild)?;
        Ok(Self {
            cache,
            registry,
            http,
            token_key_suffix: TOKEN_KEY_SUFFIX.to_owned(),
            payload_key_suffix: PAYLOAD_KEY_SUFFIX.to_owned(),
            clock: System,
        })
    }
}

impl<C> TokenManager<C> {
    /// Replaces the HTTP client used for token endpoint requests
    ///
    /// The caller takes over the timeout policy along with the client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Overrides the cache key suffixes
    pub fn with_key_suffixes(
        mut self,
        token: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        self.token_key_suffix = token.into();
        self.payload_key_suffix = payload.into();
        self
    }

    /// Replaces the clock used for expiry arithmetic, in this manager and in
    /// its cache client alike
    ///
    /// Useful for testing purposes
    pub fn with_clock<D: Clone>(self, clock: D) -> TokenManager<D> {
        TokenManager {
            cache: self.cache.with_clock(clock.clone()),
            registry: self.registry,
            http: self.http,
            token_key_suffix: self.token_key_suffix,
            payload_key_suffix: self.payload_key_suffix,
            clock,
        }
    }

    /// The registry of applications this manager can serve
    pub fn registry(&self) -> &AppRegistry {
        &self.registry
    }

    fn token_key(&self, label: &str) -> String {
        format!("{label}{}", self.token_key_suffix)
    }

    fn payload_key(&self, label: &str) -> String {
        format!("{label}{}", self.payload_key_suffix)
    }
}

impl<C: Clock> TokenManager<C> {
    /// Obtains a bearer token for `app`
    ///
    /// With a warm cache and no `force` this returns the cached token without
    /// any upstream traffic. Otherwise a credential payload is determined
    /// (explicit credentials if supplied, the cached payload if not), posted
    /// to the application's token endpoint, and the resulting token is cached
    /// until its own expiry less a safety margin before being returned.
    #[tracing::instrument(
        skip(self, app, opts),
        fields(app = tracing::field::Empty, force = opts.force, explicit_credentials = opts.has_credentials()),
    )]
    pub async fn token(&self, app: &str, opts: TokenOptions) -> Result<String, TokenError> {
        let (label, app_credentials) = self.registry.resolve(app)?;
        tracing::Span::current().record("app", label);
        let token_key = self.token_key(label);
        let payload_key = self.payload_key(label);

        if opts.force {
            // Key absence is not an error; DEL of a missing key succeeds.
            self.cache.del(&token_key).await?;
        } else if let Some(cached) = self.cache.get(&token_key).await? {
            if !cached.trim().is_empty() {
                tracing::debug!("using cached token");
                return Ok(cached);
            }
        }

        let payload = if opts.has_credentials() {
            CredentialPayload::new(
                opts.username.as_deref().unwrap_or_default(),
                opts.password.as_deref().unwrap_or_default(),
                app_credentials.secret(),
                self.registry.hospital_code(),
            )
        } else {
            let saved = self
                .cache
                .get(&payload_key)
                .await?
                .filter(|saved| !saved.is_empty())
                .ok_or_else(|| TokenError::NoCredentials {
                    app: label.to_owned(),
                })?;
            serde_json::from_str(&saved).map_err(TokenError::PayloadDecode)?
        };

        let serialized = serde_json::to_string(&payload).map_err(TokenError::PayloadEncode)?;
        let token = self
            .request_token(app_credentials.auth_base(), &serialized)
            .await?;

        // Persisted before the token so a later refresh without credentials
        // can succeed even if the token store below fails.
        self.cache.set(&payload_key, &serialized).await?;

        let expiry = claims::token_expiry(&token)?;
        let cached_until = self.cache_expiry(expiry);
        self.cache
            .set_expire_at(&token_key, &token, cached_until)
            .await?;

        tracing::info!(
            token_expiry = expiry.0,
            cached_until = cached_until.0,
            "issued new token"
        );
        Ok(token)
    }

    /// Checks whether `username`/`password` match the credentials that most
    /// recently obtained a token for `app`
    ///
    /// Returns `false` without error when no payload is cached. The check
    /// re-derives the expected payload under the application secret and
    /// compares serialized bytes, so no upstream call is made.
    #[tracing::instrument(skip(self, username, password))]
    pub async fn credentials_are_current(
        &self,
        app: &str,
        username: &str,
        password: &str,
    ) -> Result<bool, TokenError> {
        let (label, app_credentials) = self.registry.resolve(app)?;
        let Some(saved) = self.cache.get(&self.payload_key(label)).await? else {
            return Ok(false);
        };

        let expected = CredentialPayload::new(
            username,
            password,
            app_credentials.secret(),
            self.registry.hospital_code(),
        );
        let serialized = serde_json::to_string(&expected).map_err(TokenError::PayloadEncode)?;
        Ok(serialized == saved)
    }

    /// Force-refreshes a token for each listed application
    ///
    /// Intended for start-up warming. Failures are logged and skipped so one
    /// unreachable authority does not block the others.
    pub async fn warm(&self, apps: &[&str]) {
        for app in apps {
            match self.token(app, TokenOptions::forced()).await {
                Ok(_) => tracing::info!(app = %app, "prefetched token"),
                Err(error) => tracing::warn!(app = %app, error = %error, "unable to prefetch token"),
            }
        }
    }

    /// POSTs the serialized payload to the application's token endpoint and
    /// returns the trimmed response body as the token
    #[tracing::instrument(skip(self, auth_base, body))]
    async fn request_token(&self, auth_base: &Url, body: &str) -> Result<String, TokenError> {
        let mut url = auth_base.clone();
        let path = format!("{}/token", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .append_pair("Action", "get_moph_access_token");

        tracing::trace!(token_url = %url, "requesting token from authority");
        let response = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(TokenError::RequestSend)?;

        let status = response.status();
        let text = response.text().await.map_err(TokenError::BodyRead)?;
        if !status.is_success() {
            return Err(TokenError::TokenEndpoint {
                status,
                body: text.trim().to_owned(),
            });
        }

        tracing::debug!(
            response.status = status.as_u16(),
            "received token response from authority"
        );

        let token = text.trim();
        if token.is_empty() {
            return Err(TokenError::EmptyToken);
        }
        Ok(token.to_owned())
    }

    /// The absolute time the cached token should expire: the token's own
    /// expiry less the safety margin, floored at now plus five minutes so a
    /// short-lived token is still cached rather than dropped.
    fn cache_expiry(&self, token_expiry: UnixTime) -> UnixTime {
        let now = self.clock.now();
        let adjusted = UnixTime(token_expiry.0.saturating_sub(SAFETY_MARGIN.0));
        if adjusted <= now {
            now + FALLBACK_VALIDITY
        } else {
            adjusted
        }
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;

    use super::*;
    use crate::AppRegistry;

    fn manager_at(now: u64) -> TokenManager<TestClock> {
        let registry = AppRegistry::new("mophic", "10999").with_app(
            "mophic",
            "secret",
            Url::parse("https://auth.example.net").unwrap(),
        );
        TokenManager::new(CacheClient::new("localhost", 6379, None), registry)
            .unwrap()
            .with_clock(TestClock::new(UnixTime(now)))
    }

    #[test]
    fn cache_expiry_applies_the_safety_margin() {
        let manager = manager_at(1_000);
        assert_eq!(manager.cache_expiry(UnixTime(2_000)), UnixTime(1_940));
    }

    #[test]
    fn cache_expiry_floors_at_five_minutes_when_margin_consumes_the_token() {
        let manager = manager_at(1_000);
        // Adjusted expiry (1_030 - 60) is already past "now".
        assert_eq!(manager.cache_expiry(UnixTime(1_030)), UnixTime(1_300));
    }

    #[test]
    fn cache_expiry_floors_even_when_the_token_is_already_expired() {
        let manager = manager_at(1_000);
        assert_eq!(manager.cache_expiry(UnixTime(40)), UnixTime(1_300));
    }

    #[test]
    fn options_require_both_username_and_password() {
        assert!(TokenOptions::with_credentials("alice", "pw").has_credentials());
        assert!(!TokenOptions {
            username: Some("alice".into()),
            ..TokenOptions::default()
        }
        .has_credentials());
        assert!(!TokenOptions::forced().has_credentials());
    }

    #[test]
    fn options_debug_never_reveals_the_password() {
        let opts = TokenOptions::with_credentials("alice", "hunter2");
        let rendered = format!("{opts:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
