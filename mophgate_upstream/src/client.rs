//! The per-upstream proxying client

use std::sync::Arc;
use std::time::Duration;

use mophgate_tokens::{TokenManager, TokenOptions};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{redirect, Method, Response, StatusCode, Url};

use crate::UpstreamError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 20;

/// An inbound request to be forwarded upstream
#[derive(Clone, Debug)]
pub struct ProxyRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl ProxyRequest {
    /// Constructs a request for the given method and path
    ///
    /// The path is rooted if it does not already start with `/`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method,
            path,
            query: None,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Attaches the raw query string to forward
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Attaches the inbound headers to forward
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Attaches the request body
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// A pooled HTTP client for one upstream service
///
/// The client injects the current bearer token for its application into each
/// outbound request and retries exactly once, after a forced token refresh,
/// when the upstream answers `401 Unauthorized`. Redirects are never
/// followed; the raw redirect response is handed back for passthrough.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    app: String,
    base: Url,
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
}

impl UpstreamClient {
    /// Constructs a client for `base`, authenticating as `app`
    pub fn new(
        app: impl Into<String>,
        base: Url,
        tokens: Arc<TokenManager>,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(UpstreamError::ClientBuild)?;
        Ok(Self {
            app: app.into(),
            base,
            http,
            tokens,
        })
    }

    /// The application label this client authenticates as
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Forwards the request upstream, retrying once on an auth failure
    #[tracing::instrument(
        skip(self, request),
        fields(app = %self.app, method = %request.method, path = %request.path),
    )]
    pub async fn send(&self, request: &ProxyRequest) -> Result<Response, UpstreamError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self.dispatch(request).await?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 1 {
                tracing::debug!("upstream rejected token, forcing refresh and retrying once");
                drop(response);
                self.tokens
                    .token(&self.app, TokenOptions::forced())
                    .await?;
                continue;
            }

            tracing::debug!(
                response.status = response.status().as_u16(),
                attempt,
                "relaying upstream response"
            );
            return Ok(response);
        }
    }

    async fn dispatch(&self, request: &ProxyRequest) -> Result<Response, UpstreamError> {
        let mut url = self
            .base
            .join(&request.path)
            .map_err(|source| UpstreamError::InvalidPath {
                path: request.path.clone(),
                source,
            })?;
        url.set_query(request.query.as_deref());

        // The caller's Host belongs to the proxy, and its Authorization (if
        // any) is never trusted; both are replaced.
        let mut headers = request.headers.clone();
        headers.remove(header::HOST);

        let token = self.tokens.token(&self.app, TokenOptions::default()).await?;
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(UpstreamError::BearerValue)?;
        bearer.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, bearer);

        let mut outbound = self
            .http
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(body) = &request.body {
            outbound = outbound.body(body.clone());
        }

        outbound.send().await.map_err(UpstreamError::Send)
    }
}
