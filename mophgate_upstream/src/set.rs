//! The endpoint-name to client table

use std::collections::HashMap;
use std::sync::Arc;

use mophgate_tokens::TokenManager;
use reqwest::Url;

use crate::{UpstreamClient, UpstreamError};

/// The named set of upstream clients the proxy can forward to
///
/// Endpoint names are what callers select with `X-API-ENDPOINT` or
/// `?endpoint=`; several names may share one application label (and thus one
/// token) while pointing at different base URLs. Targets with a blank base
/// URL are simply not registered, so deployments can leave unused upstreams
/// unconfigured.
#[derive(Clone, Debug)]
pub struct UpstreamSet {
    default_endpoint: String,
    clients: HashMap<String, UpstreamClient>,
}

impl UpstreamSet {
    /// Constructs an empty set with the given default endpoint name
    pub fn new(default_endpoint: impl Into<String>) -> Self {
        Self {
            default_endpoint: default_endpoint.into(),
            clients: HashMap::new(),
        }
    }

    /// Registers an endpoint, skipping it silently when `base` is blank
    pub fn with_target(
        mut self,
        name: impl Into<String>,
        app: impl Into<String>,
        base: &str,
        tokens: &Arc<TokenManager>,
    ) -> Result<Self, UpstreamError> {
        let name = name.into();
        let base = base.trim();
        if base.is_empty() {
            tracing::debug!(endpoint = %name, "skipping unconfigured endpoint");
            return Ok(self);
        }

        let base = Url::parse(base).map_err(|source| UpstreamError::InvalidBaseUrl {
            url: base.to_owned(),
            source,
        })?;
        let client = UpstreamClient::new(app, base, Arc::clone(tokens))?;
        self.clients.insert(name, client);
        Ok(self)
    }

    /// Looks up the client for an endpoint name, empty meaning the default
    pub fn client(&self, endpoint: &str) -> Result<&UpstreamClient, UpstreamError> {
        let endpoint = if endpoint.is_empty() {
            &self.default_endpoint
        } else {
            endpoint
        };
        self.clients
            .get(endpoint)
            .ok_or_else(|| UpstreamError::UnknownEndpoint(endpoint.to_owned()))
    }

    /// The registered endpoint names
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}
