//! The closed table of applications the proxy can obtain tokens for

use std::collections::HashMap;

use reqwest::Url;

use crate::TokenError;

/// The material needed to request tokens for one application
#[derive(Clone, Debug)]
pub struct AppCredentials {
    secret: String,
    auth_base: Url,
}

impl AppCredentials {
    /// The application's shared fingerprinting secret
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The base URL of the application's token endpoint
    pub fn auth_base(&self) -> &Url {
        &self.auth_base
    }
}

/// A table mapping application labels to their token-issuing authority
///
/// The set of labels is fixed at construction. An empty label resolves to the
/// default application; anything else not registered is rejected with a typed
/// error at token-request time.
#[derive(Clone, Debug)]
pub struct AppRegistry {
    default_label: String,
    hospital_code: String,
    apps: HashMap<String, AppCredentials>,
}

impl AppRegistry {
    /// Constructs a registry with the given default label and tenant code
    pub fn new(default_label: impl Into<String>, hospital_code: impl Into<String>) -> Self {
        Self {
            default_label: default_label.into(),
            hospital_code: hospital_code.into(),
            apps: HashMap::new(),
        }
    }

    /// Registers an application label
    pub fn with_app(
        mut self,
        label: impl Into<String>,
        secret: impl Into<String>,
        auth_base: Url,
    ) -> Self {
        self.apps.insert(
            label.into(),
            AppCredentials {
                secret: secret.into(),
                auth_base,
            },
        );
        self
    }

    /// The tenant (hospital) code shared by every registered application
    pub fn hospital_code(&self) -> &str {
        &self.hospital_code
    }

    /// The registered application labels
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    /// Resolves a label (empty meaning the default) to its credentials
    pub fn resolve(&self, label: &str) -> Result<(&str, &AppCredentials), TokenError> {
        let label = if label.is_empty() {
            &self.default_label
        } else {
            label
        };
        self.apps
            .get_key_value(label)
            .map(|(label, credentials)| (label.as_str(), credentials))
            .ok_or_else(|| TokenError::UnsupportedApp(label.to_owned()))
    }
}
