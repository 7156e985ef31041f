use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Well-known context property names.
pub mod properties {
    /// Tenant the call is made on behalf of.
    pub const TENANT_ID: &str = "tenant-id";
    /// Authentication mechanism driving the call (e.g. [`BEARER_SCHEME`]).
    ///
    /// [`BEARER_SCHEME`]: super::BEARER_SCHEME
    pub const AUTH_MECHANISM: &str = "auth-mechanism";
}

/// Bearer-token authentication mechanism marker.
pub const BEARER_SCHEME: &str = "Bearer";

/// Closed set of security-sensitive endpoint categories a filter can bind to.
///
/// [`Endpoint::All`] is a broadcast marker: filters registered under it apply
/// to every other category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    Discovery,
    Token,
    UserInfo,
    Jwks,
    Introspection,
    TokenRevocation,
    ClientRegistration,
    RegisteredClient,
    All,
}

impl Endpoint {
    /// Every category except the [`Endpoint::All`] broadcast marker.
    pub const CONCRETE: [Endpoint; 8] = [
        Endpoint::Discovery,
        Endpoint::Token,
        Endpoint::UserInfo,
        Endpoint::Jwks,
        Endpoint::Introspection,
        Endpoint::TokenRevocation,
        Endpoint::ClientRegistration,
        Endpoint::RegisteredClient,
    ];
}

/// Snapshot of an outgoing request to a security-sensitive endpoint,
/// mutable by request filters.
#[derive(Debug, Clone)]
pub struct OidcRequestContext {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    properties: HashMap<String, String>,
}

impl OidcRequestContext {
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            properties: HashMap::new(),
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }
}

/// Snapshot of a response from a security-sensitive endpoint, readable (and
/// annotatable) by response filters.
#[derive(Debug, Clone)]
pub struct OidcResponseContext {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    properties: HashMap<String, String>,
}

impl OidcResponseContext {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
            properties: HashMap::new(),
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }
}

/// Intercepts outgoing requests to endpoints the filter is registered for.
pub trait RequestFilter: Send + Sync {
    fn filter(&self, ctx: &mut OidcRequestContext);
}

/// Intercepts responses from endpoints the filter is registered for.
pub trait ResponseFilter: Send + Sync {
    fn filter(&self, ctx: &mut OidcResponseContext);
}

/// Condition a conditional request filter must satisfy to run.
pub trait RequestPredicate: Send + Sync {
    fn test(&self, ctx: &OidcRequestContext) -> bool;
}

/// Condition a conditional response filter must satisfy to run.
pub trait ResponsePredicate: Send + Sync {
    fn test(&self, ctx: &OidcResponseContext) -> bool;
}
