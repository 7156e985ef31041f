//! HTTP security policies and the path-matching policy built from
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use vigil_security::{RequestIdentity, SecurityError};

use crate::path_matcher::{PathMatcher, PathMatcherError};

/// Immutable snapshot of the request attributes the security pipeline
/// consults. Threaded explicitly through the pipeline instead of a
/// request-scoped attribute bag.
#[derive(Debug, Clone)]
pub struct RequestAttributes {
    pub method: Method,
    pub path: String,
    pub headers: http::HeaderMap,
}

impl RequestAttributes {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: http::HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Permit,
    Deny,
}

/// A request-admission policy. Unnamed policies are global; named policies
/// only apply where configuration references them by name.
#[async_trait]
pub trait HttpSecurityPolicy: Send + Sync {
    fn name(&self) -> Option<&str> {
        None
    }

    /// Evaluate the policy. Resolving the identity (when the policy needs it)
    /// goes through the memoized deferred outcome, so authorization never
    /// observes a partially-resolved identity.
    ///
    /// # Errors
    ///
    /// Authentication failures surfaced by identity resolution.
    async fn check_permission(
        &self,
        request: &RequestAttributes,
        identity: &RequestIdentity,
    ) -> Result<PolicyDecision, SecurityError>;
}

/// Permits every request without resolving the identity.
pub struct PermitAllPolicy;

#[async_trait]
impl HttpSecurityPolicy for PermitAllPolicy {
    async fn check_permission(
        &self,
        _request: &RequestAttributes,
        _identity: &RequestIdentity,
    ) -> Result<PolicyDecision, SecurityError> {
        Ok(PolicyDecision::Permit)
    }
}

/// Denies every request without resolving the identity.
pub struct DenyAllPolicy;

#[async_trait]
impl HttpSecurityPolicy for DenyAllPolicy {
    async fn check_permission(
        &self,
        _request: &RequestAttributes,
        _identity: &RequestIdentity,
    ) -> Result<PolicyDecision, SecurityError> {
        Ok(PolicyDecision::Deny)
    }
}

/// Permits any non-anonymous identity.
pub struct AuthenticatedPolicy;

#[async_trait]
impl HttpSecurityPolicy for AuthenticatedPolicy {
    async fn check_permission(
        &self,
        _request: &RequestAttributes,
        identity: &RequestIdentity,
    ) -> Result<PolicyDecision, SecurityError> {
        let identity = identity.resolve().await?;
        if identity.is_anonymous() {
            Ok(PolicyDecision::Deny)
        } else {
            Ok(PolicyDecision::Permit)
        }
    }
}

/// Permits identities holding at least one of the configured roles.
pub struct RolesAllowedPolicy {
    name: Option<String>,
    roles: Vec<String>,
}

impl RolesAllowedPolicy {
    #[must_use]
    pub fn new(roles: Vec<String>) -> Self {
        Self { name: None, roles }
    }

    /// A named instance referenced from path-policy configuration.
    #[must_use]
    pub fn named(name: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            name: Some(name.into()),
            roles,
        }
    }
}

#[async_trait]
impl HttpSecurityPolicy for RolesAllowedPolicy {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn check_permission(
        &self,
        _request: &RequestAttributes,
        identity: &RequestIdentity,
    ) -> Result<PolicyDecision, SecurityError> {
        let identity = identity.resolve().await?;
        if self.roles.iter().any(|role| identity.has_role(role)) {
            Ok(PolicyDecision::Permit)
        } else {
            Ok(PolicyDecision::Deny)
        }
    }
}

/// One configured binding: a policy, optionally restricted to HTTP methods.
#[derive(Clone)]
pub struct PolicyBinding {
    pub policy: Arc<dyn HttpSecurityPolicy>,
    /// Empty means every method.
    pub methods: Vec<Method>,
}

impl PolicyBinding {
    fn applies_to(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

/// Errors building the path policy from configuration.
#[derive(Debug, thiserror::Error)]
pub enum PolicyBuildError {
    #[error("unknown policy '{0}' referenced from path policy configuration")]
    UnknownPolicy(String),

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error(transparent)]
    InvalidPath(#[from] PathMatcherError),
}

/// Selects configured policies by request path. Paths ending in `/*` match
/// by prefix, everything else is exact; the longest registered prefix wins.
pub struct PathMatchingPolicy {
    matcher: PathMatcher<Vec<PolicyBinding>>,
    permissions: usize,
}

impl std::fmt::Debug for PathMatchingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathMatchingPolicy")
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl PathMatchingPolicy {
    #[must_use]
    pub fn builder() -> PathMatchingPolicyBuilder {
        PathMatchingPolicyBuilder::default()
    }

    /// A path policy with zero configured permissions has nothing to apply.
    #[must_use]
    pub fn has_no_permissions(&self) -> bool {
        self.permissions == 0
    }

    /// The bindings applicable to this request, if its path is covered.
    #[must_use]
    pub fn select(&self, request: &RequestAttributes) -> Option<Vec<PolicyBinding>> {
        let matched = self.matcher.match_path(&request.path)?;
        let applicable: Vec<PolicyBinding> = matched
            .value
            .iter()
            .filter(|binding| binding.applies_to(&request.method))
            .cloned()
            .collect();
        if applicable.is_empty() {
            None
        } else {
            Some(applicable)
        }
    }
}

#[derive(Default)]
pub struct PathMatchingPolicyBuilder {
    exact: HashMap<String, Vec<PolicyBinding>>,
    prefix: HashMap<String, Vec<PolicyBinding>>,
    permissions: usize,
}

impl PathMatchingPolicyBuilder {
    /// Bind a policy to a path pattern. A trailing `/*` selects prefix
    /// matching (interior `*` components are allowed there); other paths
    /// match exactly.
    #[must_use]
    pub fn bind(
        mut self,
        path: &str,
        policy: Arc<dyn HttpSecurityPolicy>,
        methods: Vec<Method>,
    ) -> Self {
        let binding = PolicyBinding { policy, methods };
        if is_prefix_pattern(path) {
            self.prefix.entry(path.to_owned()).or_default().push(binding);
        } else {
            self.exact.entry(path.to_owned()).or_default().push(binding);
        }
        self.permissions += 1;
        self
    }

    /// # Errors
    ///
    /// [`PolicyBuildError::InvalidPath`] for empty path patterns.
    pub fn build(self) -> Result<PathMatchingPolicy, PolicyBuildError> {
        let mut matcher = PathMatcher::new();
        for (path, bindings) in self.exact {
            matcher.add_exact_path(&path, bindings)?;
        }
        for (path, bindings) in self.prefix {
            matcher.add_prefix_path(&path, bindings)?;
        }
        Ok(PathMatchingPolicy {
            matcher,
            permissions: self.permissions,
        })
    }
}

fn is_prefix_pattern(path: &str) -> bool {
    path == "/" || path.ends_with("/*") || path.contains("/*/")
}
