//! Runs the HTTP permission checks for a request.

use std::sync::Arc;

use vigil_security::{
    RequestIdentity, SecurityError, SecurityEvent, SecurityEventKind, SecurityEvents,
};

use crate::policy::{
    HttpSecurityPolicy, PathMatchingPolicy, PolicyDecision, RequestAttributes,
};

/// Composes globally installed policies with the path-selected policy.
///
/// Installed policies are filtered once at construction: named policies only
/// apply through path configuration, and a path-matching policy without any
/// configured permissions has nothing to apply.
pub struct HttpAuthorizer {
    policies: Vec<Arc<dyn HttpSecurityPolicy>>,
    path_policy: Option<Arc<PathMatchingPolicy>>,
    default_decision: PolicyDecision,
    events: Arc<SecurityEvents>,
}

impl HttpAuthorizer {
    #[must_use]
    pub fn new(
        installed: Vec<Arc<dyn HttpSecurityPolicy>>,
        path_policy: Option<Arc<PathMatchingPolicy>>,
        default_decision: PolicyDecision,
        events: Arc<SecurityEvents>,
    ) -> Self {
        let policies: Vec<Arc<dyn HttpSecurityPolicy>> = installed
            .into_iter()
            .filter(|policy| {
                if let Some(name) = policy.name() {
                    tracing::debug!(policy = name, "named policy excluded from global evaluation");
                    false
                } else {
                    true
                }
            })
            .collect();
        let path_policy = path_policy.filter(|policy| !policy.has_no_permissions());

        Self {
            policies,
            path_policy,
            default_decision,
            events,
        }
    }

    /// Authorize the request. Policies evaluate in a fixed order (installed
    /// globals first, then the path-selected bindings), short-circuiting on
    /// the first explicit deny. When no policy applies, the configured
    /// default decision is used.
    ///
    /// # Errors
    ///
    /// - `AuthorizationDenied` on an explicit deny or a deny-by-default.
    /// - Authentication failures surfaced while resolving the identity.
    pub async fn authorize(
        &self,
        request: &RequestAttributes,
        identity: &RequestIdentity,
    ) -> Result<(), SecurityError> {
        let mut any_applied = false;

        for policy in &self.policies {
            any_applied = true;
            if apply(policy.as_ref(), request, identity).await? == PolicyDecision::Deny {
                return Err(self.deny(request, identity, "installed-policy"));
            }
        }

        if let Some(path_policy) = &self.path_policy
            && let Some(bindings) = path_policy.select(request)
        {
            for binding in bindings {
                any_applied = true;
                if apply(binding.policy.as_ref(), request, identity).await?
                    == PolicyDecision::Deny
                {
                    return Err(self.deny(request, identity, "path-policy"));
                }
            }
        }

        if !any_applied && self.default_decision == PolicyDecision::Deny {
            return Err(self.deny(request, identity, "default-policy"));
        }

        self.events
            .fire_with(SecurityEventKind::AuthorizationSuccess, || {
                SecurityEvent::authorization_success(identity.bound(), Some("http-authorizer"))
                    .with_property("path", serde_json::Value::String(request.path.clone()))
            });
        Ok(())
    }

    fn deny(
        &self,
        request: &RequestAttributes,
        identity: &RequestIdentity,
        context: &'static str,
    ) -> SecurityError {
        let failure = SecurityError::denied("request forbidden by policy");
        self.events
            .fire_with(SecurityEventKind::AuthorizationFailure, || {
                SecurityEvent::authorization_failure(identity.bound(), failure.clone(), context)
                    .with_property("path", serde_json::Value::String(request.path.clone()))
            });
        failure
    }
}

async fn apply(
    policy: &dyn HttpSecurityPolicy,
    request: &RequestAttributes,
    identity: &RequestIdentity,
) -> Result<PolicyDecision, SecurityError> {
    match policy.check_permission(request, identity).await {
        Ok(decision) => Ok(decision),
        Err(failure) => {
            // Identity resolution failed; the failure handler owns it.
            tracing::debug!(path = %request.path, cause = %failure, "policy evaluation failed");
            Err(failure)
        }
    }
}
