//! HTTP request security pipeline.
//!
//! Resolves a caller's identity for every inbound request (proactively or
//! lazily behind a memoized deferred outcome), matches the request path
//! against configured access policies, enforces them with audit events, and
//! converts authentication failures into challenge, redirect or unauthorized
//! responses.

pub mod authorizer;
pub mod config;
pub mod layer;
pub mod path_matcher;
pub mod pipeline;
pub mod policy;

use std::sync::Arc;

use vigil_security::{AuditSink, SecurityEvents};

pub use authorizer::HttpAuthorizer;
pub use config::{PathPolicyRule, SecuritySettings};
pub use layer::{CurrentIdentity, SecurityPipelineLayer, extract_bearer_token};
pub use path_matcher::{PathMatch, PathMatcher, PathMatcherError};
pub use pipeline::{
    AuthFailureHandler, AuthMode, Challenge, EndStrategy, FailureDisposition, HttpAuthenticator,
    IdentityResolutionPipeline,
};
pub use policy::{
    AuthenticatedPolicy, DenyAllPolicy, HttpSecurityPolicy, PathMatchingPolicy, PermitAllPolicy,
    PolicyBinding, PolicyBuildError, PolicyDecision, RequestAttributes, RolesAllowedPolicy,
};

/// Assemble the security middleware from settings, the authentication
/// mechanism chain, globally installed policies and audit sinks.
///
/// # Errors
///
/// Path-policy configuration errors.
pub fn build_security_layer(
    settings: &SecuritySettings,
    authenticator: Arc<dyn HttpAuthenticator>,
    installed_policies: Vec<Arc<dyn HttpSecurityPolicy>>,
    audit_sinks: Vec<Arc<dyn AuditSink>>,
) -> Result<SecurityPipelineLayer, PolicyBuildError> {
    let events = Arc::new(SecurityEvents::new(audit_sinks, settings.events_enabled));
    let path_policy = Arc::new(settings.build_path_policy()?);

    let authorizer = Arc::new(HttpAuthorizer::new(
        installed_policies,
        Some(path_policy),
        settings.default_decision(),
        Arc::clone(&events),
    ));
    let pipeline = Arc::new(IdentityResolutionPipeline::new(
        Arc::clone(&authenticator),
        settings.auth_mode,
        events,
    ));
    let failure_handler = Arc::new(AuthFailureHandler::new(
        authenticator,
        settings.end_strategy,
    ));

    Ok(SecurityPipelineLayer::new(
        pipeline,
        authorizer,
        failure_handler,
    ))
}
