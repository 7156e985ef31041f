//! Per-request identity resolution and authentication-failure handling.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use vigil_security::{
    Identity, RequestIdentity, SecurityError, SecurityEvent, SecurityEventKind, SecurityEvents,
};

use crate::policy::RequestAttributes;

/// When authentication runs relative to request processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Authenticate immediately when the request arrives.
    #[default]
    Proactive,
    /// Defer authentication until the identity is first observed.
    Lazy,
}

/// What the default auth-failure handler does after sending a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EndStrategy {
    /// Terminate the response immediately.
    #[default]
    End,
    /// Hand off to the next failure handler, unless already delegated.
    NextHandler,
    /// Defer entirely to the caller.
    DoNothing,
}

/// Challenge data an authentication mechanism wants on a rejection response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub status: u16,
    /// Header name/value pairs, e.g. `WWW-Authenticate`.
    pub headers: Vec<(String, String)>,
}

/// The authentication mechanism chain, treated as an opaque collaborator:
/// a typed request in, an asynchronous identity-or-failure out.
#[async_trait]
pub trait HttpAuthenticator: Send + Sync {
    /// Attempt authentication. `Ok(None)` means no credentials were
    /// presented; the pipeline resolves the anonymous identity instead.
    ///
    /// # Errors
    ///
    /// Authentication failures per the [`SecurityError`] taxonomy.
    async fn attempt_authentication(
        &self,
        request: &RequestAttributes,
    ) -> Result<Option<Identity>, SecurityError>;

    /// The anonymous identity bound when no credentials are presented.
    async fn resolve_anonymous(&self) -> Identity {
        Identity::anonymous()
    }

    /// The challenge sent when credentials are missing or rejected.
    async fn challenge(&self, request: &RequestAttributes) -> Option<Challenge>;
}

/// Orchestrates per-request authentication in the configured mode.
pub struct IdentityResolutionPipeline {
    authenticator: Arc<dyn HttpAuthenticator>,
    mode: AuthMode,
    events: Arc<SecurityEvents>,
}

impl IdentityResolutionPipeline {
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn HttpAuthenticator>,
        mode: AuthMode,
        events: Arc<SecurityEvents>,
    ) -> Self {
        Self {
            authenticator,
            mode,
            events,
        }
    }

    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Create the memoized deferred identity for a request without observing
    /// it. The provider fires authentication audit events exactly once when
    /// it settles, however many consumers observe the outcome.
    #[must_use]
    pub fn begin(&self, request: &RequestAttributes) -> RequestIdentity {
        let authenticator = Arc::clone(&self.authenticator);
        let events = Arc::clone(&self.events);
        let snapshot = request.clone();

        RequestIdentity::new(async move {
            match authenticator.attempt_authentication(&snapshot).await {
                Ok(Some(identity)) => {
                    let identity = Arc::new(identity);
                    events.fire_with(SecurityEventKind::AuthenticationSuccess, || {
                        SecurityEvent::authentication_success(Arc::clone(&identity))
                    });
                    Ok(identity)
                }
                // No credentials: resolve and bind the anonymous identity.
                Ok(None) => Ok(Arc::new(authenticator.resolve_anonymous().await)),
                Err(failure) => {
                    events.fire_with(SecurityEventKind::AuthenticationFailure, || {
                        SecurityEvent::authentication_failure(failure.root_cause().clone())
                    });
                    Err(failure)
                }
            }
        })
    }

    /// Start identity resolution for a request. In proactive mode the
    /// outcome is awaited and a failure is returned for the failure handler;
    /// in lazy mode the untriggered deferred identity is handed back and the
    /// first downstream observer pays for resolution.
    pub async fn run(&self, request: &RequestAttributes) -> (RequestIdentity, Option<SecurityError>) {
        let identity = self.begin(request);
        match self.mode {
            AuthMode::Proactive => match identity.resolve().await {
                Ok(_) => (identity, None),
                Err(failure) => (identity, Some(failure)),
            },
            AuthMode::Lazy => (identity, None),
        }
    }
}

/// How the failure handler disposed of an authentication failure.
#[derive(Debug)]
pub enum FailureDisposition {
    /// The handler produced the final response.
    Respond(Response),
    /// First delegation to the next failure handler; the suggested response
    /// carries the challenge already.
    Delegate(Response),
    /// The handler deliberately left the failure to the caller.
    Ignore(SecurityError),
    /// The response already ended or the failure was delegated before.
    AlreadyHandled,
}

/// Default authentication-failure handler. Dispatches on the root cause and
/// applies the configured [`EndStrategy`] for challenge-type failures.
pub struct AuthFailureHandler {
    authenticator: Arc<dyn HttpAuthenticator>,
    end_strategy: EndStrategy,
}

impl AuthFailureHandler {
    #[must_use]
    pub fn new(authenticator: Arc<dyn HttpAuthenticator>, end_strategy: EndStrategy) -> Self {
        Self {
            authenticator,
            end_strategy,
        }
    }

    /// Handle a failure exactly once per request. Re-entry with an ended
    /// response or an already-delegated failure is a no-op.
    pub async fn handle(
        &self,
        request: &RequestAttributes,
        identity: &RequestIdentity,
        failure: &SecurityError,
    ) -> FailureDisposition {
        if identity.response_ended() {
            return FailureDisposition::AlreadyHandled;
        }

        match failure.root_cause() {
            SecurityError::AuthenticationFailed { .. } => {
                let challenge = self.authenticator.challenge(request).await;
                let response = challenge_response(challenge);
                match self.end_strategy {
                    EndStrategy::End => {
                        identity.mark_response_ended();
                        FailureDisposition::Respond(response)
                    }
                    EndStrategy::NextHandler => {
                        if identity.begin_failure_delegation() {
                            FailureDisposition::Delegate(response)
                        } else {
                            FailureDisposition::AlreadyHandled
                        }
                    }
                    EndStrategy::DoNothing => {
                        FailureDisposition::Ignore(failure.root_cause().clone())
                    }
                }
            }
            SecurityError::AuthenticationCompletionFailed { .. } => {
                tracing::debug!("authentication has failed, returning HTTP status 401");
                identity.mark_response_ended();
                FailureDisposition::Respond(empty_response(StatusCode::UNAUTHORIZED))
            }
            SecurityError::AuthenticationRedirect { status, location } => {
                identity.mark_response_ended();
                FailureDisposition::Respond(redirect_response(*status, location))
            }
            other => FailureDisposition::Ignore(other.clone()),
        }
    }
}

fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn challenge_response(challenge: Option<Challenge>) -> Response {
    let Some(challenge) = challenge else {
        return empty_response(StatusCode::UNAUTHORIZED);
    };
    let mut response = empty_response(
        StatusCode::from_u16(challenge.status).unwrap_or(StatusCode::UNAUTHORIZED),
    );
    for (name, value) in &challenge.headers {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::try_from(name.as_str()),
            http::HeaderValue::try_from(value.as_str()),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

fn redirect_response(status: u16, location: &str) -> Response {
    let mut response =
        empty_response(StatusCode::from_u16(status).unwrap_or(StatusCode::SEE_OTHER));
    if let Ok(value) = http::HeaderValue::try_from(location) {
        response.headers_mut().insert(http::header::LOCATION, value);
    }
    response
        .headers_mut()
        .insert(http::header::CACHE_CONTROL, http::HeaderValue::from_static("no-store"));
    response
        .headers_mut()
        .insert(http::header::PRAGMA, http::HeaderValue::from_static("no-cache"));
    response
}
