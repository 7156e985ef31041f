//! Tower layer wiring the security pipeline into an axum router.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{FromRequestParts, Request};
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use http::{Method, StatusCode};
use tower::{Layer, Service};
use vigil_security::{RequestIdentity, SecurityError};

use crate::authorizer::HttpAuthorizer;
use crate::pipeline::{AuthFailureHandler, FailureDisposition, IdentityResolutionPipeline};
use crate::policy::RequestAttributes;

/// Shared state of the security middleware.
pub struct SecurityState {
    pub pipeline: Arc<IdentityResolutionPipeline>,
    pub authorizer: Arc<HttpAuthorizer>,
    pub failure_handler: Arc<AuthFailureHandler>,
}

/// Layer that applies the security pipeline to every request.
///
/// # Example
/// ```ignore
/// router = router.layer(SecurityPipelineLayer::new(pipeline, authorizer, failure_handler));
/// ```
#[derive(Clone)]
pub struct SecurityPipelineLayer {
    state: Arc<SecurityState>,
}

impl SecurityPipelineLayer {
    #[must_use]
    pub fn new(
        pipeline: Arc<IdentityResolutionPipeline>,
        authorizer: Arc<HttpAuthorizer>,
        failure_handler: Arc<AuthFailureHandler>,
    ) -> Self {
        Self {
            state: Arc::new(SecurityState {
                pipeline,
                authorizer,
                failure_handler,
            }),
        }
    }
}

impl<S> Layer<S> for SecurityPipelineLayer {
    type Service = SecurityPipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityPipelineService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// Service that resolves the identity, authorizes the request and converts
/// security failures into responses.
#[derive(Clone)]
pub struct SecurityPipelineService<S> {
    inner: S,
    state: Arc<SecurityState>,
}

impl<S> Service<Request<Body>> for SecurityPipelineService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let state = Arc::clone(&self.state);
        let not_ready_inner = self.inner.clone();
        let mut ready_inner = std::mem::replace(&mut self.inner, not_ready_inner);

        Box::pin(async move {
            // CORS preflight requests bypass the security pipeline.
            if is_preflight_request(request.method(), request.headers()) {
                return ready_inner.call(request).await;
            }

            let attributes = RequestAttributes::new(
                request.method().clone(),
                request.uri().path().to_owned(),
            )
            .with_headers(request.headers().clone());

            // Resolve (proactively) or defer the identity.
            let (identity, failure) = state.pipeline.run(&attributes).await;
            if let Some(failure) = failure {
                let response = dispatch_failure(&state, &attributes, &identity, &failure).await;
                return Ok(response);
            }

            // Downstream consumers (extractors, method-level checks) read the
            // identity from the request extensions.
            request.extensions_mut().insert(identity.clone());

            match state.authorizer.authorize(&attributes, &identity).await {
                Ok(()) => ready_inner.call(request).await,
                Err(failure) => {
                    let response =
                        convert_denial(&state, &attributes, &identity, failure).await;
                    Ok(response)
                }
            }
        })
    }
}

/// Map an authorization outcome to a response: authentication-type failures
/// go through the failure handler (challenge, redirect); a plain denial is
/// 401 with a challenge for anonymous callers and 403 otherwise.
async fn convert_denial(
    state: &SecurityState,
    attributes: &RequestAttributes,
    identity: &RequestIdentity,
    failure: SecurityError,
) -> Response {
    match failure.root_cause() {
        SecurityError::AuthorizationDenied { .. } => {
            let anonymous = identity
                .current()
                .map(|resolved| resolved.is_anonymous())
                .unwrap_or(true);
            if anonymous {
                // An anonymous caller gets the challenge, like a missing
                // credential would.
                let challenge_failure =
                    SecurityError::authentication_failed("authentication required");
                dispatch_failure(state, attributes, identity, &challenge_failure).await
            } else {
                StatusCode::FORBIDDEN.into_response()
            }
        }
        _ => dispatch_failure(state, attributes, identity, &failure).await,
    }
}

async fn dispatch_failure(
    state: &SecurityState,
    attributes: &RequestAttributes,
    identity: &RequestIdentity,
    failure: &SecurityError,
) -> Response {
    match state
        .failure_handler
        .handle(attributes, identity, failure)
        .await
    {
        FailureDisposition::Respond(response) => response,
        // No further failure handler is installed here; finalize with the
        // prepared challenge response.
        FailureDisposition::Delegate(response) => response,
        FailureDisposition::Ignore(cause) => match cause {
            SecurityError::AuthenticationFailed { .. }
            | SecurityError::AuthenticationCompletionFailed { .. } => {
                StatusCode::UNAUTHORIZED.into_response()
            }
            other => {
                tracing::error!(cause = %other, "request failed in the security pipeline");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        FailureDisposition::AlreadyHandled => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Extractor for the per-request identity; requires the security middleware.
#[derive(Clone)]
pub struct CurrentIdentity(pub RequestIdentity);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestIdentity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "RequestIdentity not found - security middleware not configured",
            ))
    }
}

/// Extract the bearer token from the `Authorization` header.
#[must_use]
pub fn extract_bearer_token(headers: &http::HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").map(str::trim))
}

/// Check if this is a CORS preflight request
///
/// Preflight requests are OPTIONS requests with:
/// - Origin header present
/// - Access-Control-Request-Method header present
fn is_preflight_request(method: &Method, headers: &http::HeaderMap) -> bool {
    method == Method::OPTIONS
        && headers.contains_key(http::header::ORIGIN)
        && headers.contains_key(http::header::ACCESS_CONTROL_REQUEST_METHOD)
}
