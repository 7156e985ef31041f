#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end tests for the security pipeline middleware.
//!
//! These tests verify that:
//! 1. The pipeline middleware is properly attached to the router
//! 2. Role-protected paths reject unauthenticated and under-privileged callers
//! 3. Proactive and lazy resolution modes behave as configured
//! 4. One-time tokens authenticate exactly once and expire

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{Router, body::Body, routing::get};
use http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;
use vigil_gateway::{
    AuthMode, Challenge, CurrentIdentity, HttpAuthenticator, PathPolicyRule, RequestAttributes,
    SecuritySettings, build_security_layer,
};
use one_time_token::{
    InMemoryAuthenticator, OneTimeTokenAuthenticator, OneTimeTokenConfig, TokenRequestInfo,
    TrustedIdentityProvider,
};
use vigil_security::{Identity, SecurityError};
use zeroize::Zeroizing;

/// Directory backing trusted one-time-token lookups.
struct StaticDirectory;

#[async_trait]
impl TrustedIdentityProvider for StaticDirectory {
    async fn identity(&self, principal: &str) -> Result<Arc<Identity>, SecurityError> {
        Ok(Arc::new(
            Identity::builder().principal(principal).role("admin").build(),
        ))
    }
}

/// Bearer authenticator for tests.
///
/// `Authorization: Bearer <principal>:<role>[,role...]` authenticates;
/// `Bearer boom` fails; `Bearer redirect` asks for a redirect. The
/// `x-one-time-token` header authenticates through the one-time-token store.
struct TestAuthenticator {
    attempts: AtomicUsize,
    one_time: Option<Arc<InMemoryAuthenticator>>,
}

impl TestAuthenticator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            one_time: None,
        })
    }

    fn with_one_time(one_time: Arc<InMemoryAuthenticator>) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            one_time: Some(one_time),
        })
    }
}

#[async_trait]
impl HttpAuthenticator for TestAuthenticator {
    async fn attempt_authentication(
        &self,
        request: &RequestAttributes,
    ) -> Result<Option<Identity>, SecurityError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(value) = request.headers.get("x-one-time-token") {
            let one_time = self
                .one_time
                .as_ref()
                .ok_or_else(|| SecurityError::internal("one-time tokens not enabled"))?;
            let token = Zeroizing::new(
                value
                    .to_str()
                    .map_err(|_| SecurityError::authentication_failed("malformed token"))?
                    .to_owned(),
            );
            let authn = one_time.authenticate(token).await?;
            return Ok(Some((*authn.identity).clone()));
        }

        let Some(value) = request.headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| SecurityError::authentication_failed("malformed header"))?;

        match token {
            "boom" => Err(SecurityError::authentication_failed("bad credentials")),
            "redirect" => Err(SecurityError::redirect(302, "https://issuer/login")),
            _ => {
                let (principal, roles) = token.split_once(':').unwrap_or((token, ""));
                let mut builder = Identity::builder().principal(principal);
                for role in roles.split(',').filter(|r| !r.is_empty()) {
                    builder = builder.role(role);
                }
                Ok(Some(builder.build()))
            }
        }
    }

    async fn challenge(&self, _request: &RequestAttributes) -> Option<Challenge> {
        Some(Challenge {
            status: 401,
            headers: vec![(
                "www-authenticate".to_owned(),
                "Bearer realm=\"vigil\"".to_owned(),
            )],
        })
    }
}

fn settings(auth_mode: AuthMode) -> SecuritySettings {
    SecuritySettings {
        auth_mode,
        roles: HashMap::from([("admin-only".to_owned(), vec!["admin".to_owned()])]),
        path_policies: vec![
            PathPolicyRule {
                path: "/admin/*".to_owned(),
                policy: "admin-only".to_owned(),
                methods: Vec::new(),
            },
            PathPolicyRule {
                path: "/public/*".to_owned(),
                policy: "permit".to_owned(),
                methods: Vec::new(),
            },
        ],
        ..SecuritySettings::default()
    }
}

async fn admin_handler(CurrentIdentity(identity): CurrentIdentity) -> String {
    let resolved = identity.current().expect("identity resolved by authorizer");
    format!("hello {}", resolved.principal())
}

async fn whoami_handler(CurrentIdentity(identity): CurrentIdentity) -> String {
    match identity.current() {
        Ok(resolved) if !resolved.is_anonymous() => resolved.principal().to_owned(),
        _ => "anonymous".to_owned(),
    }
}

fn router(authenticator: Arc<TestAuthenticator>, auth_mode: AuthMode) -> Router {
    let layer = build_security_layer(
        &settings(auth_mode),
        authenticator,
        Vec::new(),
        Vec::new(),
    )
    .expect("layer builds");

    Router::new()
        .route("/admin/metrics", get(admin_handler))
        .route("/public/ping", get(|| async { "pong" }))
        .route("/open/whoami", get(whoami_handler))
        .layer(layer)
}

fn get_request(path: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn unauthenticated_request_to_protected_path_is_challenged() {
    let router = router(TestAuthenticator::new(), AuthMode::Proactive);

    let response = router
        .oneshot(get_request("/admin/metrics", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("www-authenticate").unwrap(),
        "Bearer realm=\"vigil\""
    );
}

#[tokio::test]
async fn sufficient_role_reaches_the_handler() {
    let router = router(TestAuthenticator::new(), AuthMode::Proactive);

    let response = router
        .oneshot(get_request("/admin/metrics", Some("alice:admin")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello alice");
}

#[tokio::test]
async fn insufficient_role_is_forbidden() {
    let router = router(TestAuthenticator::new(), AuthMode::Proactive);

    let response = router
        .oneshot(get_request("/admin/metrics", Some("bob:user")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn proactive_mode_rejects_bad_credentials_everywhere() {
    let authenticator = TestAuthenticator::new();
    let router = router(Arc::clone(&authenticator), AuthMode::Proactive);

    let response = router
        .oneshot(get_request("/public/ping", Some("boom")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(authenticator.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lazy_mode_skips_authentication_when_no_policy_needs_it() {
    let authenticator = TestAuthenticator::new();
    let router = router(Arc::clone(&authenticator), AuthMode::Lazy);

    // Even broken credentials pass a permit-all path: nothing observes the
    // deferred identity, so the provider never runs.
    let response = router
        .oneshot(get_request("/public/ping", Some("boom")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(authenticator.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lazy_mode_authenticates_on_first_observation() {
    let authenticator = TestAuthenticator::new();
    let router = router(Arc::clone(&authenticator), AuthMode::Lazy);

    let response = router
        .oneshot(get_request("/admin/metrics", Some("alice:admin")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello alice");
    assert_eq!(authenticator.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn redirect_failure_sets_location_and_cache_headers() {
    let router = router(TestAuthenticator::new(), AuthMode::Proactive);

    let response = router
        .oneshot(get_request("/open/whoami", Some("redirect")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://issuer/login"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
}

#[tokio::test]
async fn identity_extension_is_always_inserted() {
    let router = router(TestAuthenticator::new(), AuthMode::Proactive);

    let response = router
        .clone()
        .oneshot(get_request("/open/whoami", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "anonymous");

    let response = router
        .oneshot(get_request("/open/whoami", Some("carol")))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "carol");
}

#[tokio::test]
async fn cors_preflight_bypasses_the_pipeline() {
    let router = router(TestAuthenticator::new(), AuthMode::Proactive);

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/admin/metrics")
        .header(header::ORIGIN, "https://app")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    // The router answers (method not allowed), the pipeline never challenges.
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn one_time_token_authenticates_exactly_once() {
    let one_time = Arc::new(InMemoryAuthenticator::new(
        Arc::new(StaticDirectory),
        &OneTimeTokenConfig::default(),
    ));
    let authenticator = TestAuthenticator::with_one_time(Arc::clone(&one_time));
    let router = router(authenticator, AuthMode::Proactive);

    let alice = Identity::builder().principal("alice").build();
    one_time
        .store(
            &alice,
            Zeroizing::new("otac-123".to_owned()),
            &TokenRequestInfo {
                expires_in: Duration::from_secs(300),
                redirect_location: None,
            },
        )
        .await
        .unwrap();

    let with_token = || {
        Request::builder()
            .uri("/admin/metrics")
            .header("x-one-time-token", "otac-123")
            .body(Body::empty())
            .unwrap()
    };

    let response = router.clone().oneshot(with_token()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello alice");

    // Replay: the token was consumed by the first authentication.
    let response = router.oneshot(with_token()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(start_paused = true)]
async fn expired_one_time_token_is_rejected_and_removed() {
    let config = OneTimeTokenConfig {
        // Keep the sweeper far away so this test exercises the expiry check
        // on the authentication path itself.
        sweep_interval_secs: 100_000,
        ..OneTimeTokenConfig::default()
    };
    let one_time = Arc::new(InMemoryAuthenticator::new(Arc::new(StaticDirectory), &config));
    let authenticator = TestAuthenticator::with_one_time(Arc::clone(&one_time));
    let router = router(authenticator, AuthMode::Proactive);

    let alice = Identity::builder().principal("alice").build();
    one_time
        .store(
            &alice,
            Zeroizing::new("otac-456".to_owned()),
            &TokenRequestInfo {
                expires_in: Duration::from_secs(60),
                redirect_location: None,
            },
        )
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;

    let request = Request::builder()
        .uri("/admin/metrics")
        .header("x-one-time-token", "otac-456")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    // Generic rejection, and the failed attempt removed the token.
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(one_time.store_handle().is_empty());
}
