//! Handles requests to generate and deliver a one-time authentication token.
//!
//! The generate-send-store sequence runs detached from the response: the
//! caller always gets the same immediate answer, so response latency never
//! reveals whether the username was recognized.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha512};
use vigil_security::{Identity, SecurityError, SecurityEvent, SecurityEventKind, SecurityEvents};
use zeroize::Zeroizing;

use crate::authenticator::{OneTimeTokenAuthenticator, TokenRequestInfo};
use crate::config::OneTimeTokenConfig;

/// Delivers a generated token to the user over an out-of-band channel
/// (mail, messenger). The pipeline only stores and validates tokens.
#[async_trait]
pub trait OneTimeTokenSender: Send + Sync {
    /// # Errors
    ///
    /// Transport failures; the token is not stored when delivery failed.
    async fn send(&self, identity: &Identity, raw_token: &str) -> Result<(), SecurityError>;
}

/// What the external cookie/redirect responder should do with the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequestOutcome {
    pub status: u16,
    pub redirect_location: Option<String>,
    /// Opaque correlation payload for the responder's cookie,
    /// `principal '-' sha512(token)`.
    pub cookie_payload: String,
}

/// Orchestrates one-time-token generation for a username.
pub struct OneTimeTokenRequestHandler {
    authenticator: Arc<dyn OneTimeTokenAuthenticator>,
    sender: Arc<dyn OneTimeTokenSender>,
    events: Arc<SecurityEvents>,
    config: OneTimeTokenConfig,
}

impl OneTimeTokenRequestHandler {
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn OneTimeTokenAuthenticator>,
        sender: Arc<dyn OneTimeTokenSender>,
        events: Arc<SecurityEvents>,
        config: OneTimeTokenConfig,
    ) -> Self {
        Self {
            authenticator,
            sender,
            events,
            config,
        }
    }

    /// Accept a token request for `username`. `identity` is the asynchronous
    /// provider lookup for that username; it is awaited on a detached task so
    /// the returned outcome is identical for known and unknown users.
    pub fn handle_token_request(
        &self,
        identity: impl Future<Output = Result<Arc<Identity>, SecurityError>> + Send + 'static,
        username: &str,
        redirect_location: Option<String>,
    ) -> TokenRequestOutcome {
        let raw_token = generate_token(username);
        let cookie_payload = format!("{username}-{}", sha512_hex(raw_token.as_bytes()));

        self.dispatch(identity, username.to_owned(), raw_token, redirect_location);

        match &self.config.request_redirect_path {
            Some(path) => TokenRequestOutcome {
                status: 302,
                redirect_location: Some(path.clone()),
                cookie_payload,
            },
            None => TokenRequestOutcome {
                status: 204,
                redirect_location: None,
                cookie_payload,
            },
        }
    }

    /// Correlate a presented token with a stored cookie payload, returning
    /// the principal the token was generated for.
    #[must_use]
    pub fn find_principal_by_token(cookie_payload: &str, presented_token: &str) -> Option<String> {
        if presented_token.is_empty() {
            return None;
        }
        let (principal, stored_hash) = cookie_payload.rsplit_once('-')?;
        if sha512_hex(presented_token.as_bytes()) == stored_hash {
            Some(principal.to_owned())
        } else {
            tracing::debug!("presented token does not match the sent token");
            None
        }
    }

    fn dispatch(
        &self,
        identity: impl Future<Output = Result<Arc<Identity>, SecurityError>> + Send + 'static,
        username: String,
        raw_token: Zeroizing<String>,
        redirect_location: Option<String>,
    ) {
        let authenticator = Arc::clone(&self.authenticator);
        let sender = Arc::clone(&self.sender);
        let events = Arc::clone(&self.events);
        let request = TokenRequestInfo {
            expires_in: self.config.expires_in(),
            redirect_location,
        };

        tokio::spawn(async move {
            let outcome = send_and_store(
                identity,
                &username,
                raw_token,
                &request,
                authenticator.as_ref(),
                sender.as_ref(),
            )
            .await;

            match outcome {
                Ok(identity) => {
                    events.fire_with(SecurityEventKind::AuthenticationSuccess, || {
                        SecurityEvent::authentication_success(identity.clone())
                            .with_property("one-time-token-request", serde_json::Value::Bool(true))
                    });
                }
                Err(failure) => {
                    tracing::debug!(
                        username = %username,
                        cause = %failure,
                        "one-time token request failed"
                    );
                    events.fire_with(SecurityEventKind::AuthenticationFailure, || {
                        SecurityEvent::authentication_failure(failure.clone())
                            .with_property("one-time-token-request", serde_json::Value::Bool(true))
                    });
                }
            }
        });
    }
}

async fn send_and_store(
    identity: impl Future<Output = Result<Arc<Identity>, SecurityError>> + Send,
    username: &str,
    raw_token: Zeroizing<String>,
    request: &TokenRequestInfo,
    authenticator: &dyn OneTimeTokenAuthenticator,
    sender: &dyn OneTimeTokenSender,
) -> Result<Arc<Identity>, SecurityError> {
    let identity = identity.await?;
    if identity.is_anonymous() {
        // The provider should have failed; incorrect credentials must surface
        // as an authentication failure, never as a stored token.
        return Err(SecurityError::authentication_failed(format!(
            "failed to authenticate user {username}"
        )));
    }

    tracing::debug!(username = %username, "received one-time authentication token request");
    sender.send(&identity, raw_token.as_str()).await?;
    authenticator.store(&identity, raw_token, request).await?;
    Ok(identity)
}

/// The principal digest prefix keeps tokens of different users distinct even
/// under identical randomness; the UUID supplies the entropy.
fn generate_token(username: &str) -> Zeroizing<String> {
    Zeroizing::new(format!(
        "{}{}",
        sha512_hex(username.as_bytes()),
        uuid::Uuid::new_v4()
    ))
}

fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}
