//! One-time-token authentication over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vigil_security::{Identity, SecurityError};
use zeroize::Zeroizing;

use crate::config::OneTimeTokenConfig;
use crate::store::{InMemoryTokenStore, spawn_sweeper};

/// Trusted identity lookup by principal name, bypassing credential checks.
/// A one-time token proves possession; the provider supplies roles and
/// attributes for the stored principal.
#[async_trait]
pub trait TrustedIdentityProvider: Send + Sync {
    /// # Errors
    ///
    /// `AuthenticationFailed` when the principal is no longer known.
    async fn identity(&self, principal: &str) -> Result<Arc<Identity>, SecurityError>;
}

/// Contextual information about the request that generated a token.
#[derive(Debug, Clone)]
pub struct TokenRequestInfo {
    /// Token lifetime.
    pub expires_in: Duration,
    /// Absolute URL the user was on when requesting the token; surfaced again
    /// after successful authentication. Optional.
    pub redirect_location: Option<String>,
}

/// Result of a successful one-time-token authentication.
#[derive(Debug, Clone)]
pub struct OneTimeTokenAuthentication {
    pub identity: Arc<Identity>,
    /// Stored redirect location, if the token request carried one.
    pub redirect_location: Option<String>,
}

/// Stores generated one-time tokens and authenticates callers presenting one.
#[async_trait]
pub trait OneTimeTokenAuthenticator: Send + Sync {
    /// Store a generated token for the identity. Only one token is allowed
    /// per principal; a prior token is replaced.
    ///
    /// # Errors
    ///
    /// Internal faults only (blank principal, digest collision).
    async fn store(
        &self,
        identity: &Identity,
        raw_token: Zeroizing<String>,
        request: &TokenRequestInfo,
    ) -> Result<(), SecurityError>;

    /// Authenticate a presented token. Expired or unknown tokens fail with a
    /// uniform authentication failure.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` with a cause that does not distinguish unknown
    /// from expired tokens.
    async fn authenticate(
        &self,
        raw_token: Zeroizing<String>,
    ) -> Result<OneTimeTokenAuthentication, SecurityError>;
}

/// [`OneTimeTokenAuthenticator`] over the in-memory store. Not suitable for
/// multi-instance deployments.
pub struct InMemoryAuthenticator {
    store: Arc<InMemoryTokenStore>,
    trusted: Arc<dyn TrustedIdentityProvider>,
    shutdown: CancellationToken,
}

impl InMemoryAuthenticator {
    /// Create the authenticator and start the periodic sweep.
    #[must_use]
    pub fn new(trusted: Arc<dyn TrustedIdentityProvider>, config: &OneTimeTokenConfig) -> Self {
        let store = Arc::new(InMemoryTokenStore::new());
        let shutdown = CancellationToken::new();
        // The sweeper is detached; the cancellation token stops it.
        let _ = spawn_sweeper(Arc::clone(&store), config.sweep_interval(), shutdown.clone());
        Self {
            store,
            trusted,
            shutdown,
        }
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn store_handle(&self) -> Arc<InMemoryTokenStore> {
        Arc::clone(&self.store)
    }
}

impl Drop for InMemoryAuthenticator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl OneTimeTokenAuthenticator for InMemoryAuthenticator {
    async fn store(
        &self,
        identity: &Identity,
        raw_token: Zeroizing<String>,
        request: &TokenRequestInfo,
    ) -> Result<(), SecurityError> {
        self.store
            .store(
                identity.principal(),
                raw_token,
                request.expires_in,
                request.redirect_location.clone(),
            )
            .map_err(SecurityError::from)
    }

    async fn authenticate(
        &self,
        raw_token: Zeroizing<String>,
    ) -> Result<OneTimeTokenAuthentication, SecurityError> {
        let consumed = match self.store.consume(raw_token) {
            Ok(consumed) => consumed,
            Err(cause) => {
                // The internal cause stays observable here; the caller gets
                // the uniform failure.
                tracing::debug!(cause = %cause, "one-time token rejected");
                return Err(cause.into());
            }
        };

        let identity = self.trusted.identity(&consumed.principal).await?;
        Ok(OneTimeTokenAuthentication {
            identity,
            redirect_location: consumed.redirect_location,
        })
    }
}
