//! In-memory expiring credential store keyed by token digest.

use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha512};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vigil_security::SecurityError;
use zeroize::Zeroizing;

/// Internal token validation failures. Externally both rejection causes are
/// indistinguishable (see [`SecurityError`] conversion); the distinction only
/// exists for logging and audit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenStoreError {
    #[error("one-time authentication token is not known")]
    UnknownToken,

    #[error("one-time authentication token has expired")]
    ExpiredToken,

    /// A freshly generated token hashed onto a token of another principal.
    /// This is an internal consistency fault, not a caller error.
    #[error("one-time authentication token hash collision")]
    HashCollision,

    #[error("principal name cannot be blank")]
    BlankPrincipal,
}

impl From<TokenStoreError> for SecurityError {
    fn from(err: TokenStoreError) -> Self {
        match err {
            // Uniform rejection: do not reveal whether the token existed.
            TokenStoreError::UnknownToken | TokenStoreError::ExpiredToken => {
                SecurityError::authentication_failed("one-time authentication token rejected")
            }
            TokenStoreError::HashCollision | TokenStoreError::BlankPrincipal => {
                SecurityError::internal(err.to_string())
            }
        }
    }
}

/// Record stored per live token, keyed by the token digest.
#[derive(Debug, Clone)]
struct TokenRecord {
    principal: String,
    expires_at: Instant,
    redirect_location: Option<String>,
}

/// A token that was removed from the store by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedToken {
    pub principal: String,
    pub redirect_location: Option<String>,
}

/// Concurrent expiring one-time-token store.
///
/// `consume` stays lock-free apart from the atomic removal; only `store`
/// takes the internal critical section protecting the one-token-per-principal
/// invariant.
#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: DashMap<String, TokenRecord>,
    store_guard: Mutex<()>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly generated token for `principal`, evicting any prior
    /// token of the same principal. The raw token is zeroed on return.
    ///
    /// # Errors
    ///
    /// - [`TokenStoreError::BlankPrincipal`] for an empty principal name.
    /// - [`TokenStoreError::HashCollision`] when the digest collides with a
    ///   live token of a different principal.
    pub fn store(
        &self,
        principal: &str,
        raw_token: Zeroizing<String>,
        expires_in: Duration,
        redirect_location: Option<String>,
    ) -> Result<(), TokenStoreError> {
        if principal.trim().is_empty() {
            return Err(TokenStoreError::BlankPrincipal);
        }
        let token_hash = sha512_hex(raw_token.as_bytes());
        drop(raw_token);

        let _guard = self.store_guard.lock();

        if let Some(existing) = self.tokens.get(&token_hash)
            && existing.principal != principal
        {
            return Err(TokenStoreError::HashCollision);
        }

        // One token per principal: a new token invalidates the previous one.
        let previous = self
            .tokens
            .iter()
            .find(|entry| entry.value().principal == principal)
            .map(|entry| entry.key().clone());
        if let Some(previous_hash) = previous {
            self.tokens.remove(&previous_hash);
        }

        self.tokens.insert(
            token_hash,
            TokenRecord {
                principal: principal.to_owned(),
                expires_at: Instant::now() + expires_in,
                redirect_location,
            },
        );
        Ok(())
    }

    /// Consume a presented token: the matching record is removed whatever the
    /// outcome, so a token is usable exactly once. Both failure paths perform
    /// the same hash-remove-inspect work; there is no early return that would
    /// leak whether the token was known.
    ///
    /// # Errors
    ///
    /// [`TokenStoreError::UnknownToken`] or [`TokenStoreError::ExpiredToken`].
    pub fn consume(&self, raw_token: Zeroizing<String>) -> Result<ConsumedToken, TokenStoreError> {
        let token_hash = sha512_hex(raw_token.as_bytes());
        drop(raw_token);

        let removed = self.tokens.remove(&token_hash);
        let now = Instant::now();
        match removed {
            None => Err(TokenStoreError::UnknownToken),
            Some((_, record)) => {
                if now > record.expires_at {
                    Err(TokenStoreError::ExpiredToken)
                } else {
                    Ok(ConsumedToken {
                        principal: record.principal,
                        redirect_location: record.redirect_location,
                    })
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Evict every expired entry. Called by the periodic sweeper; safe to run
    /// concurrently with `store`/`consume`.
    pub fn sweep(&self) {
        if self.tokens.is_empty() {
            return;
        }
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, record| record.expires_at >= now);
        let evicted = before - self.tokens.len();
        if evicted > 0 {
            tracing::debug!(evicted, "swept expired one-time tokens");
        }
    }
}

/// Run the periodic sweep until `shutdown` is cancelled.
pub fn spawn_sweeper(
    store: std::sync::Arc<InMemoryTokenStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; that sweep is a no-op on an empty
        // store.
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => store.sweep(),
            }
        }
    })
}

fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}
