//! One-time authentication tokens: single-use, time-bounded credentials that
//! substitute for a full login.
//!
//! Raw tokens are never kept: only a SHA-512 digest is stored, and the
//! in-memory copy of a raw token is zeroed as soon as it has been hashed.
//! At most one live token exists per principal. Expired entries are swept by
//! a periodic background task that never blocks authentication calls.

pub mod authenticator;
pub mod config;
pub mod request_handler;
pub mod store;

pub use authenticator::{
    InMemoryAuthenticator, OneTimeTokenAuthentication, OneTimeTokenAuthenticator,
    TokenRequestInfo, TrustedIdentityProvider,
};
pub use config::OneTimeTokenConfig;
pub use request_handler::{OneTimeTokenRequestHandler, OneTimeTokenSender, TokenRequestOutcome};
pub use store::{ConsumedToken, InMemoryTokenStore, TokenStoreError};
