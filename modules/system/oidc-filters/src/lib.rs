//! Endpoint-scoped request/response filters for calls to security-sensitive
//! endpoints (token exchange, discovery, userinfo and friends).
//!
//! Filters declare which [`Endpoint`] categories they apply to (default: all)
//! and optionally a set of predicates; predicates are AND-combined and
//! evaluated against a per-call context. [`FilterStorage`] is built once at
//! startup and immutable afterwards.

pub mod predicates;
pub mod storage;
pub mod types;

pub use predicates::{AuthMechanismPredicate, TenantFeaturePredicate};
pub use storage::{
    FilterStorage, RequestFilterRegistration, ResponseFilterRegistration,
};
pub use types::{
    BEARER_SCHEME, Endpoint, OidcRequestContext, OidcResponseContext, RequestFilter,
    RequestPredicate, ResponseFilter, ResponsePredicate, properties,
};
