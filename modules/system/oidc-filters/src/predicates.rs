//! Built-in filter predicates.

use crate::types::{
    OidcRequestContext, OidcResponseContext, RequestPredicate, ResponsePredicate, properties,
};

/// Holds when the call is made on behalf of one of the configured tenants.
/// A context without a tenant property never matches.
pub struct TenantFeaturePredicate {
    tenant_ids: Vec<String>,
}

impl TenantFeaturePredicate {
    #[must_use]
    pub fn new(tenant_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            tenant_ids: tenant_ids.into_iter().collect(),
        }
    }

    fn applies_to(&self, tenant_id: Option<&str>) -> bool {
        match tenant_id {
            Some(tenant_id) => self.tenant_ids.iter().any(|id| id == tenant_id),
            None => false,
        }
    }
}

impl RequestPredicate for TenantFeaturePredicate {
    fn test(&self, ctx: &OidcRequestContext) -> bool {
        self.applies_to(ctx.property(properties::TENANT_ID))
    }
}

impl ResponsePredicate for TenantFeaturePredicate {
    fn test(&self, ctx: &OidcResponseContext) -> bool {
        self.applies_to(ctx.property(properties::TENANT_ID))
    }
}

/// Holds when the call was driven by the given authentication mechanism,
/// e.g. [`BEARER_SCHEME`](crate::types::BEARER_SCHEME).
pub struct AuthMechanismPredicate {
    mechanism: String,
}

impl AuthMechanismPredicate {
    #[must_use]
    pub fn new(mechanism: impl Into<String>) -> Self {
        Self {
            mechanism: mechanism.into(),
        }
    }
}

impl RequestPredicate for AuthMechanismPredicate {
    fn test(&self, ctx: &OidcRequestContext) -> bool {
        ctx.property(properties::AUTH_MECHANISM) == Some(self.mechanism.as_str())
    }
}

impl ResponsePredicate for AuthMechanismPredicate {
    fn test(&self, ctx: &OidcResponseContext) -> bool {
        ctx.property(properties::AUTH_MECHANISM) == Some(self.mechanism.as_str())
    }
}
