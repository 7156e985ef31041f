//! Builds and serves the per-endpoint filter lists.
//!
//! Built once from the discovered registrations, then frozen. Filters with
//! predicates are grouped per endpoint with the predicates AND-combined;
//! filters without predicates are unconditional and always returned for
//! their endpoint categories. Registrations under [`Endpoint::All`] are
//! propagated to every concrete category at build time, without duplicating
//! a filter that was also registered explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{
    Endpoint, OidcRequestContext, OidcResponseContext, RequestFilter, RequestPredicate,
    ResponseFilter, ResponsePredicate,
};

/// A request filter together with its declared bindings.
pub struct RequestFilterRegistration {
    filter: Arc<dyn RequestFilter>,
    endpoints: Vec<Endpoint>,
    predicates: Vec<Arc<dyn RequestPredicate>>,
}

impl RequestFilterRegistration {
    #[must_use]
    pub fn new(filter: Arc<dyn RequestFilter>) -> Self {
        Self {
            filter,
            endpoints: Vec::new(),
            predicates: Vec::new(),
        }
    }

    /// Bind the filter to an endpoint category. Without any binding the
    /// filter applies to [`Endpoint::All`].
    #[must_use]
    pub fn on(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Add a predicate; all predicates of a filter must hold for it to run.
    #[must_use]
    pub fn when(mut self, predicate: Arc<dyn RequestPredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }
}

/// A response filter together with its declared bindings.
pub struct ResponseFilterRegistration {
    filter: Arc<dyn ResponseFilter>,
    endpoints: Vec<Endpoint>,
    predicates: Vec<Arc<dyn ResponsePredicate>>,
}

impl ResponseFilterRegistration {
    #[must_use]
    pub fn new(filter: Arc<dyn ResponseFilter>) -> Self {
        Self {
            filter,
            endpoints: Vec::new(),
            predicates: Vec::new(),
        }
    }

    #[must_use]
    pub fn on(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    #[must_use]
    pub fn when(mut self, predicate: Arc<dyn ResponsePredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }
}

#[derive(Clone)]
struct ConditionalRequest {
    filter: Arc<dyn RequestFilter>,
    condition: Vec<Arc<dyn RequestPredicate>>,
}

#[derive(Clone)]
struct ConditionalResponse {
    filter: Arc<dyn ResponseFilter>,
    condition: Vec<Arc<dyn ResponsePredicate>>,
}

/// Immutable endpoint-to-filters index.
pub struct FilterStorage {
    request: HashMap<Endpoint, Vec<Arc<dyn RequestFilter>>>,
    response: HashMap<Endpoint, Vec<Arc<dyn ResponseFilter>>>,
    conditional_request: HashMap<Endpoint, Vec<ConditionalRequest>>,
    conditional_response: HashMap<Endpoint, Vec<ConditionalResponse>>,
    empty: bool,
}

impl FilterStorage {
    /// Classify the registrations and freeze the storage. Called once.
    #[must_use]
    pub fn build(
        request_registrations: Vec<RequestFilterRegistration>,
        response_registrations: Vec<ResponseFilterRegistration>,
    ) -> Self {
        let mut request: HashMap<Endpoint, Vec<Arc<dyn RequestFilter>>> = HashMap::new();
        let mut conditional_request: HashMap<Endpoint, Vec<ConditionalRequest>> = HashMap::new();

        for registration in request_registrations {
            let endpoints = declared_endpoints(registration.endpoints);
            // A filter with zero predicates is always unconditional:
            // it must run, never be silently dropped.
            if registration.predicates.is_empty() {
                for endpoint in endpoints {
                    request
                        .entry(endpoint)
                        .or_default()
                        .push(Arc::clone(&registration.filter));
                }
            } else {
                for endpoint in endpoints {
                    conditional_request
                        .entry(endpoint)
                        .or_default()
                        .push(ConditionalRequest {
                            filter: Arc::clone(&registration.filter),
                            condition: registration.predicates.clone(),
                        });
                }
            }
        }

        let mut response: HashMap<Endpoint, Vec<Arc<dyn ResponseFilter>>> = HashMap::new();
        let mut conditional_response: HashMap<Endpoint, Vec<ConditionalResponse>> = HashMap::new();

        for registration in response_registrations {
            let endpoints = declared_endpoints(registration.endpoints);
            if registration.predicates.is_empty() {
                for endpoint in endpoints {
                    response
                        .entry(endpoint)
                        .or_default()
                        .push(Arc::clone(&registration.filter));
                }
            } else {
                for endpoint in endpoints {
                    conditional_response
                        .entry(endpoint)
                        .or_default()
                        .push(ConditionalResponse {
                            filter: Arc::clone(&registration.filter),
                            condition: registration.predicates.clone(),
                        });
                }
            }
        }

        broadcast_all(&mut request, |a, b| Arc::ptr_eq(a, b));
        broadcast_all(&mut response, |a, b| Arc::ptr_eq(a, b));
        broadcast_all(&mut conditional_request, |a, b| {
            Arc::ptr_eq(&a.filter, &b.filter)
        });
        broadcast_all(&mut conditional_response, |a, b| {
            Arc::ptr_eq(&a.filter, &b.filter)
        });

        let empty = request.is_empty()
            && response.is_empty()
            && conditional_request.is_empty()
            && conditional_response.is_empty();

        tracing::debug!(
            request_endpoints = request.len(),
            response_endpoints = response.len(),
            "filter storage frozen"
        );

        Self {
            request,
            response,
            conditional_request,
            conditional_response,
            empty,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Unconditional request filters for an endpoint category.
    #[must_use]
    pub fn request_filters(&self, endpoint: Endpoint) -> Vec<Arc<dyn RequestFilter>> {
        if self.empty {
            return Vec::new();
        }
        self.request.get(&endpoint).cloned().unwrap_or_default()
    }

    /// Request filters for an endpoint, including conditional filters whose
    /// composite predicate holds for `ctx`. Without a context this behaves
    /// exactly like [`request_filters`](Self::request_filters): conditional
    /// filters are never applied without one. Unconditional filters precede
    /// matching conditional ones.
    #[must_use]
    pub fn request_filters_in(
        &self,
        endpoint: Endpoint,
        ctx: Option<&OidcRequestContext>,
    ) -> Vec<Arc<dyn RequestFilter>> {
        if self.empty {
            return Vec::new();
        }
        let (Some(ctx), Some(conditional)) = (ctx, self.conditional_request.get(&endpoint))
        else {
            return self.request_filters(endpoint);
        };

        let mut filters = self.request_filters(endpoint);
        filters.extend(
            conditional
                .iter()
                .filter(|item| item.condition.iter().all(|p| p.test(ctx)))
                .map(|item| Arc::clone(&item.filter)),
        );
        filters
    }

    /// Unconditional response filters for an endpoint category.
    #[must_use]
    pub fn response_filters(&self, endpoint: Endpoint) -> Vec<Arc<dyn ResponseFilter>> {
        if self.empty {
            return Vec::new();
        }
        self.response.get(&endpoint).cloned().unwrap_or_default()
    }

    /// Response-side twin of [`request_filters_in`](Self::request_filters_in).
    #[must_use]
    pub fn response_filters_in(
        &self,
        endpoint: Endpoint,
        ctx: Option<&OidcResponseContext>,
    ) -> Vec<Arc<dyn ResponseFilter>> {
        if self.empty {
            return Vec::new();
        }
        let (Some(ctx), Some(conditional)) = (ctx, self.conditional_response.get(&endpoint))
        else {
            return self.response_filters(endpoint);
        };

        let mut filters = self.response_filters(endpoint);
        filters.extend(
            conditional
                .iter()
                .filter(|item| item.condition.iter().all(|p| p.test(ctx)))
                .map(|item| Arc::clone(&item.filter)),
        );
        filters
    }
}

fn declared_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    if endpoints.is_empty() {
        vec![Endpoint::All]
    } else {
        endpoints
    }
}

/// Copy every [`Endpoint::All`] item into the concrete endpoint lists,
/// skipping filters that are already registered there explicitly.
fn broadcast_all<T: Clone>(
    map: &mut HashMap<Endpoint, Vec<T>>,
    same: impl Fn(&T, &T) -> bool,
) {
    let Some(broadcast) = map.get(&Endpoint::All).cloned() else {
        return;
    };
    if broadcast.is_empty() {
        return;
    }
    for endpoint in Endpoint::CONCRETE {
        let list = map.entry(endpoint).or_default();
        for item in &broadcast {
            if !list.iter().any(|existing| same(existing, item)) {
                list.push(item.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::properties;

    /// Appends its name to the `applied` context property.
    struct Tagging {
        name: &'static str,
    }

    impl Tagging {
        fn shared(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name })
        }
    }

    impl RequestFilter for Tagging {
        fn filter(&self, ctx: &mut OidcRequestContext) {
            let applied = match ctx.property("applied") {
                Some(existing) => format!("{existing},{}", self.name),
                None => self.name.to_owned(),
            };
            ctx.set_property("applied", applied);
        }
    }

    impl ResponseFilter for Tagging {
        fn filter(&self, ctx: &mut OidcResponseContext) {
            ctx.set_property("applied", self.name);
        }
    }

    struct PropertyEquals {
        name: &'static str,
        value: &'static str,
    }

    impl RequestPredicate for PropertyEquals {
        fn test(&self, ctx: &OidcRequestContext) -> bool {
            ctx.property(self.name) == Some(self.value)
        }
    }

    fn apply_all(filters: &[Arc<dyn RequestFilter>], ctx: &mut OidcRequestContext) {
        for filter in filters {
            filter.filter(ctx);
        }
    }

    #[test]
    fn empty_storage_fast_path() {
        let storage = FilterStorage::build(Vec::new(), Vec::new());
        assert!(storage.is_empty());
        assert!(storage.request_filters(Endpoint::Token).is_empty());
        let ctx = OidcRequestContext::new("POST", "https://issuer/token");
        assert!(storage.request_filters_in(Endpoint::Token, Some(&ctx)).is_empty());
    }

    #[test]
    fn unbound_filter_defaults_to_all_endpoints() {
        let storage = FilterStorage::build(
            vec![RequestFilterRegistration::new(Tagging::shared("everywhere"))],
            Vec::new(),
        );

        for endpoint in Endpoint::CONCRETE {
            assert_eq!(storage.request_filters(endpoint).len(), 1, "{endpoint:?}");
        }
        assert_eq!(storage.request_filters(Endpoint::All).len(), 1);
    }

    #[test]
    fn broadcast_does_not_duplicate_explicit_registration() {
        let filter = Tagging::shared("token-and-all");
        let storage = FilterStorage::build(
            vec![
                RequestFilterRegistration::new(filter.clone()).on(Endpoint::All),
                RequestFilterRegistration::new(filter).on(Endpoint::Token),
            ],
            Vec::new(),
        );

        assert_eq!(storage.request_filters(Endpoint::Token).len(), 1);
        assert_eq!(storage.request_filters(Endpoint::Discovery).len(), 1);
    }

    #[test]
    fn endpoint_scoped_filter_stays_scoped() {
        let storage = FilterStorage::build(
            vec![RequestFilterRegistration::new(Tagging::shared("token-only")).on(Endpoint::Token)],
            Vec::new(),
        );

        assert_eq!(storage.request_filters(Endpoint::Token).len(), 1);
        assert!(storage.request_filters(Endpoint::Discovery).is_empty());
        assert!(storage.request_filters(Endpoint::Jwks).is_empty());
    }

    #[test]
    fn conditional_filter_requires_every_predicate() {
        let storage = FilterStorage::build(
            vec![
                RequestFilterRegistration::new(Tagging::shared("conditional"))
                    .on(Endpoint::Token)
                    .when(Arc::new(PropertyEquals {
                        name: properties::TENANT_ID,
                        value: "acme",
                    }))
                    .when(Arc::new(PropertyEquals {
                        name: properties::AUTH_MECHANISM,
                        value: "Bearer",
                    })),
            ],
            Vec::new(),
        );

        let both = OidcRequestContext::new("POST", "https://issuer/token")
            .with_property(properties::TENANT_ID, "acme")
            .with_property(properties::AUTH_MECHANISM, "Bearer");
        assert_eq!(storage.request_filters_in(Endpoint::Token, Some(&both)).len(), 1);

        let only_one = OidcRequestContext::new("POST", "https://issuer/token")
            .with_property(properties::TENANT_ID, "acme");
        assert!(storage.request_filters_in(Endpoint::Token, Some(&only_one)).is_empty());
    }

    #[test]
    fn missing_context_behaves_unconditionally() {
        let storage = FilterStorage::build(
            vec![
                RequestFilterRegistration::new(Tagging::shared("unconditional")).on(Endpoint::Token),
                RequestFilterRegistration::new(Tagging::shared("conditional"))
                    .on(Endpoint::Token)
                    .when(Arc::new(PropertyEquals {
                        name: properties::TENANT_ID,
                        value: "acme",
                    })),
            ],
            Vec::new(),
        );

        let filters = storage.request_filters_in(Endpoint::Token, None);
        assert_eq!(filters.len(), 1);

        let mut ctx = OidcRequestContext::new("POST", "https://issuer/token");
        apply_all(&filters, &mut ctx);
        assert_eq!(ctx.property("applied"), Some("unconditional"));
    }

    #[test]
    fn unconditional_filters_precede_conditional() {
        let storage = FilterStorage::build(
            vec![
                RequestFilterRegistration::new(Tagging::shared("second"))
                    .on(Endpoint::Token)
                    .when(Arc::new(PropertyEquals {
                        name: properties::TENANT_ID,
                        value: "acme",
                    })),
                RequestFilterRegistration::new(Tagging::shared("first")).on(Endpoint::Token),
            ],
            Vec::new(),
        );

        let mut ctx = OidcRequestContext::new("POST", "https://issuer/token")
            .with_property(properties::TENANT_ID, "acme");
        let filters = storage.request_filters_in(Endpoint::Token, Some(&ctx.clone()));
        assert_eq!(filters.len(), 2);
        apply_all(&filters, &mut ctx);
        assert_eq!(ctx.property("applied"), Some("first,second"));
    }

    #[test]
    fn conditional_all_registration_broadcasts() {
        let storage = FilterStorage::build(
            vec![
                RequestFilterRegistration::new(Tagging::shared("conditional-everywhere"))
                    .when(Arc::new(PropertyEquals {
                        name: properties::TENANT_ID,
                        value: "acme",
                    })),
            ],
            Vec::new(),
        );

        let ctx = OidcRequestContext::new("GET", "https://issuer/.well-known")
            .with_property(properties::TENANT_ID, "acme");
        for endpoint in Endpoint::CONCRETE {
            assert_eq!(
                storage.request_filters_in(endpoint, Some(&ctx)).len(),
                1,
                "{endpoint:?}"
            );
        }
    }

    #[test]
    fn response_filters_mirror_request_side() {
        let storage = FilterStorage::build(
            Vec::new(),
            vec![ResponseFilterRegistration::new(Tagging::shared("resp")).on(Endpoint::Jwks)],
        );

        assert!(!storage.is_empty());
        assert_eq!(storage.response_filters(Endpoint::Jwks).len(), 1);
        assert!(storage.response_filters(Endpoint::Token).is_empty());

        let mut ctx = OidcResponseContext::new(200);
        for filter in storage.response_filters_in(Endpoint::Jwks, Some(&ctx.clone())) {
            filter.filter(&mut ctx);
        }
        assert_eq!(ctx.property("applied"), Some("resp"));
    }
}
