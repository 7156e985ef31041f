//! Runs method-level security checks against the request identity.

use std::sync::Arc;

use crate::check::{CheckStorage, MethodKey};
use crate::deferred::RequestIdentity;
use crate::error::SecurityError;
use crate::events::{SecurityEvent, SecurityEventKind, SecurityEvents};
use crate::identity::Identity;

/// Applies registered [`SecurityCheck`](crate::check::SecurityCheck)s to
/// method invocations, firing authorization audit events when observed.
///
/// Unsecured methods and permit-all checks never resolve the identity; the
/// cost of resolution is only paid when a check actually needs the caller.
pub struct SecurityConstrainer {
    storage: Arc<CheckStorage>,
    events: Arc<SecurityEvents>,
}

impl SecurityConstrainer {
    #[must_use]
    pub fn new(storage: Arc<CheckStorage>, events: Arc<SecurityEvents>) -> Self {
        Self { storage, events }
    }

    /// Synchronous check, for execution contexts where the identity is
    /// already bound (or resolution is known to have completed).
    ///
    /// # Errors
    ///
    /// - [`SecurityError::BlockingNotAllowed`] when the identity is still
    ///   unresolved; blocking here would stall the event loop.
    /// - The check's own failure otherwise, after firing a failure event.
    pub fn check(
        &self,
        method: &MethodKey,
        request: &RequestIdentity,
    ) -> Result<(), SecurityError> {
        let check = self.storage.get(method);
        let mut identity: Option<Arc<Identity>> = None;

        if let Some(check) = check
            && !check.is_permit_all()
        {
            let resolved = request.current()?;
            if let Err(failure) = check.apply(&resolved) {
                tracing::debug!(method = %method, check = check.kind_label(), "security check rejected");
                self.events
                    .fire_with(SecurityEventKind::AuthorizationFailure, || {
                        SecurityEvent::authorization_failure(
                            Some(Arc::clone(&resolved)),
                            failure.clone(),
                            check.kind_label(),
                        )
                    });
                return Err(failure);
            }
            identity = Some(resolved);
        }

        self.events
            .fire_with(SecurityEventKind::AuthorizationSuccess, || {
                SecurityEvent::authorization_success(
                    identity.clone(),
                    check.map(|c| c.kind_label()),
                )
            });
        Ok(())
    }

    /// Non-blocking check: resolves the deferred identity and attaches event
    /// emission around the check outcome.
    ///
    /// # Errors
    ///
    /// Authentication failures from identity resolution propagate unchanged;
    /// check failures propagate after the failure event fires.
    pub async fn check_async(
        &self,
        method: &MethodKey,
        request: &RequestIdentity,
    ) -> Result<(), SecurityError> {
        let check = self.storage.get(method);
        let mut identity: Option<Arc<Identity>> = None;

        if let Some(check) = check
            && !check.is_permit_all()
        {
            let resolved = request.resolve().await?;
            if let Err(failure) = check.apply(&resolved) {
                tracing::debug!(method = %method, check = check.kind_label(), "security check rejected");
                self.events
                    .fire_with(SecurityEventKind::AuthorizationFailure, || {
                        SecurityEvent::authorization_failure(
                            Some(Arc::clone(&resolved)),
                            failure.clone(),
                            check.kind_label(),
                        )
                    });
                return Err(failure);
            }
            identity = Some(resolved);
        }

        self.events
            .fire_with(SecurityEventKind::AuthorizationSuccess, || {
                SecurityEvent::authorization_success(
                    identity.clone(),
                    check.map(|c| c.kind_label()),
                )
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::check::SecurityCheck;
    use crate::events::AuditSink;

    struct Recording {
        events: Mutex<Vec<SecurityEventKind>>,
    }

    impl AuditSink for Recording {
        fn on_event(&self, event: &SecurityEvent) {
            self.events.lock().push(event.kind());
        }
    }

    fn storage() -> Arc<CheckStorage> {
        Arc::new(
            CheckStorage::builder()
                .register("Api", "admin_op", SecurityCheck::RolesAllowed(vec!["admin".to_owned()]))
                .register("Api", "open_op", SecurityCheck::PermitAll)
                .build(),
        )
    }

    fn authenticated_request(principal: &str, role: &str) -> RequestIdentity {
        let identity = Identity::builder().principal(principal).role(role).build();
        RequestIdentity::new(async move { Ok(Arc::new(identity)) })
    }

    #[tokio::test]
    async fn unsecured_method_skips_identity_resolution() {
        let counted = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&counted);
        let request = RequestIdentity::new(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Identity::anonymous()))
        });
        let constrainer = SecurityConstrainer::new(storage(), Arc::new(SecurityEvents::disabled()));

        constrainer
            .check(&MethodKey::new("Api", "unregistered"), &request)
            .unwrap();
        constrainer
            .check(&MethodKey::new("Api", "open_op"), &request)
            .unwrap();

        assert_eq!(counted.load(Ordering::SeqCst), 0, "provider must not run");
    }

    #[tokio::test]
    async fn blocking_check_on_unresolved_identity_is_forbidden() {
        let request = authenticated_request("alice", "admin");
        let constrainer = SecurityConstrainer::new(storage(), Arc::new(SecurityEvents::disabled()));

        let err = constrainer
            .check(&MethodKey::new("Api", "admin_op"), &request)
            .unwrap_err();
        assert!(matches!(err, SecurityError::BlockingNotAllowed { .. }));
    }

    #[tokio::test]
    async fn blocking_check_succeeds_once_identity_is_bound() {
        let request = authenticated_request("alice", "admin");
        request.resolve().await.unwrap();

        let constrainer = SecurityConstrainer::new(storage(), Arc::new(SecurityEvents::disabled()));
        constrainer
            .check(&MethodKey::new("Api", "admin_op"), &request)
            .unwrap();
    }

    #[tokio::test]
    async fn async_check_applies_and_fires_events() {
        let sink = Arc::new(Recording { events: Mutex::new(Vec::new()) });
        let events = Arc::new(SecurityEvents::new(vec![sink.clone()], true));
        let constrainer = SecurityConstrainer::new(storage(), events);

        let request = authenticated_request("alice", "admin");
        constrainer
            .check_async(&MethodKey::new("Api", "admin_op"), &request)
            .await
            .unwrap();

        let request = authenticated_request("mallory", "user");
        let err = constrainer
            .check_async(&MethodKey::new("Api", "admin_op"), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::AuthorizationDenied { .. }));

        let seen = sink.events.lock().clone();
        assert_eq!(
            seen,
            vec![
                SecurityEventKind::AuthorizationSuccess,
                SecurityEventKind::AuthorizationFailure,
            ]
        );
    }

    #[tokio::test]
    async fn success_event_fires_for_permit_all_without_identity() {
        let sink = Arc::new(Recording { events: Mutex::new(Vec::new()) });
        let events = Arc::new(SecurityEvents::new(vec![sink.clone()], true));
        let constrainer = SecurityConstrainer::new(storage(), events);

        let request = authenticated_request("alice", "admin");
        constrainer
            .check(&MethodKey::new("Api", "open_op"), &request)
            .unwrap();

        let seen = sink.events.lock().clone();
        assert_eq!(seen, vec![SecurityEventKind::AuthorizationSuccess]);
    }
}
