//! Authentication and authorization audit events.
//!
//! Event payloads are only constructed when at least one sink observes the
//! event kind, which is probed once at construction time. The hot path pays a
//! single boolean test per firing when nothing is listening.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SecurityError;
use crate::identity::Identity;

/// Closed set of audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    AuthenticationSuccess,
    AuthenticationFailure,
    AuthorizationSuccess,
    AuthorizationFailure,
}

impl SecurityEventKind {
    pub const ALL: [SecurityEventKind; 4] = [
        SecurityEventKind::AuthenticationSuccess,
        SecurityEventKind::AuthenticationFailure,
        SecurityEventKind::AuthorizationSuccess,
        SecurityEventKind::AuthorizationFailure,
    ];

    fn index(self) -> usize {
        match self {
            SecurityEventKind::AuthenticationSuccess => 0,
            SecurityEventKind::AuthenticationFailure => 1,
            SecurityEventKind::AuthorizationSuccess => 2,
            SecurityEventKind::AuthorizationFailure => 3,
        }
    }
}

/// An audit event fired around authentication and authorization decisions.
#[derive(Debug, Clone)]
pub struct SecurityEvent {
    kind: SecurityEventKind,
    /// Identity involved, when one was resolved.
    identity: Option<Arc<Identity>>,
    /// Free-form context label, e.g. the security-check kind applied.
    context: Option<String>,
    /// The failure that triggered a failure event.
    failure: Option<SecurityError>,
    properties: HashMap<String, serde_json::Value>,
}

impl SecurityEvent {
    #[must_use]
    pub fn authentication_success(identity: Arc<Identity>) -> Self {
        Self::new(SecurityEventKind::AuthenticationSuccess, Some(identity), None, None)
    }

    #[must_use]
    pub fn authentication_failure(failure: SecurityError) -> Self {
        Self::new(SecurityEventKind::AuthenticationFailure, None, None, Some(failure))
    }

    #[must_use]
    pub fn authorization_success(identity: Option<Arc<Identity>>, context: Option<&str>) -> Self {
        Self::new(
            SecurityEventKind::AuthorizationSuccess,
            identity,
            context.map(str::to_owned),
            None,
        )
    }

    #[must_use]
    pub fn authorization_failure(
        identity: Option<Arc<Identity>>,
        failure: SecurityError,
        context: &str,
    ) -> Self {
        Self::new(
            SecurityEventKind::AuthorizationFailure,
            identity,
            Some(context.to_owned()),
            Some(failure),
        )
    }

    fn new(
        kind: SecurityEventKind,
        identity: Option<Arc<Identity>>,
        context: Option<String>,
        failure: Option<SecurityError>,
    ) -> Self {
        Self {
            kind,
            identity,
            context,
            failure,
            properties: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn kind(&self) -> SecurityEventKind {
        self.kind
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Arc<Identity>> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    #[must_use]
    pub fn failure(&self) -> Option<&SecurityError> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn properties(&self) -> &HashMap<String, serde_json::Value> {
        &self.properties
    }
}

/// An observer of [`SecurityEvent`]s, e.g. an audit log appender.
pub trait AuditSink: Send + Sync {
    /// Which event kinds this sink wants. Probed once at startup; a sink
    /// returning `false` for a kind never sees events of that kind.
    fn observes(&self, kind: SecurityEventKind) -> bool {
        let _ = kind;
        true
    }

    fn on_event(&self, event: &SecurityEvent);
}

/// Event dispatcher with firing decisions fixed at construction.
pub struct SecurityEvents {
    sinks: Vec<Arc<dyn AuditSink>>,
    fire: [bool; 4],
}

impl SecurityEvents {
    /// Probe every sink once per event kind. With `enabled == false` no event
    /// ever fires, regardless of sinks.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>, enabled: bool) -> Self {
        let mut fire = [false; 4];
        if enabled {
            for kind in SecurityEventKind::ALL {
                fire[kind.index()] = sinks.iter().any(|sink| sink.observes(kind));
            }
        }
        Self { sinks, fire }
    }

    /// A dispatcher that never fires.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sinks: Vec::new(),
            fire: [false; 4],
        }
    }

    /// Whether events of `kind` would be delivered.
    #[must_use]
    pub fn fires(&self, kind: SecurityEventKind) -> bool {
        self.fire[kind.index()]
    }

    /// Fire an event of `kind`, constructing the payload only when observed.
    pub fn fire_with(&self, kind: SecurityEventKind, build: impl FnOnce() -> SecurityEvent) {
        if !self.fires(kind) {
            return;
        }
        let event = build();
        for sink in &self.sinks {
            if sink.observes(kind) {
                sink.on_event(&event);
            }
        }
    }
}
