//! Memoized, at-most-once asynchronous identity resolution.
//!
//! A [`DeferredIdentity`] is created once per request. The first observer
//! triggers the authentication provider exactly once; every later observer
//! receives the cached outcome. The provider runs on a detached task, so a
//! caller that goes away mid-resolution (connection closed) does not cancel
//! the computation: the outcome is still cached, it is simply never observed
//! again.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::SecurityError;
use crate::identity::Identity;

/// Outcome of one authentication attempt, shared by every observer.
pub type AuthOutcome = Result<Arc<Identity>, SecurityError>;

type ProviderFuture = Pin<Box<dyn Future<Output = AuthOutcome> + Send + 'static>>;
type SettleHook = Box<dyn FnOnce(&AuthOutcome) + Send + 'static>;

enum State {
    /// Authentication has not been triggered yet.
    Idle {
        provider: ProviderFuture,
        settle: Option<SettleHook>,
    },
    /// Authentication runs (or finished) on a detached task; the receiver
    /// kept here guarantees the published outcome is never lost.
    Started(watch::Receiver<Option<AuthOutcome>>),
}

/// A single-assignment, memoized asynchronous [`Identity`] computation.
pub struct DeferredIdentity {
    state: Mutex<State>,
}

impl DeferredIdentity {
    /// Wrap an authentication attempt. The provider is not polled until the
    /// first call to [`resolve`](Self::resolve).
    pub fn new(provider: impl Future<Output = AuthOutcome> + Send + 'static) -> Self {
        Self {
            state: Mutex::new(State::Idle {
                provider: Box::pin(provider),
                settle: None,
            }),
        }
    }

    /// Install a hook invoked exactly once when the provider settles,
    /// regardless of how many observers are waiting. No-op once triggered.
    #[must_use]
    pub fn on_settle(self, hook: impl FnOnce(&AuthOutcome) + Send + 'static) -> Self {
        if let State::Idle { settle, .. } = &mut *self.state.lock() {
            *settle = Some(Box::new(hook));
        }
        self
    }

    /// Observe the authentication outcome, triggering the provider on first
    /// use. Concurrent observers share one attempt and one outcome.
    pub async fn resolve(&self) -> AuthOutcome {
        let mut rx = self.trigger();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => match outcome.as_ref() {
                Some(outcome) => outcome.clone(),
                None => Err(SecurityError::internal("authentication outcome missing")),
            },
            // The provider task panicked before publishing.
            Err(_) => Err(SecurityError::internal("authentication task aborted")),
        }
    }

    /// The memoized outcome, if the provider was triggered and has settled.
    /// Never triggers resolution.
    #[must_use]
    pub fn try_outcome(&self) -> Option<AuthOutcome> {
        match &*self.state.lock() {
            State::Idle { .. } => None,
            State::Started(rx) => rx.borrow().clone(),
        }
    }

    fn trigger(&self) -> watch::Receiver<Option<AuthOutcome>> {
        let mut state = self.state.lock();
        if let State::Started(rx) = &*state {
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        let previous = std::mem::replace(&mut *state, State::Started(rx.clone()));
        drop(state);

        if let State::Idle { provider, settle } = previous {
            tokio::spawn(async move {
                let outcome = provider.await;
                if let Some(settle) = settle {
                    settle(&outcome);
                }
                // The state always holds a receiver, so publishing cannot fail.
                let _ = tx.send(Some(outcome));
            });
        }
        rx
    }
}

struct RequestShared {
    bound: ArcSwapOption<Identity>,
    response_ended: AtomicBool,
    failure_delegated: AtomicBool,
}

/// Per-request security context: the deferred identity plus the request-bound
/// snapshot and the failure-handling repetition guards.
///
/// Cloning is cheap; clones share the same underlying state.
#[derive(Clone)]
pub struct RequestIdentity {
    deferred: Arc<DeferredIdentity>,
    shared: Arc<RequestShared>,
}

impl RequestIdentity {
    /// Build the per-request context around an authentication attempt. The
    /// settle hook binds a successful identity so later synchronous readers
    /// see it without touching the deferred machinery.
    pub fn new(provider: impl Future<Output = AuthOutcome> + Send + 'static) -> Self {
        let shared = Arc::new(RequestShared {
            bound: ArcSwapOption::empty(),
            response_ended: AtomicBool::new(false),
            failure_delegated: AtomicBool::new(false),
        });
        let hook_shared = Arc::clone(&shared);
        let deferred = Arc::new(DeferredIdentity::new(provider).on_settle(move |outcome| {
            if let Ok(identity) = outcome {
                hook_shared.bound.store(Some(Arc::clone(identity)));
            }
        }));
        Self { deferred, shared }
    }

    /// Resolve the identity, triggering authentication on first use.
    pub async fn resolve(&self) -> AuthOutcome {
        self.deferred.resolve().await
    }

    /// The request-bound identity, if authentication already succeeded.
    #[must_use]
    pub fn bound(&self) -> Option<Arc<Identity>> {
        self.shared.bound.load_full()
    }

    /// Synchronous access to the resolved identity.
    ///
    /// # Errors
    ///
    /// [`SecurityError::BlockingNotAllowed`] when authentication has not
    /// completed: blocking on the event loop until it does is forbidden. Use
    /// [`resolve`](Self::resolve) from async code instead, or an
    /// authentication mode that binds the identity before delegation.
    pub fn current(&self) -> Result<Arc<Identity>, SecurityError> {
        if let Some(identity) = self.shared.bound.load_full() {
            return Ok(identity);
        }
        match self.deferred.try_outcome() {
            Some(outcome) => outcome,
            None => Err(SecurityError::BlockingNotAllowed {
                reason: "identity is not resolved yet; a blocking security check on the \
                         event loop would stall the request. Use the non-blocking check \
                         or an authentication mode that resolves the identity up front"
                    .to_owned(),
            }),
        }
    }

    /// Mark the response as ended; later failure handling becomes a no-op.
    pub fn mark_response_ended(&self) {
        self.shared.response_ended.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn response_ended(&self) -> bool {
        self.shared.response_ended.load(Ordering::Acquire)
    }

    /// Claim the one-shot right to delegate an authentication failure to the
    /// next handler. Returns `false` when it was already delegated.
    pub fn begin_failure_delegation(&self) -> bool {
        self.shared
            .failure_delegated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
