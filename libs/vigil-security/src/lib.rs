pub mod check;
pub mod constrainer;
pub mod deferred;
pub mod error;
pub mod events;
pub mod identity;

pub use check::{CheckStorage, CheckStorageBuilder, MethodKey, Permission, SecurityCheck};
pub use constrainer::SecurityConstrainer;
pub use deferred::{AuthOutcome, DeferredIdentity, RequestIdentity};
pub use error::SecurityError;
pub use events::{AuditSink, SecurityEvent, SecurityEventKind, SecurityEvents};
pub use identity::{Credential, Identity};
