//! Method-level security checks.
//!
//! Check kinds form a closed set, dispatched in [`SecurityCheck::apply`].
//! Storage is an immutable method-to-check map built once at startup and
//! injected into consumers; there is no ambient registry.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SecurityError;
use crate::identity::Identity;

/// A named permission with optional actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl Permission {
    #[must_use]
    pub fn new(name: impl Into<String>, actions: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            name: name.into(),
            actions: actions.into_iter().map(str::to_owned).collect(),
        }
    }

    /// Whether this granted permission satisfies `required`: same name and
    /// every required action present (a required permission with no actions
    /// only needs the name).
    #[must_use]
    pub fn implies(&self, required: &Permission) -> bool {
        self.name == required.name
            && required
                .actions
                .iter()
                .all(|action| self.actions.contains(action))
    }
}

/// Identifies a secured operation: owning type plus method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    type_name: String,
    method_name: String,
}

impl MethodKey {
    #[must_use]
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.method_name)
    }
}

/// A reusable authorization rule bound to a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityCheck {
    /// Nobody may call the method.
    DenyAll,
    /// Anybody may call the method; no identity resolution is performed.
    PermitAll,
    /// Any non-anonymous identity may call the method.
    Authenticated,
    /// The identity must hold at least one of the listed roles.
    RolesAllowed(Vec<String>),
    /// The identity must hold all of the listed permissions.
    PermissionsAllowed(Vec<Permission>),
}

impl SecurityCheck {
    #[must_use]
    pub fn is_permit_all(&self) -> bool {
        matches!(self, SecurityCheck::PermitAll)
    }

    /// Label used as the audit-event context.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            SecurityCheck::DenyAll => "deny-all",
            SecurityCheck::PermitAll => "permit-all",
            SecurityCheck::Authenticated => "authenticated",
            SecurityCheck::RolesAllowed(_) => "roles-allowed",
            SecurityCheck::PermissionsAllowed(_) => "permissions-allowed",
        }
    }

    /// Apply the check against a resolved identity.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` when the caller is anonymous and the check
    /// requires an identity (so a challenge can be sent), otherwise
    /// `AuthorizationDenied`. Denial reasons are internal; callers must not
    /// leak them to the response body.
    pub fn apply(&self, identity: &Identity) -> Result<(), SecurityError> {
        match self {
            SecurityCheck::PermitAll => Ok(()),
            SecurityCheck::DenyAll => Err(SecurityError::denied("denied to all callers")),
            SecurityCheck::Authenticated => {
                if identity.is_anonymous() {
                    Err(SecurityError::authentication_failed("authentication required"))
                } else {
                    Ok(())
                }
            }
            SecurityCheck::RolesAllowed(roles) => {
                if identity.is_anonymous() {
                    return Err(SecurityError::authentication_failed(
                        "authentication required",
                    ));
                }
                if roles.iter().any(|role| identity.has_role(role)) {
                    Ok(())
                } else {
                    Err(SecurityError::denied("none of the required roles held"))
                }
            }
            SecurityCheck::PermissionsAllowed(permissions) => {
                if identity.is_anonymous() {
                    return Err(SecurityError::authentication_failed(
                        "authentication required",
                    ));
                }
                if permissions.iter().all(|required| identity.implies(required)) {
                    Ok(())
                } else {
                    Err(SecurityError::denied("required permission missing"))
                }
            }
        }
    }
}

/// Immutable method-to-check map. Built once with [`CheckStorageBuilder`].
#[derive(Debug, Default)]
pub struct CheckStorage {
    checks: HashMap<MethodKey, SecurityCheck>,
}

impl CheckStorage {
    #[must_use]
    pub fn builder() -> CheckStorageBuilder {
        CheckStorageBuilder::default()
    }

    /// The check registered for `method`, if any.
    #[must_use]
    pub fn get(&self, method: &MethodKey) -> Option<&SecurityCheck> {
        self.checks.get(method)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CheckStorageBuilder {
    checks: HashMap<MethodKey, SecurityCheck>,
}

impl CheckStorageBuilder {
    /// Register a check for a method. A later registration for the same
    /// method replaces the earlier one.
    #[must_use]
    pub fn register(
        mut self,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        check: SecurityCheck,
    ) -> Self {
        self.checks
            .insert(MethodKey::new(type_name, method_name), check);
        self
    }

    #[must_use]
    pub fn build(self) -> CheckStorage {
        CheckStorage { checks: self.checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::builder()
            .principal("alice")
            .role("admin")
            .permission(Permission::new("documents", ["read", "write"]))
            .build()
    }

    #[test]
    fn permit_all_allows_anonymous() {
        assert!(SecurityCheck::PermitAll.apply(&Identity::anonymous()).is_ok());
    }

    #[test]
    fn deny_all_denies_everyone() {
        let err = SecurityCheck::DenyAll.apply(&alice()).unwrap_err();
        assert!(matches!(err, SecurityError::AuthorizationDenied { .. }));
    }

    #[test]
    fn authenticated_rejects_anonymous_with_challengeable_failure() {
        let err = SecurityCheck::Authenticated
            .apply(&Identity::anonymous())
            .unwrap_err();
        assert!(matches!(err, SecurityError::AuthenticationFailed { .. }));
        assert!(SecurityCheck::Authenticated.apply(&alice()).is_ok());
    }

    #[test]
    fn roles_allowed_requires_any_listed_role() {
        let check = SecurityCheck::RolesAllowed(vec!["admin".to_owned(), "ops".to_owned()]);
        assert!(check.apply(&alice()).is_ok());

        let check = SecurityCheck::RolesAllowed(vec!["ops".to_owned()]);
        let err = check.apply(&alice()).unwrap_err();
        assert!(matches!(err, SecurityError::AuthorizationDenied { .. }));
    }

    #[test]
    fn permissions_allowed_requires_all_listed_permissions() {
        let check =
            SecurityCheck::PermissionsAllowed(vec![Permission::new("documents", ["read"])]);
        assert!(check.apply(&alice()).is_ok());

        let check = SecurityCheck::PermissionsAllowed(vec![
            Permission::new("documents", ["read"]),
            Permission::new("invoices", []),
        ]);
        assert!(check.apply(&alice()).is_err());
    }

    #[test]
    fn storage_lookup_by_method_key() {
        let storage = CheckStorage::builder()
            .register("UserResource", "delete", SecurityCheck::RolesAllowed(vec!["admin".to_owned()]))
            .register("UserResource", "get", SecurityCheck::PermitAll)
            .build();

        assert!(storage.get(&MethodKey::new("UserResource", "delete")).is_some());
        assert_eq!(
            storage.get(&MethodKey::new("UserResource", "get")),
            Some(&SecurityCheck::PermitAll)
        );
        assert!(storage.get(&MethodKey::new("UserResource", "list")).is_none());
        assert_eq!(
            MethodKey::new("UserResource", "delete").to_string(),
            "UserResource#delete"
        );
    }
}
