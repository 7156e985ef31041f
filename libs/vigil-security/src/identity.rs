use std::collections::{HashMap, HashSet};

use secrecy::SecretString;

use crate::check::Permission;

/// A credential carried by a resolved [`Identity`].
///
/// Wrapped in [`SecretString`] so `Debug` redacts the value automatically.
/// Credentials are never serialized.
#[derive(Debug, Clone)]
pub enum Credential {
    /// A password or password-equivalent secret.
    Password(SecretString),
    /// A bearer token presented by the caller.
    BearerToken(SecretString),
}

/// `Identity` is the resolved principal for a request or operation.
///
/// Built by the authentication mechanism chain during identity resolution and
/// passed read-only through authorization, method-level checks and filters.
/// Immutable once constructed; [`Identity::anonymous`] is the distinguished
/// unauthenticated instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Identity {
    /// Principal name. Empty for the anonymous identity.
    principal: String,
    /// Whether this is the distinguished anonymous identity.
    anonymous: bool,
    /// Roles granted to the principal.
    #[serde(default)]
    roles: HashSet<String>,
    /// Permissions granted to the principal.
    #[serde(default)]
    permissions: Vec<Permission>,
    /// Credentials the caller authenticated with. Never serialized.
    #[serde(skip)]
    credentials: Vec<Credential>,
    /// Free-form attributes attached by mechanisms or providers.
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
}

impl Identity {
    /// Create a new `Identity` builder.
    #[must_use]
    pub fn builder() -> IdentityBuilder {
        IdentityBuilder::default()
    }

    /// The distinguished anonymous identity: no principal, roles or credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            principal: String::new(),
            anonymous: true,
            roles: HashSet::new(),
            permissions: Vec::new(),
            credentials: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Principal name. Empty for the anonymous identity.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    #[must_use]
    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Permissions granted to this identity.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Whether any granted permission implies `required`.
    #[must_use]
    pub fn implies(&self, required: &Permission) -> bool {
        self.permissions.iter().any(|granted| granted.implies(required))
    }

    #[must_use]
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Get an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, serde_json::Value> {
        &self.attributes
    }
}

#[derive(Default)]
pub struct IdentityBuilder {
    principal: Option<String>,
    roles: HashSet<String>,
    permissions: Vec<Permission>,
    credentials: Vec<Credential>,
    attributes: HashMap<String, serde_json::Value>,
}

impl IdentityBuilder {
    #[must_use]
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn roles(mut self, roles: impl IntoIterator<Item = String>) -> Self {
        self.roles.extend(roles);
        self
    }

    #[must_use]
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    #[must_use]
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> Identity {
        Identity {
            principal: self.principal.unwrap_or_default(),
            anonymous: false,
            roles: self.roles,
            permissions: self.permissions,
            credentials: self.credentials,
            attributes: self.attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_full() {
        let identity = Identity::builder()
            .principal("alice")
            .role("admin")
            .role("user")
            .credential(Credential::Password("s3cr3t".to_owned().into()))
            .attribute("tenant", json!("acme"))
            .build();

        assert_eq!(identity.principal(), "alice");
        assert!(!identity.is_anonymous());
        assert!(identity.has_role("admin"));
        assert!(identity.has_role("user"));
        assert!(!identity.has_role("auditor"));
        assert_eq!(identity.attribute("tenant"), Some(&json!("acme")));
        match &identity.credentials()[0] {
            Credential::Password(secret) => assert_eq!(secret.expose_secret(), "s3cr3t"),
            Credential::BearerToken(_) => panic!("expected a password credential"),
        }
    }

    #[test]
    fn anonymous_identity() {
        let identity = Identity::anonymous();

        assert!(identity.is_anonymous());
        assert_eq!(identity.principal(), "");
        assert!(identity.roles().is_empty());
        assert!(identity.credentials().is_empty());
    }

    #[test]
    fn credentials_are_not_serialized() {
        let identity = Identity::builder()
            .principal("bob")
            .credential(Credential::BearerToken("tok".to_owned().into()))
            .build();

        let serialized = serde_json::to_string(&identity).unwrap();
        assert!(!serialized.contains("tok"));

        let deserialized: Identity = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.principal(), "bob");
        assert!(deserialized.credentials().is_empty());
    }

    #[test]
    fn permission_implication() {
        let identity = Identity::builder()
            .principal("carol")
            .permission(Permission::new("documents", ["read", "write"]))
            .build();

        assert!(identity.implies(&Permission::new("documents", ["read"])));
        assert!(!identity.implies(&Permission::new("documents", ["delete"])));
        assert!(!identity.implies(&Permission::new("invoices", ["read"])));
    }
}
