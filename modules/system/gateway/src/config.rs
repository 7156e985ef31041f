use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use http::Method;
use serde::{Deserialize, Serialize};

use crate::pipeline::{AuthMode, EndStrategy};
use crate::policy::{
    AuthenticatedPolicy, DenyAllPolicy, HttpSecurityPolicy, PathMatchingPolicy, PermitAllPolicy,
    PolicyBuildError, PolicyDecision, RolesAllowedPolicy,
};

fn default_true() -> bool {
    true
}

fn default_policy() -> String {
    "permit".to_owned()
}

/// Security pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SecuritySettings {
    /// Proactive or lazy identity resolution.
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// How the default auth-failure handler finalizes the response.
    #[serde(default)]
    pub end_strategy: EndStrategy,

    /// Master switch for authentication/authorization audit events.
    #[serde(default = "default_true")]
    pub events_enabled: bool,

    /// Decision when no policy applies to a request: `permit` or `deny`.
    #[serde(default = "default_policy")]
    pub default_policy: String,

    /// Path-to-policy bindings. Paths ending in `/*` match by prefix.
    #[serde(default)]
    pub path_policies: Vec<PathPolicyRule>,

    /// Named roles-allowed policies referenced from `path_policies`.
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            auth_mode: AuthMode::default(),
            end_strategy: EndStrategy::default(),
            events_enabled: true,
            default_policy: default_policy(),
            path_policies: Vec::new(),
            roles: HashMap::new(),
        }
    }
}

/// One configured path-to-policy binding.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathPolicyRule {
    pub path: String,
    /// Name of a built-in (`permit`, `deny`, `authenticated`) or a policy
    /// from the `roles` table.
    pub policy: String,
    /// HTTP methods this binding is restricted to; empty means all.
    #[serde(default)]
    pub methods: Vec<String>,
}

impl SecuritySettings {
    /// Load settings from a YAML file, overridable through
    /// `VIGIL_SECURITY_*` environment variables.
    ///
    /// # Errors
    ///
    /// File or deserialization errors.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("VIGIL_SECURITY_").split("__"))
            .extract()
            .with_context(|| format!("loading security settings from {}", path.display()))
    }

    /// The named-policy registry: built-ins plus the configured roles
    /// policies.
    #[must_use]
    pub fn named_policies(&self) -> HashMap<String, Arc<dyn HttpSecurityPolicy>> {
        let mut named: HashMap<String, Arc<dyn HttpSecurityPolicy>> = HashMap::new();
        named.insert("permit".to_owned(), Arc::new(PermitAllPolicy));
        named.insert("deny".to_owned(), Arc::new(DenyAllPolicy));
        named.insert("authenticated".to_owned(), Arc::new(AuthenticatedPolicy));
        for (name, roles) in &self.roles {
            named.insert(
                name.clone(),
                Arc::new(RolesAllowedPolicy::named(name.clone(), roles.clone())),
            );
        }
        named
    }

    /// Build the path-matching policy from the configured bindings.
    ///
    /// # Errors
    ///
    /// Unknown policy names, invalid HTTP methods, invalid path patterns.
    pub fn build_path_policy(&self) -> Result<PathMatchingPolicy, PolicyBuildError> {
        let named = self.named_policies();
        let mut builder = PathMatchingPolicy::builder();
        for rule in &self.path_policies {
            let policy = named
                .get(&rule.policy)
                .ok_or_else(|| PolicyBuildError::UnknownPolicy(rule.policy.clone()))?;
            let mut methods = Vec::with_capacity(rule.methods.len());
            for method in &rule.methods {
                methods.push(
                    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                        .map_err(|_| PolicyBuildError::InvalidMethod(method.clone()))?,
                );
            }
            builder = builder.bind(&rule.path, Arc::clone(policy), methods);
        }
        builder.build()
    }

    /// The decision applied when no policy matched the request.
    #[must_use]
    pub fn default_decision(&self) -> PolicyDecision {
        match self.default_policy.as_str() {
            "deny" => PolicyDecision::Deny,
            "permit" => PolicyDecision::Permit,
            other => {
                tracing::warn!(policy = other, "unknown default policy, permitting");
                PolicyDecision::Permit
            }
        }
    }
}
