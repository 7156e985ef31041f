use serde::{Deserialize, Serialize};

fn default_expires_in_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    20
}

fn default_cookie_name() -> String {
    "vigil-one-time-token".to_owned()
}

/// One-time authentication token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OneTimeTokenConfig {
    /// Token lifetime in seconds.
    #[serde(default = "default_expires_in_secs")]
    pub expires_in_secs: u64,
    /// Interval of the background sweep evicting expired tokens.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Where to redirect after a token request was accepted. `None` responds
    /// with 204 instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_redirect_path: Option<String>,
    /// Name of the correlation cookie handed to the cookie responder.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for OneTimeTokenConfig {
    fn default() -> Self {
        Self {
            expires_in_secs: default_expires_in_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            request_redirect_path: None,
            cookie_name: default_cookie_name(),
        }
    }
}

impl OneTimeTokenConfig {
    #[must_use]
    pub fn expires_in(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expires_in_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}
