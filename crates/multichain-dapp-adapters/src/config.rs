use std::env;
use std::time::Duration;

use multichain_dapp_core::ProviderConfig;
use tracing::warn;

use crate::sdk::METAMASK_PROD_CHROME_ID;

pub const ENV_REQUEST_TIMEOUT_MS: &str = "MULTICHAIN_REQUEST_TIMEOUT_MS";
pub const ENV_CONNECT_DELAY_MS: &str = "MULTICHAIN_CONNECT_DELAY_MS";
pub const ENV_EXTENSION_ID: &str = "MULTICHAIN_EXTENSION_ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultichainConfig {
    pub request_timeout_ms: u64,
    /// How long `connect` waits for an early disconnect before probing the channel.
    pub connect_confirmation_delay_ms: u64,
    pub default_extension_id: String,
}

impl Default for MultichainConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_confirmation_delay_ms: 5,
            default_extension_id: METAMASK_PROD_CHROME_ID.to_owned(),
        }
    }
}

impl MultichainConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Overlays the defaults with whatever `lookup` returns. Unparseable
    /// numbers are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = parse_ms(&lookup, ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, ENV_CONNECT_DELAY_MS) {
            config.connect_confirmation_delay_ms = ms;
        }
        if let Some(id) = lookup(ENV_EXTENSION_ID).filter(|id| !id.trim().is_empty()) {
            config.default_extension_id = id.trim().to_owned();
        }
        config
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn connect_confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.connect_confirmation_delay_ms)
    }
}

fn parse_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid config value");
            None
        }
    }
}
