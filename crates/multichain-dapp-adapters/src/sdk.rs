use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};
use tracing::{error, info};

use multichain_dapp_core::{
    AccountId, ChainId, ConnectionState, CreateSessionParams, InvokeMethodParams,
    MultichainProvider, NotificationListener, ProviderError, RuntimeConnector, WindowMessenger,
    WALLET_CREATE_SESSION, WALLET_GET_SESSION, WALLET_INVOKE_METHOD, WALLET_REVOKE_SESSION,
};

use crate::config::MultichainConfig;
use crate::extension::ExtensionChannel;
use crate::window::WindowPostMessageChannel;

/// Sentinel extension id selecting the window-messaging channel.
pub const WINDOW_POST_MESSAGE_ID: &str = "window.postMessage";
pub const METAMASK_PROD_CHROME_ID: &str = "nkbihfbeogaeaoehlefnkodbefgpgknn";

pub enum ActiveProvider<C: RuntimeConnector, M: WindowMessenger> {
    Extension(MultichainProvider<ExtensionChannel<C>>),
    Window(MultichainProvider<WindowPostMessageChannel<M>>),
}

impl<C: RuntimeConnector, M: WindowMessenger> ActiveProvider<C, M> {
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        match self {
            Self::Extension(provider) => provider.request(method, params).await,
            Self::Window(provider) => provider.request(method, params).await,
        }
    }

    pub fn on_notification(&self, listener: NotificationListener) {
        match self {
            Self::Extension(provider) => provider.on_notification(listener),
            Self::Window(provider) => provider.on_notification(listener),
        }
    }

    pub fn remove_notification_listener(&self, listener: &NotificationListener) {
        match self {
            Self::Extension(provider) => provider.remove_notification_listener(listener),
            Self::Window(provider) => provider.remove_notification_listener(listener),
        }
    }

    pub fn disconnect(&self) {
        match self {
            Self::Extension(provider) => provider.disconnect(),
            Self::Window(provider) => provider.disconnect(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::Extension(provider) => provider.is_connected(),
            Self::Window(provider) => provider.is_connected(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Extension(provider) => provider.state(),
            Self::Window(provider) => provider.state(),
        }
    }

    pub fn pending_count(&self) -> usize {
        match self {
            Self::Extension(provider) => provider.pending_count(),
            Self::Window(provider) => provider.pending_count(),
        }
    }
}

/// Session-level facade: picks a channel by extension id and formats the
/// CAIP-25 calls on top of the provider.
pub struct MultichainSdk<C: RuntimeConnector, M: WindowMessenger> {
    connector: C,
    messenger: M,
    config: MultichainConfig,
    provider: RefCell<Option<Rc<ActiveProvider<C, M>>>>,
}

impl<C, M> MultichainSdk<C, M>
where
    C: RuntimeConnector + Clone,
    M: WindowMessenger + Clone,
{
    pub fn new(connector: C, messenger: M, config: MultichainConfig) -> Self {
        Self {
            connector,
            messenger,
            config,
            provider: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &MultichainConfig {
        &self.config
    }

    pub fn provider(&self) -> Option<Rc<ActiveProvider<C, M>>> {
        self.provider.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.provider().is_some_and(|provider| provider.is_connected())
    }

    /// Replaces the current provider with a fresh one for `extension_id` and
    /// connects it. The previous provider is fully disconnected first.
    pub async fn set_extension_id_and_connect(&self, extension_id: &str) -> bool {
        let previous = self.provider.borrow_mut().take();
        if let Some(previous) = previous {
            previous.disconnect();
        }

        let delay = self.config.connect_confirmation_delay();
        let provider_config = self.config.provider_config();
        let provider = Rc::new(if extension_id == WINDOW_POST_MESSAGE_ID {
            ActiveProvider::Window(MultichainProvider::with_config(
                WindowPostMessageChannel::new(self.messenger.clone(), delay),
                provider_config,
            ))
        } else {
            ActiveProvider::Extension(MultichainProvider::with_config(
                ExtensionChannel::new(self.connector.clone(), delay),
                provider_config,
            ))
        });
        *self.provider.borrow_mut() = Some(Rc::clone(&provider));

        let connected = match provider.as_ref() {
            ActiveProvider::Window(p) => p.connect(()).await,
            ActiveProvider::Extension(p) => p.connect(extension_id.to_owned()).await,
        };
        info!(extension_id, connected, "provider selected");
        connected
    }

    /// Requests a session covering `scopes`. Accounts that are not valid
    /// CAIP-10 ids are logged and left out.
    pub async fn create_session(
        &self,
        scopes: &[ChainId],
        accounts: &[String],
    ) -> Result<Value, ProviderError> {
        let accounts: Vec<AccountId> = accounts
            .iter()
            .filter_map(|raw| match raw.parse::<AccountId>() {
                Ok(account) => Some(account),
                Err(e) => {
                    error!(account = %raw, error = %e, "invalid CAIP account id");
                    None
                }
            })
            .collect();
        let params = CreateSessionParams::build(scopes, &accounts);
        self.request(WALLET_CREATE_SESSION, to_params(&params)?).await
    }

    pub async fn invoke_method(&self, params: InvokeMethodParams) -> Result<Value, ProviderError> {
        self.request(WALLET_INVOKE_METHOD, to_params(&params)?).await
    }

    pub async fn get_session(&self) -> Result<Value, ProviderError> {
        self.request(WALLET_GET_SESSION, json!([])).await
    }

    pub async fn revoke_session(&self) -> Result<Value, ProviderError> {
        self.request(WALLET_REVOKE_SESSION, json!([])).await
    }

    /// No-op until a provider exists.
    pub fn on_notification(&self, listener: NotificationListener) {
        if let Some(provider) = self.provider() {
            provider.on_notification(listener);
        }
    }

    pub fn remove_notification_listener(&self, listener: &NotificationListener) {
        if let Some(provider) = self.provider() {
            provider.remove_notification_listener(listener);
        }
    }

    pub fn disconnect(&self) {
        if let Some(provider) = self.provider() {
            provider.disconnect();
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let provider = self.provider().ok_or(ProviderError::NotConnected)?;
        provider.request(method, params).await
    }
}

fn to_params(params: &impl serde::Serialize) -> Result<Value, ProviderError> {
    serde_json::to_value(params).map_err(|e| ProviderError::MalformedMessage(e.to_string()))
}
