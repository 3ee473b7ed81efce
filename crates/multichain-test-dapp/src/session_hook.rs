//! Observable session state on top of [`MultichainSdk`].
//!
//! Every operation updates a [`SessionView`] published through a
//! `tokio::sync::watch` channel, so a front end only has to render the
//! latest view. The selected extension id survives restarts through an
//! [`ExtensionIdStore`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info};

use multichain_dapp_adapters::MultichainSdk;
use multichain_dapp_core::{
    notification_listener, ChainId, InvokeMethodParams, NotificationListener, ProviderError,
    RuntimeConnector, WindowMessenger, WALLET_NOTIFY, WALLET_SESSION_CHANGED,
};

pub trait ExtensionIdStore {
    fn load(&self) -> Option<String>;
    fn save(&self, extension_id: &str);
    fn forget(&self);
}

/// Process-local store; clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryExtensionIdStore {
    slot: Rc<RefCell<Option<String>>>,
}

impl MemoryExtensionIdStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtensionIdStore for MemoryExtensionIdStore {
    fn load(&self) -> Option<String> {
        self.slot.borrow().clone()
    }

    fn save(&self, extension_id: &str) {
        *self.slot.borrow_mut() = Some(extension_id.to_owned());
    }

    fn forget(&self) {
        self.slot.borrow_mut().take();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InvokeKey {
    pub scope: ChainId,
    pub method: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    /// Outcome of the last connect; not refreshed if the channel drops later.
    pub is_connected: bool,
    pub extension_id: Option<String>,
    pub current_session: Option<Value>,
    pub last_wallet_notify: Option<Value>,
    pub last_session_changed: Option<Value>,
    pub invoke_results: BTreeMap<InvokeKey, Result<Value, ProviderError>>,
}

pub struct SessionHook<C, M, S>
where
    C: RuntimeConnector + Clone,
    M: WindowMessenger + Clone,
    S: ExtensionIdStore,
{
    sdk: MultichainSdk<C, M>,
    store: S,
    view: Rc<watch::Sender<SessionView>>,
    tracker: NotificationListener,
}

impl<C, M, S> SessionHook<C, M, S>
where
    C: RuntimeConnector + Clone,
    M: WindowMessenger + Clone,
    S: ExtensionIdStore,
{
    pub fn new(sdk: MultichainSdk<C, M>, store: S) -> Self {
        let (view, _) = watch::channel(SessionView::default());
        let view = Rc::new(view);

        let published = Rc::clone(&view);
        let tracker = notification_listener(move |notification| {
            match notification.get("method").and_then(Value::as_str) {
                Some(WALLET_NOTIFY) => published
                    .send_modify(|view| view.last_wallet_notify = Some(notification.clone())),
                Some(WALLET_SESSION_CHANGED) => published
                    .send_modify(|view| view.last_session_changed = Some(notification.clone())),
                _ => {}
            }
        });

        Self {
            sdk,
            store,
            view,
            tracker,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Connects with the stored extension id, if there is one.
    pub async fn auto_connect(&self) -> bool {
        let Some(extension_id) = self.store.load() else {
            return false;
        };
        info!(%extension_id, "reconnecting with stored extension id");
        self.connect(&extension_id).await
    }

    /// On success the id is persisted and any session the wallet already
    /// holds for this dapp is loaded into the view.
    pub async fn connect(&self, extension_id: &str) -> bool {
        let connected = self.sdk.set_extension_id_and_connect(extension_id).await;
        self.view.send_modify(|view| {
            view.is_connected = connected;
            view.extension_id = Some(extension_id.to_owned());
            view.current_session = None;
        });
        if !connected {
            error!(extension_id, "could not connect to wallet");
            return false;
        }

        self.store.save(extension_id);
        self.sdk.on_notification(Rc::clone(&self.tracker));
        self.refresh_session().await;
        true
    }

    pub fn disconnect(&self) {
        self.sdk.disconnect();
        self.store.forget();
        self.view.send_modify(|view| {
            let extension_id = view.extension_id.take();
            *view = SessionView {
                extension_id,
                ..SessionView::default()
            };
        });
    }

    pub async fn create_session(
        &self,
        scopes: &[ChainId],
        accounts: &[String],
    ) -> Result<Value, ProviderError> {
        let session = self.sdk.create_session(scopes, accounts).await?;
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    pub async fn get_session(&self) -> Result<Value, ProviderError> {
        let session = self.sdk.get_session().await?;
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    pub async fn revoke_session(&self) -> Result<Value, ProviderError> {
        let result = self.sdk.revoke_session().await?;
        self.set_session(None);
        Ok(result)
    }

    /// Failures are recorded too, keyed by scope and method.
    pub async fn invoke_method(&self, params: InvokeMethodParams) -> Result<Value, ProviderError> {
        let key = InvokeKey {
            scope: params.scope.clone(),
            method: params.request.method.clone(),
        };
        let result = self.sdk.invoke_method(params).await;
        self.view.send_modify(|view| {
            view.invoke_results.insert(key, result.clone());
        });
        result
    }

    /// Subscribes to `wallet_sessionChanged` only. Like every listener, it is
    /// dropped when the provider is replaced or disconnected.
    pub fn on_session_changed(&self, callback: impl Fn(&Value) + 'static) -> NotificationListener {
        let listener = notification_listener(move |notification| {
            if notification.get("method").and_then(Value::as_str) == Some(WALLET_SESSION_CHANGED) {
                callback(notification);
            }
        });
        self.sdk.on_notification(Rc::clone(&listener));
        listener
    }

    pub fn on_notification(&self, callback: impl Fn(&Value) + 'static) -> NotificationListener {
        let listener = notification_listener(callback);
        self.sdk.on_notification(Rc::clone(&listener));
        listener
    }

    async fn refresh_session(&self) {
        match self.sdk.get_session().await {
            Ok(Value::Null) => {}
            Ok(session) => self.set_session(Some(session)),
            Err(e) => error!(error = %e, "failed to load existing session"),
        }
    }

    fn set_session(&self, session: Option<Value>) {
        self.view.send_modify(|view| view.current_session = session);
    }
}

impl<C, M, S> Drop for SessionHook<C, M, S>
where
    C: RuntimeConnector + Clone,
    M: WindowMessenger + Clone,
    S: ExtensionIdStore,
{
    fn drop(&mut self) {
        self.sdk.disconnect();
    }
}
