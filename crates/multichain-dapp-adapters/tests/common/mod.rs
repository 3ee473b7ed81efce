#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use multichain_dapp_adapters::{
    install_content_script, ContentScriptHandle, ExtensionChannel, ExtensionHandle, MemoryRuntime,
    MemoryWindow, MockWallet, MultichainConfig, MultichainSdk, Responder,
    WindowPostMessageChannel,
};
use multichain_dapp_core::{
    ChainId, ChannelError, CloseListener, DisconnectListener, ListenerId, MessageListener,
    MultichainProvider, RuntimeConnector, RuntimePort, WindowMessenger,
};

pub const EXTENSION_ID: &str = "ext-123";
pub const ADDRESS: &str = "0x5cfe73b6021e818b776b421b1c4db2474086a7e1";
pub const CONFIRMATION_DELAY: Duration = Duration::from_millis(5);

pub fn wallet() -> Rc<MockWallet> {
    Rc::new(MockWallet::new().with_address("eip155", ADDRESS))
}

/// A wallet that never answers, for timeout and teardown cases.
pub fn silent() -> Responder {
    Rc::new(|_: &Value| Vec::new())
}

pub fn runtime_with(responder: Responder) -> (MemoryRuntime, ExtensionHandle) {
    let runtime = MemoryRuntime::new();
    let handle = runtime.install_extension(EXTENSION_ID, responder);
    (runtime, handle)
}

pub fn window_with(responder: Responder) -> (MemoryWindow, ContentScriptHandle) {
    let window = MemoryWindow::new();
    let content = install_content_script(&window, responder).expect("install content script");
    (window, content)
}

pub fn extension_provider(
    runtime: &MemoryRuntime,
) -> MultichainProvider<ExtensionChannel<MemoryRuntime>> {
    MultichainProvider::new(ExtensionChannel::new(runtime.clone(), CONFIRMATION_DELAY))
}

pub fn window_provider(
    window: &MemoryWindow,
) -> MultichainProvider<WindowPostMessageChannel<MemoryWindow>> {
    MultichainProvider::new(WindowPostMessageChannel::new(window.clone(), CONFIRMATION_DELAY))
}

pub fn sdk(runtime: &MemoryRuntime, window: &MemoryWindow) -> MultichainSdk<MemoryRuntime, MemoryWindow> {
    MultichainSdk::new(runtime.clone(), window.clone(), MultichainConfig::default())
}

pub fn scopes(raw: &[&str]) -> Vec<ChainId> {
    raw.iter().map(|s| s.parse().expect("valid scope")).collect()
}

pub fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl Fn(&Value) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, move |n: &Value| sink.borrow_mut().push(n.clone()))
}

/// Opens ports that accept listeners but refuse every post.
#[derive(Debug, Clone, Default)]
pub struct RefusingRuntime {
    posts: Rc<RefCell<Vec<Value>>>,
}

pub struct RefusingPort {
    posts: Rc<RefCell<Vec<Value>>>,
}

impl RefusingRuntime {
    pub fn attempted_posts(&self) -> Vec<Value> {
        self.posts.borrow().clone()
    }
}

impl RuntimeConnector for RefusingRuntime {
    type Port = RefusingPort;

    fn connect(&self, _extension_id: &str) -> Result<RefusingPort, ChannelError> {
        Ok(RefusingPort {
            posts: Rc::clone(&self.posts),
        })
    }
}

impl RuntimePort for RefusingPort {
    fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        self.posts.borrow_mut().push(message);
        Err(ChannelError::Send("port is closed".to_owned()))
    }

    fn on_message(&self, _listener: MessageListener) {}

    fn on_disconnect(&self, _listener: DisconnectListener) {}

    fn disconnect(&self) {}
}

/// A [`MemoryWindow`] that refuses to post any frame carrying `refused` as
/// its substream payload.
#[derive(Clone)]
pub struct RefusingWindow {
    pub inner: MemoryWindow,
    refused: Value,
}

impl RefusingWindow {
    pub fn new(inner: MemoryWindow, refused: Value) -> Self {
        Self { inner, refused }
    }
}

impl WindowMessenger for RefusingWindow {
    fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        if message["data"]["data"] == self.refused {
            return Err(ChannelError::Send("postMessage rejected".to_owned()));
        }
        self.inner.post_message(message)
    }

    fn add_listener(&self, listener: MessageListener) -> ListenerId {
        self.inner.add_listener(listener)
    }

    fn add_close_listener(&self, listener: CloseListener) -> ListenerId {
        self.inner.add_close_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.remove_listener(id)
    }
}
