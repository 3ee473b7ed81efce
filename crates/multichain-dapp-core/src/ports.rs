use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::rpc::{IncomingMessage, JsonRpcErrorObject, JsonRpcRequest};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("channel closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("not connected to any extension; call connect() first")]
    NotConnected,
    #[error("request {id} timed out after {timeout_ms}ms")]
    Timeout { id: u64, timeout_ms: u64 },
    #[error("wallet error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcErrorObject),
    #[error("provider disconnected before request {id} settled")]
    Disconnected { id: u64 },
    #[error("request id {0} is already pending")]
    DuplicateRequestId(u64),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub type MessageListener = Box<dyn Fn(Value)>;
pub type DisconnectListener = Box<dyn Fn(Option<String>)>;
pub type CloseListener = Box<dyn Fn()>;

/// Subscribers are compared by pointer, so registering the same `Rc` twice is a no-op.
pub type NotificationListener = Rc<dyn Fn(&Value)>;

pub fn notification_listener(f: impl Fn(&Value) + 'static) -> NotificationListener {
    Rc::new(f)
}

/// Where a channel pushes inbound frames and reports an asynchronous disconnect.
#[derive(Clone)]
pub struct TransportSink {
    on_message: Rc<dyn Fn(Value)>,
    on_disconnect: Rc<dyn Fn(Option<String>)>,
}

impl TransportSink {
    pub fn new(
        on_message: impl Fn(Value) + 'static,
        on_disconnect: impl Fn(Option<String>) + 'static,
    ) -> Self {
        Self {
            on_message: Rc::new(on_message),
            on_disconnect: Rc::new(on_disconnect),
        }
    }

    pub fn deliver(&self, raw: Value) {
        (self.on_message)(raw);
    }

    pub fn disconnected(&self, reason: Option<String>) {
        (self.on_disconnect)(reason);
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

/// Contract every concrete channel satisfies for [`crate::MultichainProvider`].
pub trait Transport: 'static {
    type Target: 'static;

    /// Resolves once the remote end is confirmed reachable. Must not leave a
    /// half-open channel behind when it resolves to `false`.
    fn connect(&self, target: Self::Target, sink: TransportSink) -> LocalBoxFuture<'_, bool>;

    /// Synchronous and idempotent.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Fire-and-forget. Delivery failures surface through the sink's disconnect signal.
    fn send_request(&self, request: &JsonRpcRequest);

    fn parse_message(&self, raw: &Value) -> Result<IncomingMessage, ProviderError>;
}

/// A connected extension runtime port (`chrome.runtime.Port` shape).
pub trait RuntimePort: 'static {
    fn post_message(&self, message: Value) -> Result<(), ChannelError>;
    fn on_message(&self, listener: MessageListener);
    fn on_disconnect(&self, listener: DisconnectListener);
    fn disconnect(&self);
}

pub trait RuntimeConnector: 'static {
    type Port: RuntimePort;

    fn connect(&self, extension_id: &str) -> Result<Self::Port, ChannelError>;
}

pub type ListenerId = u64;

/// The page's `window.postMessage` surface.
pub trait WindowMessenger: 'static {
    fn post_message(&self, message: Value) -> Result<(), ChannelError>;
    fn add_listener(&self, listener: MessageListener) -> ListenerId;
    fn add_close_listener(&self, listener: CloseListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}
