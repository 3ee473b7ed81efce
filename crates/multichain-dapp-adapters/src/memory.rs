//! In-process stand-ins for the browser platform: a runtime with installable
//! extensions and a shared `postMessage` bus with a content script on it.
//!
//! Delivery is synchronous. Listener lists are snapshotted before dispatch,
//! so callbacks may register, remove or post while being called.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::{json, Value};
use tracing::{debug, info};

use multichain_dapp_core::{
    unwrap_caip_x, ChannelError, CloseListener, DisconnectListener, ListenerId, MessageListener,
    RuntimeConnector, RuntimePort, WindowMessenger, CAIP_X_MESSAGE_TYPE,
};

use crate::multiplex::{ObjectMultiplex, Substream};
use crate::stream::PostMessageStream;
use crate::window::{CONTENT_SCRIPT, INPAGE, MULTICHAIN_SUBSTREAM_NAME};

/// Wallet side of a channel: maps one inbound envelope to the envelopes sent back.
pub type Responder = Rc<dyn Fn(&Value) -> Vec<Value>>;

pub const NO_RECEIVING_END: &str =
    "Could not establish connection. Receiving end does not exist.";

fn caip_x(data: Value) -> Value {
    json!({ "type": CAIP_X_MESSAGE_TYPE, "data": data })
}

/// Answers a `caip-x` frame through `responder`; anything else (the `"ping"`
/// probe included) gets no reply.
fn respond(responder: &Responder, frame: &Value) -> Vec<Value> {
    match unwrap_caip_x(frame) {
        Ok(envelope) => responder(envelope).into_iter().map(caip_x).collect(),
        Err(_) => {
            debug!(%frame, "wallet ignoring non caip-x frame");
            Vec::new()
        }
    }
}

struct ExtensionRecord {
    responder: Responder,
    ports: RefCell<Vec<Weak<PortShared>>>,
    received: RefCell<Vec<Value>>,
}

impl ExtensionRecord {
    fn live_ports(&self) -> Vec<Rc<PortShared>> {
        let mut ports = self.ports.borrow_mut();
        ports.retain(|port| port.upgrade().is_some_and(|p| p.connected.get()));
        ports.iter().filter_map(Weak::upgrade).collect()
    }
}

#[derive(Default)]
struct PortShared {
    connected: Cell<bool>,
    extension: Option<Rc<ExtensionRecord>>,
    pending_error: RefCell<Option<String>>,
    message_listeners: RefCell<Vec<Rc<dyn Fn(Value)>>>,
    disconnect_listeners: RefCell<Vec<Rc<dyn Fn(Option<String>)>>>,
}

impl PortShared {
    fn deliver(&self, frame: Value) {
        if !self.connected.get() {
            return;
        }
        let listeners = self.message_listeners.borrow().clone();
        for listener in listeners {
            listener(frame.clone());
        }
    }

    fn close(&self, reason: Option<String>) {
        if !self.connected.replace(false) {
            return;
        }
        let listeners = self.disconnect_listeners.borrow().clone();
        for listener in listeners {
            listener(reason.clone());
        }
    }
}

/// Runtime-messaging platform holding installed extensions by id.
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    extensions: Rc<RefCell<HashMap<String, Rc<ExtensionRecord>>>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_extension(&self, extension_id: &str, responder: Responder) -> ExtensionHandle {
        let record = Rc::new(ExtensionRecord {
            responder,
            ports: RefCell::new(Vec::new()),
            received: RefCell::new(Vec::new()),
        });
        self.extensions
            .borrow_mut()
            .insert(extension_id.to_owned(), Rc::clone(&record));
        info!(extension_id, "extension installed");
        ExtensionHandle { record }
    }

    /// Removes the extension and drops every port connected to it.
    pub fn uninstall_extension(&self, extension_id: &str) {
        let record = self.extensions.borrow_mut().remove(extension_id);
        if let Some(record) = record {
            for port in record.live_ports() {
                port.close(None);
            }
        }
    }
}

impl RuntimeConnector for MemoryRuntime {
    type Port = MemoryPort;

    /// Never fails outright: like the browser, a missing extension yields a
    /// port that disconnects as soon as someone listens for it.
    fn connect(&self, extension_id: &str) -> Result<MemoryPort, ChannelError> {
        let extension = self.extensions.borrow().get(extension_id).cloned();
        let shared = Rc::new(PortShared {
            connected: Cell::new(true),
            pending_error: RefCell::new(extension.is_none().then(|| NO_RECEIVING_END.to_owned())),
            extension,
            ..PortShared::default()
        });
        if let Some(extension) = &shared.extension {
            extension.ports.borrow_mut().push(Rc::downgrade(&shared));
        }
        Ok(MemoryPort { shared })
    }
}

pub struct MemoryPort {
    shared: Rc<PortShared>,
}

impl RuntimePort for MemoryPort {
    fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        if !self.shared.connected.get() {
            return Err(ChannelError::Send(
                "Attempting to use a disconnected port object".to_owned(),
            ));
        }
        let Some(extension) = self.shared.extension.clone() else {
            return Err(ChannelError::Unavailable(NO_RECEIVING_END.to_owned()));
        };
        extension.received.borrow_mut().push(message.clone());
        for reply in respond(&extension.responder, &message) {
            self.shared.deliver(reply);
        }
        Ok(())
    }

    fn on_message(&self, listener: MessageListener) {
        self.shared
            .message_listeners
            .borrow_mut()
            .push(Rc::from(listener));
    }

    fn on_disconnect(&self, listener: DisconnectListener) {
        let listener: Rc<dyn Fn(Option<String>)> = Rc::from(listener);
        self.shared
            .disconnect_listeners
            .borrow_mut()
            .push(Rc::clone(&listener));
        let pending = self.shared.pending_error.borrow_mut().take();
        if let Some(reason) = pending {
            self.shared.connected.set(false);
            listener(Some(reason));
        }
    }

    /// Closing our own end never notifies our own listeners.
    fn disconnect(&self) {
        self.shared.connected.set(false);
        self.shared.message_listeners.borrow_mut().clear();
        self.shared.disconnect_listeners.borrow_mut().clear();
    }
}

/// Wallet-side control over an installed extension.
#[derive(Clone)]
pub struct ExtensionHandle {
    record: Rc<ExtensionRecord>,
}

impl ExtensionHandle {
    /// Sends an unsolicited envelope (a notification) to every connected port.
    pub fn push(&self, envelope: Value) {
        let frame = caip_x(envelope);
        for port in self.record.live_ports() {
            port.deliver(frame.clone());
        }
    }

    /// Drops every connected port from the wallet side.
    pub fn close(&self, reason: Option<&str>) {
        for port in self.record.live_ports() {
            port.close(reason.map(str::to_owned));
        }
    }

    pub fn connection_count(&self) -> usize {
        self.record.live_ports().len()
    }

    /// Every frame the dapp posted, in order.
    pub fn received(&self) -> Vec<Value> {
        self.record.received.borrow().clone()
    }
}

#[derive(Default)]
struct WindowBus {
    next_id: Cell<ListenerId>,
    closed: Cell<bool>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn(Value)>)>>,
    close_listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn()>)>>,
    posted: RefCell<Vec<Value>>,
}

impl WindowBus {
    fn allocate_id(&self) -> ListenerId {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

/// One browsing context's `postMessage` bus, shared by every clone.
#[derive(Clone, Default)]
pub struct MemoryWindow {
    bus: Rc<WindowBus>,
}

impl MemoryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tears the bus down; close listeners fire once and later posts fail.
    pub fn close(&self) {
        if self.bus.closed.replace(true) {
            return;
        }
        let listeners: Vec<Rc<dyn Fn()>> = self
            .bus
            .close_listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
        self.bus.listeners.borrow_mut().clear();
        self.bus.close_listeners.borrow_mut().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.bus.closed.get()
    }

    /// Every message posted on the bus, in order.
    pub fn posted(&self) -> Vec<Value> {
        self.bus.posted.borrow().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.bus.listeners.borrow().len()
    }
}

impl WindowMessenger for MemoryWindow {
    fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        if self.bus.closed.get() {
            return Err(ChannelError::Closed);
        }
        self.bus.posted.borrow_mut().push(message.clone());
        let listeners: Vec<Rc<dyn Fn(Value)>> = self
            .bus
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(message.clone());
        }
        Ok(())
    }

    fn add_listener(&self, listener: MessageListener) -> ListenerId {
        let id = self.bus.allocate_id();
        self.bus
            .listeners
            .borrow_mut()
            .push((id, Rc::from(listener)));
        id
    }

    fn add_close_listener(&self, listener: CloseListener) -> ListenerId {
        let id = self.bus.allocate_id();
        self.bus
            .close_listeners
            .borrow_mut()
            .push((id, Rc::from(listener)));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.bus.listeners.borrow_mut().retain(|(l, _)| *l != id);
        self.bus.close_listeners.borrow_mut().retain(|(l, _)| *l != id);
    }
}

/// The extension's content script sitting on a [`MemoryWindow`].
pub struct ContentScriptHandle {
    stream: Rc<PostMessageStream<MemoryWindow>>,
    mux: Rc<ObjectMultiplex>,
    substream: Rc<Substream>,
    received: Rc<RefCell<Vec<Value>>>,
}

/// Puts a content script on `window` that answers multichain frames with `responder`.
pub fn install_content_script(
    window: &MemoryWindow,
    responder: Responder,
) -> Result<ContentScriptHandle, ChannelError> {
    let stream = PostMessageStream::new(Rc::new(window.clone()), CONTENT_SCRIPT, INPAGE);
    let mux = ObjectMultiplex::new();

    let to_stream = Rc::downgrade(&stream);
    mux.pipe_to(move |frame| {
        to_stream
            .upgrade()
            .ok_or(ChannelError::Closed)?
            .write(frame)
    });
    let to_mux = Rc::downgrade(&mux);
    stream.on_data(move |frame| {
        if let Some(mux) = to_mux.upgrade() {
            mux.receive(frame);
        }
    });

    let substream = Rc::new(mux.create_stream(MULTICHAIN_SUBSTREAM_NAME));
    let received = Rc::new(RefCell::new(Vec::new()));
    let reply_to = Rc::downgrade(&substream);
    let log = Rc::clone(&received);
    substream.on_data(move |frame| {
        log.borrow_mut().push(frame.clone());
        let Some(substream) = reply_to.upgrade() else {
            return;
        };
        for reply in respond(&responder, &frame) {
            if let Err(e) = substream.write(reply) {
                debug!(error = %e, "content script reply dropped");
                return;
            }
        }
    });

    stream.start()?;
    info!("content script listening");
    Ok(ContentScriptHandle {
        stream,
        mux,
        substream,
        received,
    })
}

impl ContentScriptHandle {
    /// Sends an unsolicited envelope to the page.
    pub fn push(&self, envelope: Value) -> Result<(), ChannelError> {
        self.substream.write(caip_x(envelope))
    }

    pub fn is_established(&self) -> bool {
        self.stream.is_established()
    }

    /// Every multichain frame the page sent, in order.
    pub fn received(&self) -> Vec<Value> {
        self.received.borrow().clone()
    }

    /// Stops listening. The page is not notified, as with a real content script.
    pub fn remove(&self) {
        self.stream.destroy();
        self.mux.end();
    }
}
