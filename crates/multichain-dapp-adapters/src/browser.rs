//! `chrome.runtime` ports and `window.postMessage` for wasm32 builds.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};

use multichain_dapp_core::{
    ChannelError, CloseListener, DisconnectListener, ListenerId, MessageListener, RuntimeConnector,
    RuntimePort, WindowMessenger,
};

fn get_prop(target: &JsValue, key: &str) -> Result<JsValue, ChannelError> {
    js_sys::Reflect::get(target, &JsValue::from_str(key))
        .map_err(|e| ChannelError::Unavailable(format!("read property {key} failed: {e:?}")))
}

fn get_fn(target: &JsValue, key: &str) -> Result<js_sys::Function, ChannelError> {
    get_prop(target, key)?
        .dyn_into::<js_sys::Function>()
        .map_err(|_| ChannelError::Unavailable(format!("{key} is not a function")))
}

fn to_js(value: &Value) -> Result<JsValue, ChannelError> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| ChannelError::Send(format!("serialize message failed: {e}")))
}

fn from_js(value: JsValue) -> Option<Value> {
    match serde_wasm_bindgen::from_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "dropping non-JSON message");
            None
        }
    }
}

fn chrome_runtime() -> Result<JsValue, ChannelError> {
    let window =
        web_sys::window().ok_or_else(|| ChannelError::Unavailable("missing window".to_owned()))?;
    let chrome = get_prop(&window.into(), "chrome")?;
    let runtime = get_prop(&chrome, "runtime")?;
    if runtime.is_null() || runtime.is_undefined() {
        return Err(ChannelError::Unavailable(
            "chrome.runtime missing; page is not externally connectable".to_owned(),
        ));
    }
    Ok(runtime)
}

fn last_error_message() -> Option<String> {
    let runtime = chrome_runtime().ok()?;
    let last_error = get_prop(&runtime, "lastError").ok()?;
    if last_error.is_null() || last_error.is_undefined() {
        return None;
    }
    get_prop(&last_error, "message").ok()?.as_string()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserRuntime;

impl RuntimeConnector for BrowserRuntime {
    type Port = BrowserPort;

    fn connect(&self, extension_id: &str) -> Result<BrowserPort, ChannelError> {
        let runtime = chrome_runtime()?;
        let port = get_fn(&runtime, "connect")?
            .call1(&runtime, &JsValue::from_str(extension_id))
            .map_err(|e| ChannelError::Unavailable(format!("chrome.runtime.connect failed: {e:?}")))?;
        Ok(BrowserPort {
            port,
            message_hooks: RefCell::new(Vec::new()),
            disconnect_hooks: RefCell::new(Vec::new()),
        })
    }
}

pub struct BrowserPort {
    port: JsValue,
    message_hooks: RefCell<Vec<Closure<dyn FnMut(JsValue)>>>,
    disconnect_hooks: RefCell<Vec<Closure<dyn FnMut(JsValue)>>>,
}

impl BrowserPort {
    fn add_listener(&self, event: &str, hook: &Closure<dyn FnMut(JsValue)>) -> Result<(), ChannelError> {
        let target = get_prop(&self.port, event)?;
        get_fn(&target, "addListener")?
            .call1(&target, hook.as_ref().unchecked_ref())
            .map(|_| ())
            .map_err(|e| ChannelError::Unavailable(format!("register {event} failed: {e:?}")))
    }
}

impl RuntimePort for BrowserPort {
    fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        let message = to_js(&message)?;
        get_fn(&self.port, "postMessage")?
            .call1(&self.port, &message)
            .map(|_| ())
            .map_err(|e| ChannelError::Send(format!("{e:?}")))
    }

    fn on_message(&self, listener: MessageListener) {
        let hook = Closure::<dyn FnMut(JsValue)>::new(move |message: JsValue| {
            if let Some(message) = from_js(message) {
                listener(message);
            }
        });
        match self.add_listener("onMessage", &hook) {
            Ok(()) => self.message_hooks.borrow_mut().push(hook),
            Err(e) => debug!(error = %e, "onMessage unavailable"),
        }
    }

    fn on_disconnect(&self, listener: DisconnectListener) {
        let hook = Closure::<dyn FnMut(JsValue)>::new(move |_port: JsValue| {
            listener(last_error_message());
        });
        match self.add_listener("onDisconnect", &hook) {
            Ok(()) => self.disconnect_hooks.borrow_mut().push(hook),
            Err(e) => debug!(error = %e, "onDisconnect unavailable"),
        }
    }

    fn disconnect(&self) {
        if let Ok(disconnect) = get_fn(&self.port, "disconnect") {
            if let Err(e) = disconnect.call0(&self.port) {
                debug!(error = ?e, "port.disconnect failed");
            }
        }
    }
}

struct WindowHooks {
    window: web_sys::Window,
    next_id: Cell<ListenerId>,
    messages: RefCell<HashMap<ListenerId, Closure<dyn FnMut(web_sys::MessageEvent)>>>,
    closes: RefCell<HashMap<ListenerId, Closure<dyn FnMut()>>>,
    /// Removed hooks may still be on the call stack; they are freed on the next registration.
    retired: RefCell<Vec<Box<dyn std::any::Any>>>,
}

/// `window.postMessage` restricted to same-window, same-origin traffic.
#[derive(Clone)]
pub struct BrowserWindow {
    hooks: Rc<WindowHooks>,
}

impl BrowserWindow {
    pub fn new() -> Result<Self, ChannelError> {
        let window =
            web_sys::window().ok_or_else(|| ChannelError::Unavailable("missing window".to_owned()))?;
        Ok(Self {
            hooks: Rc::new(WindowHooks {
                window,
                next_id: Cell::new(0),
                messages: RefCell::new(HashMap::new()),
                closes: RefCell::new(HashMap::new()),
                retired: RefCell::new(Vec::new()),
            }),
        })
    }

    fn origin(&self) -> Result<String, ChannelError> {
        self.hooks
            .window
            .location()
            .origin()
            .map_err(|e| ChannelError::Unavailable(format!("read origin failed: {e:?}")))
    }

    fn allocate_id(&self) -> ListenerId {
        self.hooks.retired.borrow_mut().clear();
        let id = self.hooks.next_id.get() + 1;
        self.hooks.next_id.set(id);
        id
    }
}

impl WindowMessenger for BrowserWindow {
    fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        let origin = self.origin()?;
        self.hooks
            .window
            .post_message(&to_js(&message)?, &origin)
            .map_err(|e| ChannelError::Send(format!("{e:?}")))
    }

    fn add_listener(&self, listener: MessageListener) -> ListenerId {
        let id = self.allocate_id();
        let window: JsValue = self.hooks.window.clone().into();
        let origin = self.origin().ok();
        let hook = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(
            move |event: web_sys::MessageEvent| {
                let same_window = event
                    .source()
                    .is_some_and(|source| js_sys::Object::is(&source, &window));
                if !same_window || origin.as_deref() != Some(event.origin().as_str()) {
                    return;
                }
                if let Some(message) = from_js(event.data()) {
                    listener(message);
                }
            },
        );
        if let Err(e) = self
            .hooks
            .window
            .add_event_listener_with_callback("message", hook.as_ref().unchecked_ref())
        {
            debug!(error = ?e, "add message listener failed");
        }
        self.hooks.messages.borrow_mut().insert(id, hook);
        id
    }

    fn add_close_listener(&self, listener: CloseListener) -> ListenerId {
        let id = self.allocate_id();
        let hook = Closure::<dyn FnMut()>::new(move || listener());
        if let Err(e) = self
            .hooks
            .window
            .add_event_listener_with_callback("pagehide", hook.as_ref().unchecked_ref())
        {
            debug!(error = ?e, "add pagehide listener failed");
        }
        self.hooks.closes.borrow_mut().insert(id, hook);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        if let Some(hook) = self.hooks.messages.borrow_mut().remove(&id) {
            let _ = self
                .hooks
                .window
                .remove_event_listener_with_callback("message", hook.as_ref().unchecked_ref());
            self.hooks.retired.borrow_mut().push(Box::new(hook));
        }
        if let Some(hook) = self.hooks.closes.borrow_mut().remove(&id) {
            let _ = self
                .hooks
                .window
                .remove_event_listener_with_callback("pagehide", hook.as_ref().unchecked_ref());
            self.hooks.retired.borrow_mut().push(Box::new(hook));
        }
    }
}
