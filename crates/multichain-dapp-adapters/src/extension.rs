//! Extension-messaging channel over a runtime port identified by extension id.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use multichain_dapp_core::{
    classify_envelope, time, unwrap_caip_x, wrap_caip_x, IncomingMessage, JsonRpcRequest,
    ProviderError, RuntimeConnector, RuntimePort, Transport, TransportSink,
};

pub const DEFAULT_DISCONNECT_REASON: &str = "Port disconnected unexpectedly.";

struct PortState<P> {
    port: Option<Rc<P>>,
    connected: bool,
    generation: u64,
    extension_id: Option<String>,
    sink: Option<TransportSink>,
}

impl<P> Default for PortState<P> {
    fn default() -> Self {
        Self {
            port: None,
            connected: false,
            generation: 0,
            extension_id: None,
            sink: None,
        }
    }
}

pub struct ExtensionChannel<C: RuntimeConnector> {
    connector: C,
    confirmation_delay: Duration,
    state: Rc<RefCell<PortState<C::Port>>>,
}

impl<C: RuntimeConnector> ExtensionChannel<C> {
    pub fn new(connector: C, confirmation_delay: Duration) -> Self {
        Self {
            connector,
            confirmation_delay,
            state: Rc::new(RefCell::new(PortState::default())),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn extension_id(&self) -> Option<String> {
        self.state.borrow().extension_id.clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.borrow();
        state.generation == generation && state.connected
    }
}

/// Marks the port of `generation` as gone and reports it once. Events from a
/// port that has since been replaced are ignored.
fn port_lost<P>(state: &Weak<RefCell<PortState<P>>>, generation: u64, reason: Option<String>) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let sink = {
        let mut state = state.borrow_mut();
        if state.generation != generation || !state.connected {
            debug!(generation, "ignoring disconnect of a stale port");
            return;
        }
        state.connected = false;
        state.sink.take()
    };
    let reason = reason.unwrap_or_else(|| DEFAULT_DISCONNECT_REASON.to_owned());
    error!(reason = %reason, "error connecting to extension");
    if let Some(sink) = sink {
        sink.disconnected(Some(reason));
    }
}

impl<C: RuntimeConnector> Transport for ExtensionChannel<C> {
    type Target = String;

    fn connect(&self, extension_id: String, sink: TransportSink) -> LocalBoxFuture<'_, bool> {
        Box::pin(async move {
            self.disconnect();

            let port = match self.connector.connect(&extension_id) {
                Ok(port) => Rc::new(port),
                Err(e) => {
                    error!(extension_id = %extension_id, error = %e, "failed to open runtime port");
                    return false;
                }
            };
            let generation = {
                let mut state = self.state.borrow_mut();
                state.generation += 1;
                state.port = Some(Rc::clone(&port));
                state.connected = true;
                state.extension_id = Some(extension_id.clone());
                state.sink = Some(sink.clone());
                state.generation
            };

            let weak_state = Rc::downgrade(&self.state);
            port.on_disconnect(Box::new(move |reason| {
                port_lost(&weak_state, generation, reason);
            }));

            // Gives a missing extension the chance to fail the port first.
            time::sleep(self.confirmation_delay).await;

            if !self.is_current(generation) {
                error!(
                    extension_id = %extension_id,
                    "error connecting to multichain provider; make sure the extension is installed and enabled"
                );
                return false;
            }

            port.on_message(Box::new(move |raw| sink.deliver(raw)));

            if let Err(e) = port.post_message(json!("ping")) {
                error!(extension_id = %extension_id, error = %e, "error sending message");
                self.disconnect();
                return false;
            }
            info!(extension_id = %extension_id, "connected to multichain provider");
            true
        })
    }

    fn disconnect(&self) {
        let port = {
            let mut state = self.state.borrow_mut();
            state.connected = false;
            state.sink = None;
            state.port.take()
        };
        if let Some(port) = port {
            port.disconnect();
            debug!("runtime port disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        let state = self.state.borrow();
        state.connected && state.port.is_some()
    }

    fn send_request(&self, request: &JsonRpcRequest) {
        let (port, generation) = {
            let state = self.state.borrow();
            match (&state.port, state.connected) {
                (Some(port), true) => (Rc::clone(port), state.generation),
                _ => {
                    debug!(id = request.id, "dropping request on closed port");
                    return;
                }
            }
        };
        if let Err(e) = port.post_message(wrap_caip_x(request)) {
            warn!(id = request.id, error = %e, "runtime port rejected request");
            port_lost(&Rc::downgrade(&self.state), generation, Some(e.to_string()));
        }
    }

    fn parse_message(&self, raw: &Value) -> Result<IncomingMessage, ProviderError> {
        classify_envelope(unwrap_caip_x(raw)?)
    }
}
