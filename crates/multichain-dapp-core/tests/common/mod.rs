#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use multichain_dapp_core::{
    classify_envelope, IncomingMessage, JsonRpcRequest, MultichainProvider, ProviderError,
    Transport, TransportSink,
};

#[derive(Debug, Default)]
struct ScriptedState {
    reachable: bool,
    connected: bool,
    connects: usize,
    sent: Vec<JsonRpcRequest>,
    sink: Option<TransportSink>,
}

/// Channel double exchanging raw (unwrapped) envelopes.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Rc<RefCell<ScriptedState>>,
}

/// The wallet's end of a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedRemote {
    state: Rc<RefCell<ScriptedState>>,
}

pub fn scripted(reachable: bool) -> (ScriptedTransport, ScriptedRemote) {
    let state = Rc::new(RefCell::new(ScriptedState {
        reachable,
        ..ScriptedState::default()
    }));
    (
        ScriptedTransport {
            state: Rc::clone(&state),
        },
        ScriptedRemote { state },
    )
}

pub async fn connected_provider() -> (MultichainProvider<ScriptedTransport>, ScriptedRemote) {
    let (transport, remote) = scripted(true);
    let provider = MultichainProvider::new(transport);
    assert!(provider.connect("ext-123".to_owned()).await);
    (provider, remote)
}

impl ScriptedRemote {
    pub fn sent(&self) -> Vec<JsonRpcRequest> {
        self.state.borrow().sent.clone()
    }

    pub fn sent_ids(&self) -> Vec<u64> {
        self.state.borrow().sent.iter().map(|r| r.id).collect()
    }

    pub fn connects(&self) -> usize {
        self.state.borrow().connects
    }

    pub fn deliver(&self, frame: Value) {
        let sink = self.state.borrow().sink.clone();
        if let Some(sink) = sink {
            sink.deliver(frame);
        }
    }

    pub fn drop_connection(&self, reason: &str) {
        let sink = {
            let mut state = self.state.borrow_mut();
            state.connected = false;
            state.sink.take()
        };
        if let Some(sink) = sink {
            sink.disconnected(Some(reason.to_owned()));
        }
    }
}

impl Transport for ScriptedTransport {
    type Target = String;

    fn connect(&self, _target: String, sink: TransportSink) -> LocalBoxFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.borrow_mut();
            state.connects += 1;
            if !state.reachable {
                return false;
            }
            state.connected = true;
            state.sink = Some(sink);
            true
        })
    }

    fn disconnect(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.sink = None;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn send_request(&self, request: &JsonRpcRequest) {
        let mut state = self.state.borrow_mut();
        if state.connected {
            state.sent.push(request.clone());
        }
    }

    fn parse_message(&self, raw: &Value) -> Result<IncomingMessage, ProviderError> {
        classify_envelope(raw)
    }
}

/// Lets the request branch of a `join!` run first, then feeds frames in order.
pub async fn deliver_after_send(remote: &ScriptedRemote, frames: Vec<Value>) {
    tokio::task::yield_now().await;
    for frame in frames {
        remote.deliver(frame);
    }
}

pub fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl Fn(&Value) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, move |n: &Value| sink.borrow_mut().push(n.clone()))
}
