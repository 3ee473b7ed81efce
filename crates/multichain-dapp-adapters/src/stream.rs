//! Named duplex stream over a shared `window.postMessage` bus.
//!
//! Both ends post `SYN` when they open. The first end to see a `SYN` answers
//! `ACK`; an end that receives `ACK` without having seen a `SYN` answers `ACK`
//! once more, so both sides finish the handshake. Writes issued before the
//! handshake completes are buffered and flushed in order afterwards.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use multichain_dapp_core::{ChannelError, ListenerId, WindowMessenger};

pub const SYN: &str = "SYN";
pub const ACK: &str = "ACK";

type DataHandler = Rc<dyn Fn(Value)>;
type CloseHandler = Rc<dyn Fn(String)>;

#[derive(Default)]
struct StreamState {
    init: bool,
    have_syn: bool,
    corked: Vec<Value>,
    listener: Option<ListenerId>,
    close_listener: Option<ListenerId>,
    on_data: Option<DataHandler>,
    on_close: Option<CloseHandler>,
    destroyed: bool,
}

pub struct PostMessageStream<M: WindowMessenger> {
    name: String,
    target: String,
    messenger: Rc<M>,
    state: RefCell<StreamState>,
}

enum Inbound {
    Push(DataHandler),
    AnswerSyn,
    Established { answer: bool, flush: Vec<Value> },
    Ignore,
}

impl<M: WindowMessenger> PostMessageStream<M> {
    /// Starts listening for frames addressed to `name`. Nothing is posted
    /// until [`PostMessageStream::start`].
    pub fn new(messenger: Rc<M>, name: &str, target: &str) -> Rc<Self> {
        let stream = Rc::new(Self {
            name: name.to_owned(),
            target: target.to_owned(),
            messenger,
            state: RefCell::new(StreamState::default()),
        });

        let weak = Rc::downgrade(&stream);
        let listener = stream.messenger.add_listener(Box::new(move |message| {
            if let Some(stream) = weak.upgrade() {
                stream.on_window_message(message);
            }
        }));
        let weak = Rc::downgrade(&stream);
        let close_listener = stream.messenger.add_close_listener(Box::new(move || {
            if let Some(stream) = weak.upgrade() {
                stream.fail("window closed".to_owned());
            }
        }));
        {
            let mut state = stream.state.borrow_mut();
            state.listener = Some(listener);
            state.close_listener = Some(close_listener);
        }
        stream
    }

    /// Posts the opening `SYN`. Handlers must be wired first: the other end
    /// may answer before this returns.
    pub fn start(&self) -> Result<(), ChannelError> {
        self.post(json!(SYN)).inspect_err(|_| self.destroy())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_data(&self, handler: impl Fn(Value) + 'static) {
        self.state.borrow_mut().on_data = Some(Rc::new(handler));
    }

    /// Called at most once, when the bus goes away or a post fails.
    pub fn on_close(&self, handler: impl Fn(String) + 'static) {
        self.state.borrow_mut().on_close = Some(Rc::new(handler));
    }

    pub fn is_established(&self) -> bool {
        self.state.borrow().init
    }

    pub fn write(&self, data: Value) -> Result<(), ChannelError> {
        {
            let mut state = self.state.borrow_mut();
            if state.destroyed {
                return Err(ChannelError::Closed);
            }
            if !state.init {
                state.corked.push(data);
                return Ok(());
            }
        }
        self.post(data)
    }

    /// Stops listening without firing the close handler. Idempotent.
    pub fn destroy(&self) {
        let (listeners, handlers) = {
            let mut state = self.state.borrow_mut();
            state.destroyed = true;
            state.corked.clear();
            (
                [state.listener.take(), state.close_listener.take()],
                (state.on_data.take(), state.on_close.take()),
            )
        };
        drop(handlers);
        for id in listeners.into_iter().flatten() {
            self.messenger.remove_listener(id);
        }
    }

    fn fail(&self, reason: String) {
        let handler = {
            let state = self.state.borrow();
            if state.destroyed {
                return;
            }
            state.on_close.clone()
        };
        self.destroy();
        debug!(stream = %self.name, reason = %reason, "post-message stream closed");
        if let Some(handler) = handler {
            handler(reason);
        }
    }

    fn post(&self, data: Value) -> Result<(), ChannelError> {
        self.messenger
            .post_message(json!({ "target": self.target, "data": data }))
    }

    fn post_or_fail(&self, data: Value) -> bool {
        match self.post(data) {
            Ok(()) => true,
            Err(e) => {
                warn!(stream = %self.name, error = %e, "post-message write failed");
                self.fail(e.to_string());
                false
            }
        }
    }

    fn on_window_message(&self, message: Value) {
        let Some(frame) = message.as_object() else {
            return;
        };
        if frame.get("target").and_then(Value::as_str) != Some(self.name.as_str()) {
            return;
        }
        let Some(data) = frame.get("data") else {
            return;
        };

        let step = {
            let mut state = self.state.borrow_mut();
            if state.destroyed {
                Inbound::Ignore
            } else if state.init {
                state.on_data.clone().map_or(Inbound::Ignore, Inbound::Push)
            } else if *data == SYN {
                state.have_syn = true;
                Inbound::AnswerSyn
            } else if *data == ACK {
                state.init = true;
                Inbound::Established {
                    answer: !state.have_syn,
                    flush: mem::take(&mut state.corked),
                }
            } else {
                Inbound::Ignore
            }
        };

        match step {
            Inbound::Push(handler) => handler(data.clone()),
            Inbound::AnswerSyn => {
                self.post_or_fail(json!(ACK));
            }
            Inbound::Established { answer, flush } => {
                if answer && !self.post_or_fail(json!(ACK)) {
                    return;
                }
                debug!(stream = %self.name, flushed = flush.len(), "post-message handshake complete");
                for data in flush {
                    if !self.post_or_fail(data) {
                        return;
                    }
                }
            }
            Inbound::Ignore => {}
        }
    }
}
