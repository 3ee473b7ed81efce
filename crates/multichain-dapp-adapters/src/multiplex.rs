//! Object multiplexer: many named substreams over one duplex stream, each
//! frame tagged as `{name, data}`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::{json, Value};
use tracing::{debug, warn};

use multichain_dapp_core::ChannelError;

type Outbound = Rc<dyn Fn(Value) -> Result<(), ChannelError>>;
type SubstreamHandler = Rc<dyn Fn(Value)>;

#[derive(Default)]
pub struct ObjectMultiplex {
    outbound: RefCell<Option<Outbound>>,
    substreams: RefCell<HashMap<String, Option<SubstreamHandler>>>,
}

impl ObjectMultiplex {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Wires the multiplexed side to the underlying stream.
    pub fn pipe_to(&self, write: impl Fn(Value) -> Result<(), ChannelError> + 'static) {
        *self.outbound.borrow_mut() = Some(Rc::new(write));
    }

    pub fn create_stream(self: &Rc<Self>, name: &str) -> Substream {
        let previous = self.substreams.borrow_mut().insert(name.to_owned(), None);
        if previous.is_some() {
            warn!(substream = name, "replacing existing substream");
        }
        Substream {
            name: name.to_owned(),
            mux: Rc::downgrade(self),
        }
    }

    /// Routes an inbound `{name, data}` frame to its substream.
    pub fn receive(&self, frame: Value) {
        let Some(name) = frame.get("name").and_then(Value::as_str) else {
            warn!(%frame, "dropping malformed multiplex frame");
            return;
        };
        let handler = match self.substreams.borrow().get(name) {
            Some(handler) => handler.clone(),
            None => {
                debug!(substream = name, "orphaned data for stream");
                return;
            }
        };
        if let Some(handler) = handler {
            handler(frame.get("data").cloned().unwrap_or(Value::Null));
        }
    }

    /// Drops the outbound pipe and every substream handler.
    pub fn end(&self) {
        self.outbound.borrow_mut().take();
        let substreams = std::mem::take(&mut *self.substreams.borrow_mut());
        drop(substreams);
    }

    fn send(&self, name: &str, data: Value) -> Result<(), ChannelError> {
        if !self.substreams.borrow().contains_key(name) {
            return Err(ChannelError::Closed);
        }
        let outbound = self.outbound.borrow().clone().ok_or(ChannelError::Closed)?;
        outbound(json!({ "name": name, "data": data }))
    }
}

pub struct Substream {
    name: String,
    mux: Weak<ObjectMultiplex>,
}

impl Substream {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_data(&self, handler: impl Fn(Value) + 'static) {
        if let Some(mux) = self.mux.upgrade() {
            if let Some(slot) = mux.substreams.borrow_mut().get_mut(&self.name) {
                *slot = Some(Rc::new(handler));
            }
        }
    }

    pub fn write(&self, data: Value) -> Result<(), ChannelError> {
        self.mux
            .upgrade()
            .ok_or(ChannelError::Closed)?
            .send(&self.name, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged_and_routed_by_name() {
        let mux = ObjectMultiplex::new();
        let wire = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&wire);
        mux.pipe_to(move |frame| {
            sink.borrow_mut().push(frame);
            Ok(())
        });

        let a = mux.create_stream("a");
        let b = mux.create_stream("b");
        let got_b = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&got_b);
        b.on_data(move |data| record.borrow_mut().push(data));

        a.write(json!("ping")).expect("write a");
        assert_eq!(*wire.borrow(), vec![json!({"name": "a", "data": "ping"})]);

        mux.receive(json!({"name": "b", "data": {"x": 1}}));
        mux.receive(json!({"name": "c", "data": 1}));
        mux.receive(json!("junk"));
        assert_eq!(*got_b.borrow(), vec![json!({"x": 1})]);
    }

    #[test]
    fn ended_mux_rejects_writes() {
        let mux = ObjectMultiplex::new();
        mux.pipe_to(|_| Ok(()));
        let stream = mux.create_stream("a");
        mux.end();
        assert_eq!(stream.write(json!(1)), Err(ChannelError::Closed));
        drop(mux);
        assert_eq!(stream.write(json!(1)), Err(ChannelError::Closed));
    }
}
