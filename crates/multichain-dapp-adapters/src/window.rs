//! Window-messaging channel: a post-message stream to the extension's content
//! script, multiplexed down to the multichain substream.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use multichain_dapp_core::{
    classify_envelope, time, unwrap_caip_x, wrap_caip_x, ChannelError, IncomingMessage,
    JsonRpcRequest, ProviderError, Transport, TransportSink, WindowMessenger,
};

use crate::multiplex::{ObjectMultiplex, Substream};
use crate::stream::PostMessageStream;

pub const INPAGE: &str = "metamask-inpage";
pub const CONTENT_SCRIPT: &str = "metamask-contentscript";
pub const MULTICHAIN_SUBSTREAM_NAME: &str = "metamask-multichain-provider";

struct Pipeline<M: WindowMessenger> {
    stream: Rc<PostMessageStream<M>>,
    mux: Rc<ObjectMultiplex>,
    substream: Substream,
}

impl<M: WindowMessenger> Pipeline<M> {
    /// Pipes `mux -> stream -> mux`. Either leg failing funnels into `on_close`.
    fn open(
        messenger: Rc<M>,
        on_close: impl Fn(String) + Clone + 'static,
    ) -> Result<Self, ProviderError> {
        let stream = PostMessageStream::new(messenger, INPAGE, CONTENT_SCRIPT);
        let mux = ObjectMultiplex::new();
        let substream = mux.create_stream(MULTICHAIN_SUBSTREAM_NAME);

        let to_stream: Weak<PostMessageStream<M>> = Rc::downgrade(&stream);
        let write_failed = on_close.clone();
        mux.pipe_to(move |frame| {
            let stream = to_stream.upgrade().ok_or(ChannelError::Closed)?;
            stream.write(frame).inspect_err(|e| write_failed(e.to_string()))
        });

        let to_mux = Rc::downgrade(&mux);
        stream.on_data(move |frame| {
            if let Some(mux) = to_mux.upgrade() {
                mux.receive(frame);
            }
        });
        stream.on_close(on_close);
        stream.start()?;

        Ok(Self {
            stream,
            mux,
            substream,
        })
    }

    fn destroy(&self) {
        self.stream.destroy();
        self.mux.end();
    }
}

struct WindowState<M: WindowMessenger> {
    pipeline: Option<Rc<Pipeline<M>>>,
    generation: u64,
    sink: Option<TransportSink>,
}

impl<M: WindowMessenger> Default for WindowState<M> {
    fn default() -> Self {
        Self {
            pipeline: None,
            generation: 0,
            sink: None,
        }
    }
}

pub struct WindowPostMessageChannel<M: WindowMessenger> {
    messenger: Rc<M>,
    confirmation_delay: Duration,
    state: Rc<RefCell<WindowState<M>>>,
}

impl<M: WindowMessenger> WindowPostMessageChannel<M> {
    pub fn new(messenger: M, confirmation_delay: Duration) -> Self {
        Self {
            messenger: Rc::new(messenger),
            confirmation_delay,
            state: Rc::new(RefCell::new(WindowState::default())),
        }
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    /// True once the content script answered the stream handshake.
    pub fn is_established(&self) -> bool {
        self.current_pipeline()
            .is_some_and(|pipeline| pipeline.stream.is_established())
    }

    fn current_pipeline(&self) -> Option<Rc<Pipeline<M>>> {
        self.state.borrow().pipeline.clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.borrow();
        state.generation == generation && state.pipeline.is_some()
    }
}

/// Single teardown path for the pipeline, whichever leg closed first.
fn pipeline_lost<M: WindowMessenger>(
    state: &Weak<RefCell<WindowState<M>>>,
    generation: u64,
    reason: String,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let (pipeline, sink) = {
        let mut state = state.borrow_mut();
        if state.generation != generation || state.pipeline.is_none() {
            debug!(generation, "ignoring close of a replaced pipeline");
            return;
        }
        (state.pipeline.take(), state.sink.take())
    };
    if let Some(pipeline) = pipeline {
        pipeline.destroy();
    }
    error!(reason = %reason, "error connecting to extension");
    if let Some(sink) = sink {
        sink.disconnected(Some(reason));
    }
}

impl<M: WindowMessenger> Transport for WindowPostMessageChannel<M> {
    type Target = ();

    fn connect(&self, _target: (), sink: TransportSink) -> LocalBoxFuture<'_, bool> {
        Box::pin(async move {
            self.disconnect();
            let generation = {
                let mut state = self.state.borrow_mut();
                state.generation += 1;
                state.sink = Some(sink.clone());
                state.generation
            };

            let weak_state = Rc::downgrade(&self.state);
            let on_close = move |reason: String| pipeline_lost(&weak_state, generation, reason);
            let pipeline = match Pipeline::open(Rc::clone(&self.messenger), on_close) {
                Ok(pipeline) => Rc::new(pipeline),
                Err(e) => {
                    error!(error = %e, "failed to open post-message stream");
                    self.state.borrow_mut().sink = None;
                    return false;
                }
            };
            self.state.borrow_mut().pipeline = Some(Rc::clone(&pipeline));

            time::sleep(self.confirmation_delay).await;

            if !self.is_current(generation) {
                error!(
                    "error connecting to multichain provider; make sure the extension is installed and enabled"
                );
                return false;
            }

            pipeline.substream.on_data(move |frame| sink.deliver(frame));

            if let Err(e) = pipeline.substream.write(json!("ping")) {
                error!(error = %e, "error sending message");
                self.disconnect();
                return false;
            }
            info!("connected to multichain provider via window.postMessage");
            true
        })
    }

    fn disconnect(&self) {
        let pipeline = {
            let mut state = self.state.borrow_mut();
            state.sink = None;
            state.pipeline.take()
        };
        if let Some(pipeline) = pipeline {
            pipeline.destroy();
            debug!("post-message pipeline destroyed");
        }
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().pipeline.is_some()
    }

    fn send_request(&self, request: &JsonRpcRequest) {
        let Some(pipeline) = self.current_pipeline() else {
            debug!(id = request.id, "dropping request on closed pipeline");
            return;
        };
        if let Err(e) = pipeline.substream.write(wrap_caip_x(request)) {
            let generation = self.state.borrow().generation;
            pipeline_lost(&Rc::downgrade(&self.state), generation, e.to_string());
        }
    }

    fn parse_message(&self, raw: &Value) -> Result<IncomingMessage, ProviderError> {
        classify_envelope(unwrap_caip_x(raw)?)
    }
}
