//! Request/response correlation over a [`Transport`].
//!
//! Every request gets a fresh id and a pending entry holding its completion
//! handle. Inbound frames with an id settle the matching entry; frames without
//! one are fanned out to notification subscribers. An entry leaves the table
//! exactly once: on its response, on its timeout, on disconnect, or when the
//! caller drops the request future.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, Either};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::ports::{NotificationListener, ProviderError, Transport, TransportSink};
use crate::rpc::{IncomingMessage, JsonRpcRequest};
use crate::state_machine::{connection_transition, ConnectionEvent, ConnectionState};
use crate::time;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

type Completion = oneshot::Sender<Result<Value, ProviderError>>;

/// Ids can be reused once settled, so each registration carries its own
/// ticket and only the owner may release the entry.
struct PendingEntry {
    ticket: u64,
    completion: Completion,
}

pub struct MultichainProvider<T: Transport> {
    inner: Rc<ProviderInner<T>>,
}

struct ProviderInner<T: Transport> {
    transport: T,
    config: ProviderConfig,
    state: RefCell<ProviderState>,
}

struct ProviderState {
    next_id: u64,
    next_ticket: u64,
    pending: HashMap<u64, PendingEntry>,
    listeners: Vec<NotificationListener>,
    connection: ConnectionState,
    unmatched_responses: u64,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            next_id: 1,
            next_ticket: 0,
            pending: HashMap::new(),
            listeners: Vec::new(),
            connection: ConnectionState::Disconnected,
            unmatched_responses: 0,
        }
    }
}

impl<T: Transport> MultichainProvider<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ProviderConfig::default())
    }

    pub fn with_config(transport: T, config: ProviderConfig) -> Self {
        Self {
            inner: Rc::new(ProviderInner {
                transport,
                config,
                state: RefCell::new(ProviderState::default()),
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Opens the channel, replacing (and fully disconnecting) any active one.
    pub async fn connect(&self, target: T::Target) -> bool {
        if self.inner.transport.is_connected() {
            self.disconnect();
        }
        self.inner.advance(ConnectionEvent::Connect);

        let sink = transport_sink(&self.inner);
        let connected = self.inner.transport.connect(target, sink).await;

        if connected && self.inner.transport.is_connected() {
            self.inner.advance(ConnectionEvent::Confirmed);
            true
        } else {
            self.inner.advance(ConnectionEvent::ConfirmationFailed);
            false
        }
    }

    /// Tears down the channel, rejects in-flight requests with
    /// [`ProviderError::Disconnected`] and drops every subscriber.
    pub fn disconnect(&self) {
        self.inner.transport.disconnect();
        let dropped = self.inner.clear_pending();
        self.remove_all_notification_listeners();
        self.inner.advance(ConnectionEvent::Disconnect);
        if dropped > 0 {
            info!(dropped, "rejected in-flight requests on disconnect");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().connection
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    /// Responses whose id matched nothing (late, duplicated or foreign).
    pub fn unmatched_responses(&self) -> u64 {
        self.inner.state.borrow().unmatched_responses
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.request_with_id(method, params, None).await
    }

    pub async fn request_with_id(
        &self,
        method: &str,
        params: Value,
        id: Option<u64>,
    ) -> Result<Value, ProviderError> {
        if !self.inner.transport.is_connected() {
            return Err(ProviderError::NotConnected);
        }

        let (id, ticket, completion) = self.inner.register(id)?;
        let _guard = PendingGuard {
            inner: self.inner.as_ref(),
            id,
            ticket,
        };

        debug!(id, method, "sending request");
        self.inner
            .transport
            .send_request(&JsonRpcRequest::new(id, method, params));

        let timeout = time::sleep(self.inner.config.request_timeout);
        futures::pin_mut!(timeout);

        match future::select(completion, timeout).await {
            Either::Left((settled, _)) => settled.unwrap_or(Err(ProviderError::Disconnected { id })),
            Either::Right(((), completion)) => {
                if self.inner.release(id, ticket).is_some() {
                    let timeout_ms = self.inner.config.request_timeout.as_millis() as u64;
                    warn!(id, method, timeout_ms, "request timed out");
                    Err(ProviderError::Timeout { id, timeout_ms })
                } else {
                    // Settled in the same tick the timer fired; the outcome is already queued.
                    completion
                        .await
                        .unwrap_or(Err(ProviderError::Disconnected { id }))
                }
            }
        }
    }

    pub fn on_notification(&self, listener: NotificationListener) {
        let mut state = self.inner.state.borrow_mut();
        if !state.listeners.iter().any(|l| Rc::ptr_eq(l, &listener)) {
            state.listeners.push(listener);
        }
    }

    pub fn remove_notification_listener(&self, listener: &NotificationListener) {
        self.inner
            .state
            .borrow_mut()
            .listeners
            .retain(|l| !Rc::ptr_eq(l, listener));
    }

    pub fn remove_all_notification_listeners(&self) {
        let removed = std::mem::take(&mut self.inner.state.borrow_mut().listeners);
        drop(removed);
    }

    pub fn notification_listener_count(&self) -> usize {
        self.inner.state.borrow().listeners.len()
    }
}

impl<T: Transport> fmt::Debug for MultichainProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("MultichainProvider")
            .field("connection", &state.connection)
            .field("next_id", &state.next_id)
            .field("pending", &state.pending.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl<T: Transport> ProviderInner<T> {
    /// Allocated ids skip any explicit id still pending; an explicit id that
    /// collides is rejected. The counter advances either way.
    fn register(
        &self,
        explicit: Option<u64>,
    ) -> Result<(u64, u64, oneshot::Receiver<Result<Value, ProviderError>>), ProviderError> {
        let mut state = self.state.borrow_mut();
        let id = match explicit {
            Some(id) => {
                state.next_id = state.next_id.saturating_add(1);
                if state.pending.contains_key(&id) {
                    return Err(ProviderError::DuplicateRequestId(id));
                }
                id
            }
            None => {
                let mut id = state.next_id;
                while state.pending.contains_key(&id) {
                    id = id.saturating_add(1);
                }
                state.next_id = id.saturating_add(1);
                id
            }
        };

        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let (completion, rx) = oneshot::channel();
        state.pending.insert(id, PendingEntry { ticket, completion });
        Ok((id, ticket, rx))
    }

    fn take_pending(&self, id: u64) -> Option<Completion> {
        self.state
            .borrow_mut()
            .pending
            .remove(&id)
            .map(|entry| entry.completion)
    }

    /// Removes the entry for `id` only if it is still the one `ticket` registered.
    fn release(&self, id: u64, ticket: u64) -> Option<Completion> {
        let mut state = self.state.borrow_mut();
        if state.pending.get(&id)?.ticket != ticket {
            return None;
        }
        state.pending.remove(&id).map(|entry| entry.completion)
    }

    /// Dropping the senders wakes every waiter with a cancellation.
    fn clear_pending(&self) -> usize {
        let drained: Vec<Completion> = self
            .state
            .borrow_mut()
            .pending
            .drain()
            .map(|(_, entry)| entry.completion)
            .collect();
        drained.len()
    }

    fn advance(&self, event: ConnectionEvent) {
        let mut state = self.state.borrow_mut();
        match connection_transition(state.connection, event) {
            Ok(transition) => {
                debug!(
                    from = ?transition.from,
                    to = ?transition.to,
                    reason = transition.reason,
                    "connection state"
                );
                state.connection = transition.to;
            }
            Err(e) => debug!(error = %e, "ignoring connection event"),
        }
    }

    fn handle_message(&self, raw: Value) {
        let message = match self.transport.parse_message(&raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "dropping unparseable frame");
                return;
            }
        };

        match message {
            IncomingMessage::Response(response) => {
                match response.numeric_id().and_then(|id| self.take_pending(id)) {
                    Some(completion) => {
                        // The waiter may already be gone; nothing left to settle then.
                        let _ = completion.send(response.outcome.map_err(ProviderError::Rpc));
                    }
                    None => {
                        self.state.borrow_mut().unmatched_responses += 1;
                        debug!(id = %response.id, "dropping response with no pending request");
                    }
                }
            }
            IncomingMessage::Notification(notification) => self.notify(&notification),
        }
    }

    fn notify(&self, notification: &Value) {
        let listeners = self.state.borrow().listeners.clone();
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
                error!("error in notification callback");
            }
        }
    }

    fn handle_channel_lost(&self, reason: Option<String>) {
        let dropped = self.clear_pending();
        self.advance(ConnectionEvent::ChannelLost);
        warn!(
            reason = reason.as_deref().unwrap_or("port disconnected unexpectedly"),
            dropped,
            "channel disconnected"
        );
    }
}

fn transport_sink<T: Transport>(inner: &Rc<ProviderInner<T>>) -> TransportSink {
    let for_messages = Rc::downgrade(inner);
    let for_disconnect = Rc::downgrade(inner);
    TransportSink::new(
        move |raw| {
            if let Some(inner) = for_messages.upgrade() {
                inner.handle_message(raw);
            }
        },
        move |reason| {
            if let Some(inner) = for_disconnect.upgrade() {
                inner.handle_channel_lost(reason);
            }
        },
    )
}

/// Releases the pending entry when a request future finishes or is dropped early.
struct PendingGuard<'a, T: Transport> {
    inner: &'a ProviderInner<T>,
    id: u64,
    ticket: u64,
}

impl<T: Transport> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.release(self.id, self.ticket);
    }
}
