use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Confirmed,
    ConfirmationFailed,
    Disconnect,
    ChannelLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal connection transition: {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

pub fn connection_transition(
    from: ConnectionState,
    event: ConnectionEvent,
) -> Result<StateTransition, TransitionError> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    let (to, reason) = match (from, event) {
        (S::Disconnected, E::Connect) => (S::Connecting, "connect requested"),
        (S::Connecting, E::Connect) => (S::Connecting, "connect restarted"),
        (S::Connected, E::Connect) => (S::Connecting, "reconnect replaces active channel"),
        (S::Connecting, E::Confirmed) => (S::Connected, "remote end confirmed"),
        (S::Connecting, E::ConfirmationFailed) => (S::Disconnected, "confirmation failed"),
        (S::Disconnected, E::ConfirmationFailed) => {
            (S::Disconnected, "confirmation failed after channel loss")
        }
        (_, E::Disconnect) => (S::Disconnected, "explicit disconnect"),
        (_, E::ChannelLost) => (S::Disconnected, "channel lost"),
        _ => return Err(TransitionError { from, event }),
    };

    Ok(StateTransition { from, to, reason })
}
