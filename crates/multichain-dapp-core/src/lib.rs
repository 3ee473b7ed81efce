pub mod caip;
pub mod domain;
pub mod ports;
pub mod provider;
pub mod rpc;
pub mod state_machine;
pub mod time;

pub use caip::{AccountId, CaipError, ChainId, EIP155_NAMESPACE};
pub use domain::{
    CreateSessionParams, InvokeMethodParams, InvokeRequest, ScopeRequest, WALLET_CREATE_SESSION,
    WALLET_GET_SESSION, WALLET_INVOKE_METHOD, WALLET_NOTIFY, WALLET_REVOKE_SESSION,
    WALLET_SESSION_CHANGED,
};
pub use ports::{
    notification_listener, ChannelError, CloseListener, DisconnectListener, ListenerId,
    MessageListener, NotificationListener, ProviderError, RuntimeConnector, RuntimePort,
    Transport, TransportSink, WindowMessenger,
};
pub use provider::{MultichainProvider, ProviderConfig, DEFAULT_REQUEST_TIMEOUT};
pub use rpc::{
    classify_envelope, unwrap_caip_x, wrap_caip_x, IncomingMessage, JsonRpcErrorObject,
    JsonRpcRequest, JsonRpcResponse, CAIP_X_MESSAGE_TYPE, JSONRPC_VERSION,
};
pub use state_machine::{
    connection_transition, ConnectionEvent, ConnectionState, StateTransition, TransitionError,
};
