//! Scripted multichain wallet used behind the in-process platforms.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::{json, Map, Value};
use tracing::debug;

use multichain_dapp_core::{
    AccountId, ChainId, CreateSessionParams, InvokeMethodParams, JSONRPC_VERSION,
    WALLET_CREATE_SESSION, WALLET_GET_SESSION, WALLET_INVOKE_METHOD, WALLET_NOTIFY,
    WALLET_REVOKE_SESSION, WALLET_SESSION_CHANGED,
};

use crate::memory::Responder;

pub const UNAUTHORIZED: i64 = 4100;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INVALID_REQUEST: i64 = -32600;

#[derive(Debug, Clone, PartialEq)]
struct GrantedScope {
    methods: Vec<String>,
    notifications: Vec<String>,
    accounts: Vec<AccountId>,
}

#[derive(Debug, Default)]
pub struct MockWallet {
    /// Addresses the wallet controls, per CAIP namespace.
    addresses: BTreeMap<String, Vec<String>>,
    session: RefCell<BTreeMap<ChainId, GrantedScope>>,
    handled: Cell<usize>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, namespace: &str, address: &str) -> Self {
        self.addresses
            .entry(namespace.to_owned())
            .or_default()
            .push(address.to_owned());
        self
    }

    /// Requests answered so far.
    pub fn handled(&self) -> usize {
        self.handled.get()
    }

    pub fn session_scopes(&self) -> Value {
        scopes_json(&self.session.borrow())
    }

    pub fn responder(self: &Rc<Self>) -> Responder {
        let wallet = Rc::clone(self);
        Rc::new(move |envelope| wallet.respond(envelope))
    }

    /// Answers one request envelope. The response comes first, followed by
    /// any `wallet_sessionChanged` notification the request caused.
    pub fn respond(&self, envelope: &Value) -> Vec<Value> {
        let Some(id) = envelope.get("id").filter(|id| !id.is_null()).cloned() else {
            debug!(%envelope, "mock wallet ignoring envelope without id");
            return Vec::new();
        };
        self.handled.set(self.handled.get() + 1);

        let method = envelope.get("method").and_then(Value::as_str);
        let params = envelope.get("params").cloned().unwrap_or(Value::Null);
        let (outcome, session_changed) = match method {
            Some(WALLET_CREATE_SESSION) => (self.create_session(params), true),
            Some(WALLET_GET_SESSION) => (Ok(json!({ "sessionScopes": self.session_scopes() })), false),
            Some(WALLET_REVOKE_SESSION) => {
                self.session.borrow_mut().clear();
                (Ok(json!(true)), true)
            }
            Some(WALLET_INVOKE_METHOD) => (self.invoke_method(params), false),
            Some(other) => (
                Err(rpc_error(METHOD_NOT_FOUND, &format!("The method \"{other}\" does not exist / is not available."))),
                false,
            ),
            None => (Err(rpc_error(INVALID_REQUEST, "Invalid request")), false),
        };

        let mut frames = vec![match outcome {
            Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }),
        }];
        if session_changed && frames[0].get("result").is_some() {
            frames.push(session_changed_frame(&self.session_scopes()));
        }
        frames
    }

    fn create_session(&self, params: Value) -> Result<Value, Value> {
        let request: CreateSessionParams = serde_json::from_value(params)
            .map_err(|e| rpc_error(INVALID_PARAMS, &format!("Invalid params: {e}")))?;

        let mut session = self.session.borrow_mut();
        for (scope, requested) in request.optional_scopes {
            let accounts = if requested.accounts.is_empty() {
                self.addresses
                    .get(scope.namespace())
                    .into_iter()
                    .flatten()
                    .filter_map(|address| AccountId::new(scope.clone(), address).ok())
                    .collect()
            } else {
                requested.accounts
            };
            session.insert(
                scope,
                GrantedScope {
                    methods: requested.methods,
                    notifications: requested.notifications,
                    accounts,
                },
            );
        }
        Ok(json!({ "sessionScopes": scopes_json(&session) }))
    }

    fn invoke_method(&self, params: Value) -> Result<Value, Value> {
        let invoke: InvokeMethodParams = serde_json::from_value(params)
            .map_err(|e| rpc_error(INVALID_PARAMS, &format!("Invalid params: {e}")))?;
        let session = self.session.borrow();
        let granted = session
            .get(&invoke.scope)
            .filter(|scope| scope.methods.iter().any(|m| *m == invoke.request.method))
            .ok_or_else(|| {
                rpc_error(
                    UNAUTHORIZED,
                    "The requested account and/or method has not been authorized by the user.",
                )
            })?;

        Ok(match invoke.request.method.as_str() {
            "eth_chainId" => match invoke.scope.reference().parse::<u64>() {
                Ok(chain) => json!(format!("0x{chain:x}")),
                Err(_) => json!(invoke.scope.reference()),
            },
            "eth_accounts" => json!(granted
                .accounts
                .iter()
                .map(|account| account.address())
                .collect::<Vec<_>>()),
            "eth_blockNumber" => json!("0x1"),
            _ => Value::Null,
        })
    }
}

fn rpc_error(code: i64, message: &str) -> Value {
    json!({ "code": code, "message": message })
}

fn scopes_json(session: &BTreeMap<ChainId, GrantedScope>) -> Value {
    let scopes: Map<String, Value> = session
        .iter()
        .map(|(scope, granted)| {
            (
                scope.to_string(),
                json!({
                    "methods": granted.methods,
                    "notifications": granted.notifications,
                    "accounts": granted.accounts,
                }),
            )
        })
        .collect();
    Value::Object(scopes)
}

pub fn session_changed_frame(session_scopes: &Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": WALLET_SESSION_CHANGED,
        "params": { "sessionScopes": session_scopes },
    })
}

/// A `wallet_notify` envelope carrying a chain notification for `scope`.
pub fn wallet_notify_frame(scope: &ChainId, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": WALLET_NOTIFY,
        "params": {
            "scope": scope,
            "notification": { "method": method, "params": params },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    fn wallet() -> MockWallet {
        MockWallet::new().with_address("eip155", "0xabc")
    }

    #[test]
    fn create_session_grants_scopes_and_announces_change() {
        let wallet = wallet();
        let frames = wallet.respond(&request(
            1,
            WALLET_CREATE_SESSION,
            json!({ "optionalScopes": { "eip155:1": { "methods": ["eth_chainId"], "notifications": [], "accounts": [] } } }),
        ));
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0]["result"]["sessionScopes"]["eip155:1"]["accounts"],
            json!(["eip155:1:0xabc"])
        );
        assert_eq!(frames[1]["method"], json!(WALLET_SESSION_CHANGED));
        assert!(frames[1].get("id").is_none());
    }

    #[test]
    fn invoke_requires_granted_scope_and_method() {
        let wallet = wallet();
        wallet.respond(&request(
            1,
            WALLET_CREATE_SESSION,
            json!({ "optionalScopes": { "eip155:59144": { "methods": ["eth_chainId"], "notifications": [], "accounts": [] } } }),
        ));

        let ok = wallet.respond(&request(
            2,
            WALLET_INVOKE_METHOD,
            json!({ "scope": "eip155:59144", "request": { "method": "eth_chainId", "params": [] } }),
        ));
        assert_eq!(ok[0]["result"], json!("0xe708"));

        let denied = wallet.respond(&request(
            3,
            WALLET_INVOKE_METHOD,
            json!({ "scope": "eip155:1", "request": { "method": "eth_chainId", "params": [] } }),
        ));
        assert_eq!(denied[0]["error"]["code"], json!(UNAUTHORIZED));

        let unknown = wallet.respond(&request(4, "eth_chainId", json!([])));
        assert_eq!(unknown[0]["error"]["code"], json!(METHOD_NOT_FOUND));
        assert_eq!(wallet.handled(), 4);
    }

    #[test]
    fn revoke_clears_session() {
        let wallet = wallet();
        wallet.respond(&request(
            1,
            WALLET_CREATE_SESSION,
            json!({ "optionalScopes": { "eip155:1": { "methods": [], "notifications": [], "accounts": [] } } }),
        ));
        let frames = wallet.respond(&request(2, WALLET_REVOKE_SESSION, json!([])));
        assert_eq!(frames[0]["result"], json!(true));
        assert_eq!(frames[1]["params"]["sessionScopes"], json!({}));
        assert_eq!(wallet.session_scopes(), json!({}));
    }
}
