use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::caip::{AccountId, ChainId, EIP155_NAMESPACE};

pub const WALLET_CREATE_SESSION: &str = "wallet_createSession";
pub const WALLET_GET_SESSION: &str = "wallet_getSession";
pub const WALLET_REVOKE_SESSION: &str = "wallet_revokeSession";
pub const WALLET_INVOKE_METHOD: &str = "wallet_invokeMethod";

pub const WALLET_NOTIFY: &str = "wallet_notify";
pub const WALLET_SESSION_CHANGED: &str = "wallet_sessionChanged";

pub const EIP155_NOTIFICATIONS: &[&str] = &["eth_subscription"];

/// Default EVM capability set requested for every `eip155` scope.
pub const EIP155_METHODS: &[&str] = &[
    "eth_subscribe",
    "eth_unsubscribe",
    "eth_blockNumber",
    "eth_call",
    "eth_chainId",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getCode",
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_getLogs",
    "eth_getProof",
    "eth_getStorageAt",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_getUncleCountByBlockHash",
    "eth_getUncleCountByBlockNumber",
    "eth_newBlockFilter",
    "eth_newFilter",
    "eth_newPendingTransactionFilter",
    "eth_sendRawTransaction",
    "eth_syncing",
    "eth_uninstallFilter",
    "eth_sendTransaction",
    "eth_signTypedData_v4",
    "eth_decrypt",
    "eth_getEncryptionPublicKey",
    "personal_sign",
    "wallet_watchAsset",
    "wallet_getCapabilities",
    "wallet_sendCalls",
    "wallet_getCallsStatus",
    "wallet_showCallsStatus",
    "web3_clientVersion",
];

/// Capabilities requested for one scope inside `optionalScopes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRequest {
    pub methods: Vec<String>,
    pub notifications: Vec<String>,
    pub accounts: Vec<AccountId>,
}

impl ScopeRequest {
    /// Unknown namespaces get an empty capability set and rely on wallet defaults.
    pub fn for_chain(chain: &ChainId) -> Self {
        match chain.namespace() {
            EIP155_NAMESPACE => Self {
                methods: EIP155_METHODS.iter().map(|m| (*m).to_owned()).collect(),
                notifications: EIP155_NOTIFICATIONS.iter().map(|n| (*n).to_owned()).collect(),
                accounts: Vec::new(),
            },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionParams {
    pub optional_scopes: BTreeMap<ChainId, ScopeRequest>,
}

impl CreateSessionParams {
    /// Every account lands in each requested scope sharing its namespace.
    pub fn build(scopes: &[ChainId], accounts: &[AccountId]) -> Self {
        let mut optional_scopes: BTreeMap<ChainId, ScopeRequest> = scopes
            .iter()
            .map(|scope| (scope.clone(), ScopeRequest::for_chain(scope)))
            .collect();

        for account in accounts {
            for (scope, request) in optional_scopes.iter_mut() {
                if scope.namespace() == account.chain().namespace() {
                    request.accounts.push(account.clone());
                }
            }
        }

        Self { optional_scopes }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeMethodParams {
    pub scope: ChainId,
    pub request: InvokeRequest,
}
