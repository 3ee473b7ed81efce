//! CAIP-2 chain ids and CAIP-10 account ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EIP155_NAMESPACE: &str = "eip155";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaipError {
    #[error("invalid CAIP-2 chain id: {0}")]
    InvalidChainId(String),
    #[error("invalid CAIP-10 account id: {0}")]
    InvalidAccountId(String),
}

/// `namespace:reference`, e.g. `eip155:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId {
    namespace: String,
    reference: String,
}

impl ChainId {
    pub fn new(namespace: &str, reference: &str) -> Result<Self, CaipError> {
        if !valid_namespace(namespace) || !valid_reference(reference) {
            return Err(CaipError::InvalidChainId(format!("{namespace}:{reference}")));
        }
        Ok(Self {
            namespace: namespace.to_owned(),
            reference: reference.to_owned(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl FromStr for ChainId {
    type Err = CaipError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = raw
            .split_once(':')
            .ok_or_else(|| CaipError::InvalidChainId(raw.to_owned()))?;
        Self::new(namespace, reference).map_err(|_| CaipError::InvalidChainId(raw.to_owned()))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl TryFrom<String> for ChainId {
    type Error = CaipError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<ChainId> for String {
    fn from(chain: ChainId) -> Self {
        chain.to_string()
    }
}

/// `namespace:reference:address`, e.g. `eip155:1:0xabc...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    chain: ChainId,
    address: String,
}

impl AccountId {
    pub fn new(chain: ChainId, address: &str) -> Result<Self, CaipError> {
        if !valid_address(address) {
            return Err(CaipError::InvalidAccountId(format!("{chain}:{address}")));
        }
        Ok(Self {
            chain,
            address: address.to_owned(),
        })
    }

    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl FromStr for AccountId {
    type Err = CaipError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || CaipError::InvalidAccountId(raw.to_owned());
        let mut parts = raw.splitn(3, ':');
        let (Some(namespace), Some(reference), Some(address)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let chain = ChainId::new(namespace, reference).map_err(|_| invalid())?;
        Self::new(chain, address).map_err(|_| invalid())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

impl TryFrom<String> for AccountId {
    type Error = CaipError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<AccountId> for String {
    fn from(account: AccountId) -> Self {
        account.to_string()
    }
}

fn valid_namespace(raw: &str) -> bool {
    (3..=8).contains(&raw.len())
        && raw
            .bytes()
            .all(|b| b == b'-' || b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn valid_reference(raw: &str) -> bool {
    (1..=32).contains(&raw.len())
        && raw
            .bytes()
            .all(|b| b == b'-' || b == b'_' || b.is_ascii_alphanumeric())
}

fn valid_address(raw: &str) -> bool {
    (1..=128).contains(&raw.len())
        && raw
            .bytes()
            .all(|b| matches!(b, b'-' | b'.' | b'%') || b.is_ascii_alphanumeric())
}
