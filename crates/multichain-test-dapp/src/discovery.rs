//! CAIP-294 wallet announcements and the registry a dapp builds from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use multichain_dapp_adapters::WINDOW_POST_MESSAGE_ID;

/// Target carrying a browser extension id.
pub const CAIP341_TARGET: &str = "caip341";
/// Target announcing a `window.postMessage` transport.
pub const CAIP348_TARGET: &str = "caip348";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementTarget {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAnnouncement {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<AnnouncementTarget>,
}

impl WalletAnnouncement {
    /// Id to hand to `set_extension_id_and_connect`: the explicit
    /// `extensionId`, then a `caip341` target, then the window sentinel when
    /// a `caip348` target is present.
    pub fn connect_target(&self) -> Option<&str> {
        if let Some(id) = self.extension_id.as_deref() {
            return Some(id);
        }
        if let Some(id) = self
            .targets
            .iter()
            .find(|target| target.kind == CAIP341_TARGET)
            .and_then(|target| target.value.as_str())
        {
            return Some(id);
        }
        self.targets
            .iter()
            .any(|target| target.kind == CAIP348_TARGET)
            .then_some(WINDOW_POST_MESSAGE_ID)
    }
}

/// Announced wallets keyed by uuid, in uuid order.
#[derive(Debug, Default)]
pub struct WalletRegistry {
    wallets: BTreeMap<String, WalletAnnouncement>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for a uuid not seen before. A repeat announcement
    /// replaces the stored one.
    pub fn announce(&mut self, announcement: WalletAnnouncement) -> bool {
        self.wallets
            .insert(announcement.uuid.clone(), announcement)
            .is_none()
    }

    /// Accepts a raw announce event of the form `{ params: <announcement> }`.
    pub fn announce_event(&mut self, event: &Value) -> Result<bool, serde_json::Error> {
        let params = event.get("params").cloned().unwrap_or(Value::Null);
        let announcement = serde_json::from_value(params)?;
        Ok(self.announce(announcement))
    }

    pub fn get(&self, uuid: &str) -> Option<&WalletAnnouncement> {
        self.wallets.get(uuid)
    }

    pub fn wallets(&self) -> impl Iterator<Item = &WalletAnnouncement> {
        self.wallets.values()
    }

    pub fn connect_target(&self, uuid: &str) -> Option<&str> {
        self.get(uuid).and_then(WalletAnnouncement::connect_target)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}
