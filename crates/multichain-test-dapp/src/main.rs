//! Multichain test dapp
//!
//! Drives a CAIP-25 session against the in-process mock wallet over either
//! the extension runtime channel or the window postMessage channel.

mod discovery;
mod session_hook;

use std::rc::Rc;

use clap::{Parser, ValueEnum};
use eyre::{bail, eyre, WrapErr};
use serde_json::{json, Value};
use tracing::{info, warn};

use multichain_dapp_adapters::{
    install_content_script, MemoryRuntime, MemoryWindow, MockWallet, MultichainConfig,
    MultichainSdk,
};
use multichain_dapp_core::{
    ChainId, InvokeMethodParams, InvokeRequest, EIP155_NAMESPACE, WALLET_NOTIFY,
};

use discovery::{WalletRegistry, CAIP348_TARGET};
use session_hook::{MemoryExtensionIdStore, SessionHook};

const EXTENSION_WALLET_UUID: &str = "7c3f1c0e-6f0a-4d5e-9d35-3b1f7e2c9a01";
const WINDOW_WALLET_UUID: &str = "7c3f1c0e-6f0a-4d5e-9d35-3b1f7e2c9a02";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Channel {
    /// `chrome.runtime` style port to an installed extension
    Extension,
    /// `window.postMessage` through a content script
    Window,
}

#[derive(Debug, Parser)]
#[command(name = "multichain-test-dapp", version, about = "Multichain API test dapp")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Channel::Extension)]
    channel: Channel,

    /// Connect to this extension id instead of the announced one
    #[arg(long)]
    extension_id: Option<String>,

    /// CAIP-2 scope to request (repeatable)
    #[arg(long = "scope", default_values_t = ["eip155:1".to_owned(), "eip155:59144".to_owned()])]
    scopes: Vec<String>,

    /// CAIP-10 account to request (repeatable)
    #[arg(long = "account")]
    accounts: Vec<String>,

    /// Method invoked on every granted scope
    #[arg(long, default_value = "eth_chainId")]
    method: String,

    /// JSON params for the invoked method
    #[arg(long, default_value = "[]")]
    params: String,

    /// Address the mock wallet controls
    #[arg(long, default_value = "0x5cfe73b6021e818b776b421b1c4db2474086a7e1")]
    address: String,

    /// Revoke the session before exiting
    #[arg(long)]
    revoke: bool,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting multichain test dapp");

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .wrap_err("failed to build runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> eyre::Result<()> {
    let config = MultichainConfig::from_env();
    let scopes = cli
        .scopes
        .iter()
        .map(|raw| raw.parse::<ChainId>())
        .collect::<Result<Vec<_>, _>>()?;
    let params: Value = serde_json::from_str(&cli.params).wrap_err("--params is not JSON")?;

    let wallet = Rc::new(MockWallet::new().with_address(EIP155_NAMESPACE, &cli.address));
    let runtime = MemoryRuntime::new();
    let window = MemoryWindow::new();
    let _extension = runtime.install_extension(&config.default_extension_id, wallet.responder());
    let _content = install_content_script(&window, wallet.responder())?;

    let registry = announce_wallets(&config)?;
    info!(wallets = registry.len(), "wallet discovery finished");
    for wallet in registry.wallets() {
        info!(name = %wallet.name, uuid = %wallet.uuid, rdns = %wallet.rdns, "wallet announced");
    }
    let uuid = match cli.channel {
        Channel::Extension => EXTENSION_WALLET_UUID,
        Channel::Window => WINDOW_WALLET_UUID,
    };
    let target = match cli.extension_id {
        Some(id) => id,
        None => registry
            .connect_target(uuid)
            .map(str::to_owned)
            .ok_or_else(|| eyre!("wallet {uuid} announced no connect target"))?,
    };

    let hook = SessionHook::new(
        MultichainSdk::new(runtime, window, config),
        MemoryExtensionIdStore::new(),
    );
    let updates = hook.subscribe();
    if !hook.auto_connect().await && !hook.connect(&target).await {
        bail!("could not connect to wallet at {target}");
    }
    info!(connected = hook.view().is_connected, %target, "wallet connected");
    hook.on_session_changed(|notification| {
        println!("wallet_sessionChanged: {}", notification["params"]);
    });
    hook.on_notification(|notification| {
        if notification["method"] == WALLET_NOTIFY {
            println!("wallet_notify: {}", notification["params"]);
        }
    });

    let session = hook.create_session(&scopes, &cli.accounts).await?;
    println!("session:\n{}", serde_json::to_string_pretty(&session)?);

    for scope in &scopes {
        let request = InvokeMethodParams {
            scope: scope.clone(),
            request: InvokeRequest {
                method: cli.method.clone(),
                params: params.clone(),
            },
        };
        if let Err(e) = hook.invoke_method(request).await {
            warn!(%scope, method = %cli.method, error = %e, "wallet_invokeMethod failed");
        }
    }

    if cli.revoke {
        hook.revoke_session().await?;
        let remaining = hook.get_session().await?;
        println!("session revoked, wallet now reports: {remaining}");
    }

    let view = updates.borrow().clone();
    for (key, result) in &view.invoke_results {
        match result {
            Ok(value) => println!("{} {}: {value}", key.scope, key.method),
            Err(e) => println!("{} {} failed: {e}", key.scope, key.method),
        }
    }
    if let Some(session) = &view.current_session {
        println!("current session: {session}");
    }
    if let Some(changed) = &view.last_session_changed {
        println!("last wallet_sessionChanged: {changed}");
    }
    if let Some(notify) = &view.last_wallet_notify {
        println!("last wallet_notify: {notify}");
    }
    hook.disconnect();
    Ok(())
}

/// What a CAIP-294 announcement round would yield for the in-process wallet:
/// one entry per channel it can be reached on.
fn announce_wallets(config: &MultichainConfig) -> eyre::Result<WalletRegistry> {
    let mut registry = WalletRegistry::new();
    registry.announce_event(&json!({
        "params": {
            "uuid": EXTENSION_WALLET_UUID,
            "name": "Mock Wallet",
            "icon": "",
            "rdns": "io.metamask.mock",
            "extensionId": config.default_extension_id,
        }
    }))?;
    registry.announce_event(&json!({
        "params": {
            "uuid": WINDOW_WALLET_UUID,
            "name": "Mock Wallet (window)",
            "icon": "",
            "rdns": "io.metamask.mock.window",
            "targets": [{ "type": CAIP348_TARGET }],
        }
    }))?;
    if registry.is_empty() {
        bail!("no wallets announced");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::{announce_wallets, Channel, Cli, EXTENSION_WALLET_UUID, WINDOW_WALLET_UUID};
    use clap::Parser;
    use multichain_dapp_adapters::{MultichainConfig, WINDOW_POST_MESSAGE_ID};

    #[test]
    fn announced_wallets_cover_both_channels() {
        let config = MultichainConfig::default();
        let registry = announce_wallets(&config).expect("announcements parse");

        assert_eq!(
            registry.connect_target(EXTENSION_WALLET_UUID),
            Some(config.default_extension_id.as_str())
        );
        assert_eq!(
            registry.connect_target(WINDOW_WALLET_UUID),
            Some(WINDOW_POST_MESSAGE_ID)
        );
    }

    #[test]
    fn cli_defaults_and_repeated_flags() {
        let cli = Cli::try_parse_from(["multichain-test-dapp"]).expect("defaults parse");
        assert_eq!(cli.channel, Channel::Extension);
        assert_eq!(cli.scopes, vec!["eip155:1", "eip155:59144"]);
        assert_eq!(cli.method, "eth_chainId");
        assert!(!cli.revoke);

        let cli = Cli::try_parse_from([
            "multichain-test-dapp",
            "--channel",
            "window",
            "--scope",
            "eip155:10",
            "--account",
            "eip155:10:0xabc",
            "--revoke",
        ])
        .expect("flags parse");
        assert_eq!(cli.channel, Channel::Window);
        assert_eq!(cli.scopes, vec!["eip155:10"]);
        assert_eq!(cli.accounts, vec!["eip155:10:0xabc"]);
        assert!(cli.revoke);
    }
}
