mod common;

use serde_json::json;

use multichain_dapp_adapters::mock_wallet::session_changed_frame;
use multichain_dapp_adapters::window::{CONTENT_SCRIPT, INPAGE, MULTICHAIN_SUBSTREAM_NAME};
use multichain_dapp_adapters::{install_content_script, MemoryWindow, WindowPostMessageChannel};
use multichain_dapp_core::{
    notification_listener, ConnectionState, MultichainProvider, ProviderError,
};

use common::*;

#[tokio::test(start_paused = true)]
async fn handshake_then_ping_over_the_multichain_substream() {
    let (window, content) = window_with(wallet().responder());
    let provider = window_provider(&window);

    assert!(provider.connect(()).await);
    assert!(provider.transport().is_established());
    assert!(content.is_established());
    assert_eq!(content.received(), vec![json!("ping")]);

    let posted = window.posted();
    assert!(posted.contains(&json!({"target": CONTENT_SCRIPT, "data": "SYN"})));
    assert!(posted.contains(&json!({
        "target": CONTENT_SCRIPT,
        "data": {"name": MULTICHAIN_SUBSTREAM_NAME, "data": "ping"}
    })));
}

#[tokio::test(start_paused = true)]
async fn requests_round_trip_through_the_content_script() {
    let (window, content) = window_with(wallet().responder());
    let provider = window_provider(&window);
    assert!(provider.connect(()).await);

    let session = provider
        .request("wallet_getSession", json!([]))
        .await
        .expect("getSession");
    assert_eq!(session, json!({"sessionScopes": {}}));
    assert_eq!(
        content.received()[1],
        json!({
            "type": "caip-x",
            "data": {"jsonrpc": "2.0", "id": 1, "method": "wallet_getSession", "params": []}
        })
    );
    assert!(window.posted().contains(&json!({
        "target": INPAGE,
        "data": {
            "name": MULTICHAIN_SUBSTREAM_NAME,
            "data": {"type": "caip-x", "data": {"jsonrpc": "2.0", "id": 1, "result": {"sessionScopes": {}}}}
        }
    })));
}

#[tokio::test(start_paused = true)]
async fn writes_are_buffered_until_a_late_content_script_answers() {
    let window = MemoryWindow::new();
    let provider = window_provider(&window);

    // No content script yet: the pipeline is up but the handshake is not.
    assert!(provider.connect(()).await);
    assert!(!provider.transport().is_established());

    let wallet = wallet();
    let (result, content) = tokio::join!(provider.request("wallet_getSession", json!([])), async {
        tokio::task::yield_now().await;
        install_content_script(&window, wallet.responder()).expect("install content script")
    });

    assert_eq!(result, Ok(json!({"sessionScopes": {}})));
    assert!(provider.transport().is_established());
    assert_eq!(content.received()[0], json!("ping"));
    assert_eq!(wallet.handled(), 1);
}

#[tokio::test(start_paused = true)]
async fn closing_the_window_tears_the_pipeline_down() {
    let (window, _content) = window_with(silent());
    let provider = window_provider(&window);
    assert!(provider.connect(()).await);

    let (result, ()) = tokio::join!(provider.request("wallet_getSession", json!([])), async {
        tokio::task::yield_now().await;
        window.close();
    });

    assert_eq!(result, Err(ProviderError::Disconnected { id: 1 }));
    assert!(!provider.is_connected());
    assert_eq!(provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn refused_ping_fails_the_connect() {
    let (window, content) = window_with(wallet().responder());
    let messenger = RefusingWindow::new(window.clone(), json!("ping"));
    let provider =
        MultichainProvider::new(WindowPostMessageChannel::new(messenger, CONFIRMATION_DELAY));

    assert!(!provider.connect(()).await);
    assert!(!provider.is_connected());
    assert_eq!(provider.state(), ConnectionState::Disconnected);
    assert!(content.received().is_empty());
    // Only the content script's own listener is left on the bus.
    assert_eq!(window.listener_count(), 1);
    assert_eq!(
        provider.request("wallet_getSession", json!([])).await,
        Err(ProviderError::NotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn closed_window_cannot_connect() {
    let window = MemoryWindow::new();
    window.close();
    let provider = window_provider(&window);

    assert!(!provider.connect(()).await);
    assert_eq!(provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn session_changes_are_forwarded_and_disconnect_unhooks_the_bus() {
    let (window, content) = window_with(wallet().responder());
    let provider = window_provider(&window);
    assert!(provider.connect(()).await);
    assert_eq!(window.listener_count(), 2);

    let (seen, record) = recorder();
    provider.on_notification(notification_listener(record));
    let frame = session_changed_frame(&json!({"eip155:1": {"methods": [], "notifications": []}}));
    content.push(frame.clone()).expect("push");
    assert_eq!(*seen.borrow(), vec![frame]);

    provider.disconnect();
    assert_eq!(window.listener_count(), 1);
    assert_eq!(provider.notification_listener_count(), 0);
}
