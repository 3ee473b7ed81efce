mod common;

use serde_json::json;

use multichain_dapp_adapters::mock_wallet::UNAUTHORIZED;
use multichain_dapp_adapters::{
    install_content_script, ActiveProvider, MemoryRuntime, MemoryWindow, WINDOW_POST_MESSAGE_ID,
};
use multichain_dapp_core::{
    notification_listener, InvokeMethodParams, InvokeRequest, ProviderError,
    WALLET_SESSION_CHANGED,
};

use common::*;

fn invoke(scope: &str, method: &str) -> InvokeMethodParams {
    InvokeMethodParams {
        scope: scope.parse().expect("scope"),
        request: InvokeRequest {
            method: method.to_owned(),
            params: json!([]),
        },
    }
}

#[tokio::test(start_paused = true)]
async fn create_invoke_revoke_over_extension_channel() {
    let wallet = wallet();
    let (runtime, handle) = runtime_with(wallet.responder());
    let sdk = sdk(&runtime, &MemoryWindow::new());

    assert!(sdk.set_extension_id_and_connect(EXTENSION_ID).await);
    assert!(sdk.is_connected());
    assert!(matches!(
        sdk.provider().as_deref(),
        Some(ActiveProvider::Extension(_))
    ));

    let (seen, record) = recorder();
    sdk.on_notification(notification_listener(record));

    let account = format!("eip155:1:{ADDRESS}");
    let session = sdk
        .create_session(
            &scopes(&["eip155:1", "eip155:59144"]),
            &[account.clone(), "not-an-account".to_owned()],
        )
        .await
        .expect("createSession");
    assert_eq!(session["sessionScopes"]["eip155:1"]["accounts"], json!([account]));
    assert!(session["sessionScopes"]["eip155:59144"].is_object());

    let received = handle.received();
    let sent = &received[1]["data"];
    assert_eq!(sent["method"], json!("wallet_createSession"));
    assert_eq!(
        sent["params"]["optionalScopes"]["eip155:59144"]["accounts"],
        json!([account])
    );

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0]["method"], json!(WALLET_SESSION_CHANGED));

    let chain = sdk
        .invoke_method(invoke("eip155:59144", "eth_chainId"))
        .await
        .expect("eth_chainId");
    assert_eq!(chain, json!("0xe708"));

    match sdk.invoke_method(invoke("eip155:10", "eth_chainId")).await {
        Err(ProviderError::Rpc(error)) => assert_eq!(error.code, UNAUTHORIZED),
        other => panic!("expected unauthorized error, got {other:?}"),
    }

    assert_eq!(sdk.revoke_session().await, Ok(json!(true)));
    assert_eq!(
        sdk.get_session().await,
        Ok(json!({"sessionScopes": {}}))
    );
    assert_eq!(seen.borrow().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn sentinel_id_selects_window_channel() {
    let window = MemoryWindow::new();
    let _content = install_content_script(&window, wallet().responder()).expect("content script");
    let sdk = sdk(&MemoryRuntime::new(), &window);

    assert!(sdk.set_extension_id_and_connect(WINDOW_POST_MESSAGE_ID).await);
    assert!(matches!(
        sdk.provider().as_deref(),
        Some(ActiveProvider::Window(_))
    ));

    let session = sdk
        .create_session(&scopes(&["eip155:1"]), &[])
        .await
        .expect("createSession");
    assert!(session["sessionScopes"]["eip155:1"].is_object());
    assert_eq!(
        sdk.get_session().await.expect("getSession"),
        session
    );
}

#[tokio::test(start_paused = true)]
async fn calls_without_provider_fail_fast() {
    let sdk = sdk(&MemoryRuntime::new(), &MemoryWindow::new());

    assert!(!sdk.is_connected());
    assert_eq!(sdk.get_session().await, Err(ProviderError::NotConnected));
    assert_eq!(
        sdk.create_session(&scopes(&["eip155:1"]), &[]).await,
        Err(ProviderError::NotConnected)
    );
    let (_, record) = recorder();
    sdk.on_notification(notification_listener(record));
    sdk.disconnect();
    sdk.disconnect();
}

#[tokio::test(start_paused = true)]
async fn switching_channels_disconnects_the_previous_provider() {
    let (runtime, handle) = runtime_with(wallet().responder());
    let window = MemoryWindow::new();
    let _content = install_content_script(&window, wallet().responder()).expect("content script");
    let sdk = sdk(&runtime, &window);

    assert!(sdk.set_extension_id_and_connect(EXTENSION_ID).await);
    assert_eq!(handle.connection_count(), 1);
    let first = sdk.provider().expect("extension provider");

    assert!(sdk.set_extension_id_and_connect(WINDOW_POST_MESSAGE_ID).await);
    assert_eq!(handle.connection_count(), 0);
    assert!(!first.is_connected());
    assert!(sdk.is_connected());
}

#[tokio::test(start_paused = true)]
async fn failed_connect_leaves_a_disconnected_provider() {
    let sdk = sdk(&MemoryRuntime::new(), &MemoryWindow::new());

    assert!(!sdk.set_extension_id_and_connect("missing").await);
    assert!(sdk.provider().is_some());
    assert_eq!(sdk.get_session().await, Err(ProviderError::NotConnected));
}
