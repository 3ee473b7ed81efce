pub mod config;
pub mod extension;
pub mod memory;
pub mod mock_wallet;
pub mod multiplex;
pub mod sdk;
pub mod stream;
pub mod window;

#[cfg(target_arch = "wasm32")]
pub mod browser;

pub use config::MultichainConfig;
pub use extension::ExtensionChannel;
pub use memory::{
    install_content_script, ContentScriptHandle, ExtensionHandle, MemoryPort, MemoryRuntime,
    MemoryWindow, Responder,
};
pub use mock_wallet::MockWallet;
pub use multiplex::{ObjectMultiplex, Substream};
pub use sdk::{ActiveProvider, MultichainSdk, METAMASK_PROD_CHROME_ID, WINDOW_POST_MESSAGE_ID};
pub use stream::PostMessageStream;
pub use window::WindowPostMessageChannel;

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserPort, BrowserRuntime, BrowserWindow};
