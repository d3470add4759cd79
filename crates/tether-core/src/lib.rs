pub mod channel;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod identity;
pub mod store;

pub use channel::{classify, redirect_path, Channel};
pub use client::{ConnectError, ConnectionEvent, HandshakeState, Orchestrator};
pub use config::ConnectConfig;
pub use descriptor::ServerDescriptor;
pub use identity::{is_valid, normalize, RemoteId, REMOTE_ID_LEN};
pub use store::{ConnectionStore, JsonFileStorage, MemoryStorage, SavedConnection, Storage};

/// Product name used in generated server display names.
pub const PRODUCT_NAME: &str = "Tether";
