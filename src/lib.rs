//! Local console relay server.
//!
//! Serves the bundled noVNC client over local HTTP and proxies WebSocket console
//! sessions between the browser and a remote virtualization host, authenticated
//! with a one-time console ticket. One relay instance serves one remote target,
//! and exits on its own once the last viewer disconnects.

pub mod assets;
pub mod config;
pub mod headers;
pub mod relay;
pub mod server;
pub mod state;
pub mod tls;

// Re-export commonly used types and functions
pub use config::RelayConfig;
pub use headers::filter_ws_headers;
pub use relay::{RemoteEndpoint, remote_url};
pub use server::{BoundRelay, PROXY_PATH, RelayServer, RunMode};
pub use state::ConnectionTracker;
pub use tls::insecure_client_config;
