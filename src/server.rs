use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::assets;
use crate::config::RelayConfig;
use crate::relay::{self, RemoteEndpoint};
use crate::state::ConnectionTracker;

/// The one reserved path that triggers proxy behavior; everything else is
/// served statically.
pub const PROXY_PATH: &str = "/vnc-proxy";

/// How the relay decides when to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exit on operator Enter or on the idle timeout, whichever comes first.
    Interactive,
    /// No terminal attached; exit on the idle timeout only.
    Headless,
}

/// Shared state behind the router.
pub struct AppState {
    pub remote: RemoteEndpoint,
    pub tracker: ConnectionTracker,
    pub asset_root: PathBuf,
}

/// One relay instance: serves the bundled viewer and bridges its WebSocket
/// connections to a single remote console target.
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<AppState>,
}

impl RelayServer {
    /// Validates the config, filters the auth headers, and resolves the asset
    /// root. All construction-time failures surface here, before any port is
    /// bound or browser opened.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let remote = RemoteEndpoint::from_config(&config)?;
        let asset_root = config.asset_root.canonicalize().with_context(|| {
            format!("Asset root not found: {}", config.asset_root.display())
        })?;

        let state = Arc::new(AppState {
            remote,
            tracker: ConnectionTracker::new(),
            asset_root,
        });
        Ok(Self { config, state })
    }

    /// Binds the local port. Fatal if the port is unavailable; callers open
    /// the browser only after this succeeds.
    pub async fn bind(self) -> Result<BoundRelay> {
        let addr = ("127.0.0.1", self.config.local_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind local port {}", self.config.local_port))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read bound local address")?;

        info!(listen_addr = %local_addr, "Console relay listening");
        Ok(BoundRelay {
            listener,
            local_addr,
            config: self.config,
            state: self.state,
        })
    }
}

/// A relay with its local port bound, ready to serve.
pub struct BoundRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: RelayConfig,
    state: Arc<AppState>,
}

impl BoundRelay {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Browser entry URL for the actually-bound port.
    #[must_use]
    pub fn browser_url(&self) -> String {
        self.config.browser_url(self.local_addr.port())
    }

    /// Serves until the mode's exit condition fires, then closes down even if
    /// viewer sessions are still open. Session-level faults are contained;
    /// only server-level failures propagate.
    pub async fn serve(self, mode: RunMode) -> Result<()> {
        let tracker = self.state.tracker.clone();
        let grace = self.config.disconnect_grace();
        let first_connection_timeout = self.config.first_connection_timeout();

        let shutdown = async move {
            match mode {
                RunMode::Headless => {
                    tracker.idle_shutdown(grace, first_connection_timeout).await;
                }
                RunMode::Interactive => {
                    tokio::select! {
                        _ = operator_signal() => info!("Operator requested shutdown"),
                        () = tracker.idle_shutdown(grace, None) => {}
                    }
                }
            }
        };

        serve_until(self.listener, router(self.state), shutdown).await
    }
}

/// Resolves when the operator presses Enter.
///
/// The terminal read happens on a detached thread, not a runtime blocking
/// task: when the idle timeout wins the shutdown race, a pending blocking
/// task would stall runtime shutdown until Enter is pressed, while a detached
/// thread holds nothing up.
fn operator_signal() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });
    rx
}

/// Serves until `shutdown` resolves, then stops immediately.
///
/// The server future is dropped rather than drained: a graceful drain would
/// wait out upgraded WebSocket sessions, so an operator-requested exit with a
/// viewer still attached would never complete.
async fn serve_until(
    listener: TcpListener,
    app: Router,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result.context("Relay server failed")
        }
        () = shutdown => Ok(()),
    }
}

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(PROXY_PATH, get(proxy_handler))
        .fallback(asset_handler)
        .with_state(state)
}

async fn proxy_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_session(state, socket))
}

async fn handle_session(state: Arc<AppState>, client: WebSocket) {
    state.tracker.session_opened();
    info!(
        active = state.tracker.active_sessions(),
        "Console session opened"
    );

    if let Err(e) = relay::run_session(client, &state.remote).await {
        warn!(error = %e, "Console session ended with error");
    }
    state.tracker.session_closed();
}

async fn asset_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET {
        return StatusCode::NOT_FOUND.into_response();
    }
    assets::serve(&state.asset_root, uri.path()).await
}
