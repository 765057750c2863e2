use anyhow::{Context, Result};
use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::{
        Error as TungsteniteError, Message,
        client::IntoClientRequest,
        error::ProtocolError,
        http::{HeaderMap, HeaderName, HeaderValue},
    },
};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::headers::filter_ws_headers;
use crate::tls::insecure_client_config;

/// Outbound side of the relay: the remote host's console endpoint, with the
/// ticket already baked into the URL and the headers already filtered.
///
/// Built once per relay instance and reused for every viewer connection.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub url: String,
    pub headers: HeaderMap,
    pub verify_tls: bool,
}

impl RemoteEndpoint {
    /// Validates header names and values here so malformed broker output
    /// fails at startup instead of on the first viewer connection.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in filter_ws_headers(&config.auth_headers) {
            let name: HeaderName = name
                .parse()
                .with_context(|| format!("Invalid auth header name: {name}"))?;
            let value = HeaderValue::from_str(&value)
                .with_context(|| format!("Invalid value for auth header {name}"))?;
            headers.insert(name, value);
        }

        Ok(Self {
            url: remote_url(config),
            headers,
            verify_tls: config.verify_tls,
        })
    }
}

/// Console endpoint URL on the remote host.
#[must_use]
pub fn remote_url(config: &RelayConfig) -> String {
    format!(
        "wss://{}:{}{}?port={}&vncticket={}",
        config.host,
        config.port,
        config.ws_path,
        config.console_port,
        urlencoding::encode(&config.ticket)
    )
}

/// Opens the host-facing WebSocket connection.
///
/// Neither leg of the relay adds periodic ping frames; the host manages its
/// own keepalive and an extra ping layer disrupts the console protocol.
pub async fn connect_remote(
    endpoint: &RemoteEndpoint,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let mut request = endpoint
        .url
        .as_str()
        .into_client_request()
        .with_context(|| format!("Invalid remote console URL: {}", endpoint.url))?;
    request.headers_mut().extend(endpoint.headers.clone());

    let connector = if endpoint.verify_tls {
        None
    } else {
        Some(Connector::Rustls(insecure_client_config()?.into()))
    };

    let (remote_ws, _) = connect_async_tls_with_config(request, None, true, connector)
        .await
        .with_context(|| format!("Failed to connect to remote console at {}", endpoint.url))?;
    Ok(remote_ws)
}

/// Runs one relay session: connects the outbound leg, then splices frames
/// between the viewer and the remote host until either side goes away.
pub async fn run_session(client: WebSocket, endpoint: &RemoteEndpoint) -> Result<()> {
    let remote = connect_remote(endpoint).await?;
    info!(remote = %endpoint.url, "Connected to remote console");
    pump(client, remote).await
}

/// Forwards frames in both directions until the first side terminates, then
/// drops both sockets so the peer closes within one scheduling tick. Payloads
/// are opaque: order and frame boundaries are preserved, nothing is inspected.
async fn pump(
    client: WebSocket,
    remote: WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<()> {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut remote_tx, mut remote_rx) = remote.split();

    let client_to_remote = async {
        while let Some(msg) = client_rx.next().await {
            match msg {
                Ok(ClientMessage::Binary(data)) => {
                    debug!(bytes = data.len(), "Forwarding viewer frame to host");
                    remote_tx
                        .send(Message::Binary(data.into()))
                        .await
                        .context("Failed to forward viewer frame to host")?;
                }
                Ok(ClientMessage::Text(text)) => {
                    remote_tx
                        .send(Message::Text(text.into()))
                        .await
                        .context("Failed to forward viewer frame to host")?;
                }
                Ok(ClientMessage::Close(_)) => {
                    debug!("Viewer closed the connection");
                    break;
                }
                // Ping/pong are answered by the server layer, not relayed.
                Ok(_) => {}
                Err(e) => {
                    debug!("Viewer disconnected: {e}");
                    break;
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    let remote_to_client = async {
        while let Some(msg) = remote_rx.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    debug!(bytes = data.len(), "Forwarding host frame to viewer");
                    client_tx
                        .send(ClientMessage::Binary(data.into()))
                        .await
                        .context("Failed to forward host frame to viewer")?;
                }
                Ok(Message::Text(text)) => {
                    client_tx
                        .send(ClientMessage::Text(text.as_str().to_owned()))
                        .await
                        .context("Failed to forward host frame to viewer")?;
                }
                Ok(Message::Close(_)) => {
                    debug!("Remote host closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    match e {
                        TungsteniteError::ConnectionClosed
                        | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake) =>
                        {
                            debug!("Remote host disconnected: {e}");
                        }
                        _ => {
                            warn!("Remote console error: {e}");
                        }
                    }
                    break;
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = client_to_remote => result?,
        result = remote_to_client => result?,
    }

    info!("Console session closed");
    Ok(())
}
