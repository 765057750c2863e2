use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Grace period after the last session closes before the relay may exit.
const DEFAULT_DISCONNECT_GRACE_SECS: u64 = 5;

/// How long a headless relay waits for its first connection before giving up.
const DEFAULT_FIRST_CONNECTION_TIMEOUT_SECS: u64 = 120;

/// Connection parameters for one relay instance, fixed at construction.
///
/// The launching CLI obtains the ticket, console port, and auth headers from
/// the host's session broker and hands them over here, either directly or as a
/// single JSON argument when spawning the relay as a background process.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Remote virtualization host to open the console connection against.
    pub host: String,
    /// TLS port of the remote host's API/console endpoint.
    pub port: u16,
    /// WebSocket path on the remote host, with node/resource already substituted.
    pub ws_path: String,
    /// One-time console ticket for the remote handshake.
    pub ticket: String,
    /// Console port on the remote host, passed through as a query parameter.
    pub console_port: u16,
    /// Full authentication header map from the session broker; filtered before use.
    pub auth_headers: HashMap<String, String>,
    /// Local port to bind; 0 picks an ephemeral port.
    pub local_port: u16,
    /// Verify the remote host's TLS certificate. Off by default because the
    /// typical target presents a self-signed certificate.
    #[serde(default)]
    pub verify_tls: bool,
    /// One-time console password, only ever placed in the browser URL for the
    /// viewer to consume; never sent over the outbound connection.
    #[serde(default)]
    pub password: Option<String>,
    /// Directory holding the bundled noVNC client.
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_secs: u64,
    /// Headless mode only: exit if no connection ever arrives within this many
    /// seconds. `null` disables the timeout.
    #[serde(default = "default_first_connection_timeout")]
    pub first_connection_timeout_secs: Option<u64>,
}

fn default_asset_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("novnc")))
        .unwrap_or_else(|| PathBuf::from("novnc"))
}

fn default_disconnect_grace() -> u64 {
    DEFAULT_DISCONNECT_GRACE_SECS
}

fn default_first_connection_timeout() -> Option<u64> {
    Some(DEFAULT_FIRST_CONNECTION_TIMEOUT_SECS)
}

impl RelayConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("Failed to parse relay config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            bail!("Remote host must not be empty");
        }
        if self.ticket.is_empty() {
            bail!("Console ticket must not be empty");
        }
        if !self.ws_path.starts_with('/') {
            bail!("WebSocket path must start with '/': {}", self.ws_path);
        }
        Ok(())
    }

    /// URL the launching CLI should open in a browser, pointed at the bound
    /// local port. The password, when present, is consumed client-side by the
    /// viewer to auto-authenticate the console session.
    #[must_use]
    pub fn browser_url(&self, local_port: u16) -> String {
        let mut url = format!(
            "http://localhost:{local_port}/vnc.html?path=vnc-proxy&resize=scale&autoconnect=true"
        );
        if let Some(password) = &self.password {
            url.push_str("&password=");
            url.push_str(&urlencoding::encode(password));
        }
        url
    }

    #[must_use]
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    #[must_use]
    pub fn first_connection_timeout(&self) -> Option<Duration> {
        self.first_connection_timeout_secs.map(Duration::from_secs)
    }
}
