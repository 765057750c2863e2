use std::collections::HashMap;

/// Header names carried over to the outbound WebSocket handshake.
const SESSION_HEADERS: [&str; 2] = ["cookie", "authorization"];

/// Reduces the session broker's authentication header map to the entries the
/// remote host accepts on a WebSocket upgrade.
///
/// Only the session cookie and the bearer/API-token authorization header are
/// kept, matched case-insensitively with the original casing preserved. The
/// CSRF-prevention token in particular must be dropped: it breaks the upgrade
/// handshake against the remote host.
#[must_use]
pub fn filter_ws_headers(auth_headers: &HashMap<String, String>) -> HashMap<String, String> {
    auth_headers
        .iter()
        .filter(|(name, _)| {
            SESSION_HEADERS
                .iter()
                .any(|keep| name.eq_ignore_ascii_case(keep))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
