use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Terminal failures for a single tunnel session.
///
/// None of these are retried: the session is torn down and the remote peer
/// only ever observes its connection closing.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The handshake frame was malformed or ended before a required field.
    #[error("malformed handshake: {0}")]
    Handshake(&'static str),

    /// The handshake named an address type outside IPv4, domain, and IPv6.
    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    /// The presented identifier does not match the configured secret.
    #[error("identifier does not match the configured secret")]
    Auth,

    /// The outbound connection to the requested destination failed.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The TCP side of the session failed while writing relayed bytes.
    #[error("tcp stream failed: {0}")]
    Tcp(#[source] io::Error),

    /// The WebSocket side of the session failed while sending.
    #[error("websocket stream failed: {0}")]
    WebSocket(#[source] tungstenite::Error),
}
