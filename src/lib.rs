//! VLESS WebSocket Tunnel Server
//!
//! Accepts WebSocket connections, validates a VLESS-style binary handshake
//! against a configured secret identifier, and relays TCP traffic to the
//! destination the client requested. Plain HTTP requests on the same
//! listener receive a landing page and a JSON connection descriptor.

pub mod agent;
pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod proxy;
pub mod security;
pub mod stream;
pub mod tls;

// Re-export commonly used types and functions
pub use config::{AgentConfig, Config, ListenConfig, ServerContext, TlsConfig, load_config};
pub use error::SessionError;
pub use protocol::{ACK_ACCEPTED, HandshakeHeader, HandshakeRequest};
pub use proxy::{BUFFER_SIZE, handle_connection, handle_session, relay};
pub use security::{parse_identifier, verify_identifier};
pub use stream::{PrefixedStream, StreamType};
pub use tls::load_tls_acceptor;
