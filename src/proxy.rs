use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{Error as TungsteniteError, Message, error::ProtocolError},
};
use tracing::{debug, error, info, warn};

use crate::config::ServerContext;
use crate::error::SessionError;
use crate::http::{self, RequestHead};
use crate::protocol::{ACK_ACCEPTED, HandshakeHeader, HandshakeRequest};
use crate::security::verify_identifier;
use crate::stream::{PrefixedStream, StreamType};

pub const BUFFER_SIZE: usize = 8192;

/// Dispatches one accepted connection: plain HTTP requests are answered
/// directly, WebSocket upgrades continue into a tunnel session.
#[tracing::instrument(skip(stream, ctx), fields(client_addr = ?stream.peer_addr().ok()))]
pub async fn handle_connection(mut stream: StreamType, ctx: &ServerContext) -> Result<()> {
    let head = http::read_request_head(&mut stream).await?;
    let request = match RequestHead::parse(&head) {
        Ok(request) => request,
        Err(e) => {
            http::respond_bad_request(&mut stream).await?;
            return Err(e).context("Rejected malformed HTTP request");
        }
    };

    if !request.is_websocket_upgrade() {
        debug!(method = %request.method, target = %request.target, "Serving plain HTTP request");
        return http::respond(&mut stream, &request, ctx).await;
    }

    let websocket = accept_async(PrefixedStream::new(head, stream))
        .await
        .context("Failed to perform WebSocket handshake")?;
    handle_session(websocket, &ctx.secret).await?;
    Ok(())
}

/// Runs one tunnel session over an upgraded WebSocket connection.
///
/// The first binary message is the handshake; once it is validated and the
/// destination connection is up, a two-byte acknowledgment is sent and the
/// session switches to transparent relaying. Any rejection closes the
/// WebSocket without an outbound connection ever being attempted.
#[tracing::instrument(skip(websocket, secret))]
pub async fn handle_session<S>(
    mut websocket: WebSocketStream<S>,
    secret: &[u8; 16],
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = match await_handshake(&mut websocket).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!("Client disconnected before sending a handshake");
            return Ok(());
        }
        Err(e) => {
            let _ = websocket.close(None).await;
            return Err(e);
        }
    };

    let request = match accept_request(&frame, secret) {
        Ok(request) => request,
        Err(e) => {
            let _ = websocket.close(None).await;
            return Err(e);
        }
    };

    debug!(host = %request.host, port = request.port, "Connecting to destination");
    let mut tcp_stream = match TcpStream::connect((request.host.as_str(), request.port)).await {
        Ok(stream) => stream,
        Err(source) => {
            let _ = websocket.close(None).await;
            return Err(SessionError::Connect {
                host: request.host,
                port: request.port,
                source,
            });
        }
    };
    info!(host = %request.host, port = request.port, "Connected to destination");

    // Acknowledgment goes out before any relayed byte in either direction.
    websocket
        .send(Message::Binary(vec![request.version, ACK_ACCEPTED].into()))
        .await
        .map_err(SessionError::WebSocket)?;

    if !request.payload.is_empty() {
        tcp_stream
            .write_all(&request.payload)
            .await
            .map_err(SessionError::Tcp)?;
    }

    relay(websocket, tcp_stream).await
}

/// Parse, authenticate, then decode the destination — in that order.
fn accept_request(frame: &[u8], secret: &[u8; 16]) -> Result<HandshakeRequest, SessionError> {
    let header = HandshakeHeader::parse(frame)?;
    verify_identifier(&header.identifier, secret)?;
    header.into_request()
}

/// Waits for the handshake frame. `None` means the client went away before
/// sending one, which ends the session without error.
async fn await_handshake<S>(
    websocket: &mut WebSocketStream<S>,
) -> Result<Option<Vec<u8>>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = websocket.next().await {
        match message {
            Ok(Message::Binary(data)) => return Ok(Some(data.to_vec())),
            Ok(Message::Text(_)) => {
                return Err(SessionError::Handshake("expected a binary handshake frame"));
            }
            Ok(Message::Close(_)) => return Ok(None),
            Ok(_) => {} // control frames before the handshake are tolerated
            Err(e) => match e {
                TungsteniteError::ConnectionClosed
                | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                    return Ok(None);
                }
                _ => return Err(SessionError::WebSocket(e)),
            },
        }
    }
    Ok(None)
}

/// Copies bytes in both directions until either side terminates, then
/// closes both. Each direction awaits its write before reading more, so
/// in-flight data stays bounded.
pub async fn relay<S>(
    websocket: WebSocketStream<S>,
    tcp_stream: TcpStream,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (mut tcp_reader, mut tcp_writer) = tcp_stream.into_split();

    let ws_to_tcp = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    debug!(bytes = data.len(), "Forwarding data from WebSocket to TCP");
                    if let Err(e) = tcp_writer.write_all(&data).await {
                        error!(error = %e, bytes = data.len(), "Failed to write to TCP");
                        return Err(SessionError::Tcp(e));
                    }
                }
                Ok(Message::Text(_)) => {
                    warn!("Dropping text message (binary only)");
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    match e {
                        TungsteniteError::ConnectionClosed
                        | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake) =>
                        {
                            debug!("Client disconnected: {e}");
                        }
                        _ => {
                            error!("WebSocket error: {e}");
                        }
                    }
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    };

    let tcp_to_ws = async {
        let mut buffer = [0u8; BUFFER_SIZE];

        loop {
            match tcp_reader.read(&mut buffer).await {
                Ok(0) => {
                    info!("TCP connection closed");
                    break;
                }
                Ok(n) => {
                    let data = &buffer[..n];
                    debug!(bytes = n, "Forwarding data from TCP to WebSocket");
                    if let Err(e) = ws_sender.send(Message::Binary(data.to_vec().into())).await {
                        error!(error = %e, bytes = data.len(), "Failed to send WebSocket message");
                        return Err(SessionError::WebSocket(e));
                    }
                }
                Err(e) => {
                    error!("Failed to read from TCP: {e}");
                    break;
                }
            }
        }
        Ok(())
    };

    tokio::select! {
        result = ws_to_tcp => result?,
        result = tcp_to_ws => result?,
    }

    info!("Relay session closed");
    Ok(())
}
