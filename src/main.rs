use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use vless_relay::{
    agent::spawn_agent,
    config::{ServerContext, load_config},
    proxy::handle_connection,
    security::parse_identifier,
    stream::StreamType,
    tls::load_tls_acceptor,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    let secret_text = config.secret.as_deref().context(
        "No secret identifier configured: set `secret` in config.toml or the UUID environment variable",
    )?;
    let secret = parse_identifier(secret_text)?;

    info!(
        listen_ip = %config.listen.ip,
        listen_port = config.listen.port,
        tls = config.listen.tls.is_some(),
        "Configuration loaded"
    );

    if let Err(e) = spawn_agent(&config.agent) {
        warn!(error = %e, "Tunnel agent failed to start");
    }

    let tls_acceptor = config
        .listen
        .tls
        .as_ref()
        .map(load_tls_acceptor)
        .transpose()?;

    let ctx = Arc::new(ServerContext {
        secret,
        port: config.listen.port,
    });

    let addr = format!("{}:{}", config.listen.ip, config.listen.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    info!(
        listen_addr = %addr,
        "VLESS relay listening"
    );

    while let Ok((tcp_stream, client_addr)) = listener.accept().await {
        let ctx = ctx.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let stream = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(tcp_stream).await {
                    Ok(tls_stream) => StreamType::Tls(Box::new(tls_stream)),
                    Err(e) => {
                        error!(client_addr = %client_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => StreamType::Plain(tcp_stream),
            };

            if let Err(e) = handle_connection(stream, &ctx).await {
                error!(client_addr = %client_addr, error = %e, "Connection failed");
            }
        });
    }

    Ok(())
}
