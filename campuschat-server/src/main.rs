use std::sync::Arc;

use campuschat_server::{
    handle_connection, Authenticator, Gateway, GroupDirectory, MembershipAuthority, MessageStore,
    RoomHub, Seed, ServerConfig, TokenDirectory,
};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let tokens = Arc::new(TokenDirectory::new());
    let groups = Arc::new(GroupDirectory::new());
    if let Some(path) = &config.seed_path {
        match Seed::load(path) {
            Ok(seed) => seed.apply(&tokens, &groups),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load seed file");
                std::process::exit(1);
            }
        }
    }

    let gateway = Arc::new(Gateway::new(
        tokens as Arc<dyn Authenticator>,
        groups as Arc<dyn MembershipAuthority>,
        Arc::new(MessageStore::new()),
        Arc::new(RoomHub::new()),
    ));

    let listener = match TcpListener::bind(&config.addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind to {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };

    info!("CampusChat server listening on {}", config.addr);
    let options = config.connection_options();

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("new connection from {}", peer_addr);

                let gateway = gateway.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => {
                            handle_connection(ws_stream, gateway, options).await;
                        }
                        Err(e) => {
                            error!("websocket handshake failed for {}: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
