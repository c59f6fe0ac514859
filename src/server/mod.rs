//! Server module
//!
//! Accepts TCP connections and hands each one to a `Connection` task.

mod connection;

use crate::dispatch::Dispatcher;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use connection::{Connection, LinkState};

/// Run the server
///
/// Binds `addr` and serves connections until the listener fails.
pub async fn run(addr: &str, dispatcher: Arc<Dispatcher>) -> io::Result<()> {
    // Bind the TCP listener
    let listener = TcpListener::bind(addr).await?;
    info!("FerrumKV listening on {}", listener.local_addr()?);

    serve(listener, dispatcher).await
}

/// Serve connections from an already bound listener
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> io::Result<()> {
    loop {
        // Accept incoming connections
        let (socket, addr) = listener.accept().await?;
        info!("New connection from {}", addr);

        let dispatcher = dispatcher.clone();

        // Spawn a new task to handle this connection
        tokio::spawn(async move {
            match Connection::new(socket).handle(dispatcher).await {
                Ok(LinkState::Closed) => info!("Connection closed: {}", addr),
                Ok(LinkState::ReplicaLink) => info!("Replica attached from {}", addr),
                Err(e) => error!("Connection error from {}: {}", addr, e),
            }
        });
    }
}
