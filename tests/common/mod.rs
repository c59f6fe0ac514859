use bytes::BytesMut;
use ferrumkv::metadata::ReplicaOf;
use ferrumkv::protocol::{RespEncoder, RespParser};
use ferrumkv::{server, Dispatcher, MemoryStore, RespValue, ServerMetadata};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a server on an ephemeral port
pub async fn start_server(replica_of: Option<ReplicaOf>) -> (SocketAddr, Arc<Dispatcher>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let metadata = Arc::new(ServerMetadata::new(replica_of, addr.port()));
    let dispatcher = Arc::new(Dispatcher::new(MemoryStore::new(), metadata));

    tokio::spawn(server::serve(listener, dispatcher.clone()));

    (addr, dispatcher)
}

/// Minimal RESP client
pub struct Client {
    stream: TcpStream,
    buffer: BytesMut,
}

#[allow(dead_code)]
impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        Client {
            stream: TcpStream::connect(addr).await.unwrap(),
            buffer: BytesMut::new(),
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn send(&mut self, parts: &[&str]) {
        let command = RespValue::command(parts.iter().map(|part| part.to_string()));
        self.send_raw(&RespEncoder::encode(&command)).await;
    }

    pub async fn call(&mut self, parts: &[&str]) -> RespValue {
        self.send(parts).await;
        self.read_value().await
    }

    /// Read exactly `len` bytes
    pub async fn read_raw(&mut self, len: usize) -> Vec<u8> {
        while self.buffer.len() < len {
            self.fill().await;
        }
        self.buffer.split_to(len).to_vec()
    }

    pub async fn read_value(&mut self) -> RespValue {
        loop {
            if let Some(value) = RespParser::parse(&mut self.buffer).unwrap() {
                return value;
            }
            self.fill().await;
        }
    }

    /// Read a full-resync snapshot frame and return its payload length
    pub async fn read_snapshot(&mut self) -> usize {
        loop {
            if let Some(value) = RespParser::parse_snapshot(&mut self.buffer).unwrap() {
                return value.as_bulk_string().map_or(0, |payload| payload.len());
            }
            self.fill().await;
        }
    }

    async fn fill(&mut self) {
        let n = timeout(READ_TIMEOUT, self.stream.read_buf(&mut self.buffer))
            .await
            .expect("timed out waiting for the server")
            .unwrap();
        assert!(n > 0, "server closed the connection");
    }
}
