//! Connection handling
//!
//! Reads RESP commands from a client, dispatches them and queues the replies on
//! the connection's output channel. A connection that completes PSYNC on a master
//! becomes a replica link: nothing more is read from it and the channel is only
//! fed by propagation.

use crate::commands::Reply;
use crate::dispatch::{Dispatcher, INVALID_INPUT};
use crate::metadata::OutputChannel;
use crate::protocol::{RespCodec, RespEncoder, RespValue};
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The peer disconnected; the output channel is released
    Closed,

    /// The peer is now a replica fed through the replica set
    ReplicaLink,
}

/// Connection handler
pub struct Connection<S> {
    stream: S,

    /// Read buffer
    read_buffer: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a new connection handler
    pub fn new(stream: S) -> Self {
        Connection {
            stream,
            read_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Handle the connection until the peer leaves or it becomes a replica link
    pub async fn handle(self, dispatcher: Arc<Dispatcher>) -> io::Result<LinkState> {
        let metadata = dispatcher.metadata().clone();
        let id = metadata.next_connection_id();
        let (channel, rx) = OutputChannel::new(id);

        let (reader, writer) = tokio::io::split(self.stream);
        let writer_task = tokio::spawn(write_loop(writer, rx, id));

        let mut session = Session {
            reader,
            read_buffer: self.read_buffer,
            codec: RespCodec::new(),
            channel,
            dispatcher,
        };

        let result = session.run().await;

        if !matches!(result, Ok(LinkState::ReplicaLink)) {
            if metadata.replicas().lock().await.remove(id) {
                info!("Replica link {} closed", id);
            }

            // Let the writer drain what is already queued
            drop(session);
            let _ = writer_task.await;
        }

        result
    }
}

struct Session<S> {
    reader: ReadHalf<S>,
    read_buffer: BytesMut,
    codec: RespCodec,
    channel: OutputChannel,
    dispatcher: Arc<Dispatcher>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(&mut self) -> io::Result<LinkState> {
        loop {
            // Read data from the socket
            let n = self.reader.read_buf(&mut self.read_buffer).await?;

            // Connection closed
            if n == 0 {
                return Ok(LinkState::Closed);
            }

            debug!("Read {} bytes", n);

            // Try to parse commands from the buffer
            loop {
                match self.codec.decode(&mut self.read_buffer) {
                    Ok(Some(value)) => {
                        debug!("Parsed command: {}", value);

                        if let Some(state) = self.execute(value).await? {
                            return Ok(state);
                        }
                    }
                    Ok(None) => {
                        // Need more data
                        break;
                    }
                    Err(e) => {
                        // Protocol error
                        warn!("Protocol error: {}", e);
                        self.read_buffer.clear();
                        self.send(RespEncoder::encode(&RespValue::error(INVALID_INPUT)))
                            .await?;
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch one command and queue its reply
    ///
    /// Returns the new state when the connection stops reading.
    async fn execute(&mut self, value: RespValue) -> io::Result<Option<LinkState>> {
        let outcome = self.dispatcher.dispatch(value).await;
        let is_psync = outcome.is_psync();

        match outcome.reply {
            Reply::Value(response) => {
                debug!("Response: {}", response);
                self.send(RespEncoder::encode(&response)).await?;
            }
            Reply::Stream(mut stream) => {
                for chunk in stream.by_ref() {
                    self.send(chunk).await?;
                }

                let metadata = self.dispatcher.metadata();
                if is_psync && metadata.is_master() {
                    // The stream still holds the store, so no write lands between
                    // the snapshot and registration
                    metadata.replicas().lock().await.register(self.channel.clone());
                    drop(stream);

                    info!("Connection {} is now a replica link", self.channel.id());
                    return Ok(Some(LinkState::ReplicaLink));
                }
            }
        }

        Ok(None)
    }

    async fn send(&self, data: Bytes) -> io::Result<()> {
        self.channel
            .send(data)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }
}

/// Drain the output channel into the socket
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Bytes>, id: u64)
where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = rx.recv().await {
        let written = async {
            writer.write_all(&data).await?;
            writer.flush().await
        };

        if let Err(e) = written.await {
            debug!("Writer for connection {} stopped: {}", id, e);
            return;
        }
    }

    let _ = writer.shutdown().await;
}
