//! Replication client
//!
//! `INIT -> HANDSHAKE -> AWAIT_FULLRESYNC -> STREAMING`. The master connection is
//! a `Framed` stream, so bytes that arrive together with the snapshot stay
//! buffered and are decoded as the first streamed commands.

use super::{ReplicationError, Stage};
use crate::commands::Reply;
use crate::dispatch::Dispatcher;
use crate::protocol::{RespCodec, RespEncoder, RespError, RespValue};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Follows a master on behalf of a replica process
pub struct ReplicationClient {
    dispatcher: Arc<Dispatcher>,
}

impl ReplicationClient {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        ReplicationClient { dispatcher }
    }

    /// Connect to the configured master and replicate until the link drops
    pub async fn run(&self) -> Result<(), ReplicationError> {
        let master = match self.dispatcher.metadata().replica_of() {
            Some(master) => master.to_string(),
            None => {
                debug!("No master configured, replication client not started");
                return Ok(());
            }
        };

        let stream = TcpStream::connect(&master)
            .await
            .map_err(|source| ReplicationError::Connect {
                addr: master.clone(),
                source,
            })?;
        info!("Connected to master {}", master);

        self.run_on(stream).await
    }

    /// Replicate over an already open master connection
    pub async fn run_on<S>(&self, stream: S) -> Result<(), ReplicationError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, RespCodec::new());

        self.handshake(&mut framed).await?;
        self.await_full_resync(&mut framed).await?;
        self.stream_commands(&mut framed).await
    }

    async fn handshake<S>(&self, framed: &mut Framed<S, RespCodec>) -> Result<(), ReplicationError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!("Replication stage: {}", Stage::Handshake);

        let port = self.dispatcher.metadata().listening_port().to_string();

        request(framed, RespValue::command(["PING"])).await?;
        request(
            framed,
            RespValue::command(["REPLCONF".to_string(), "listening-port".to_string(), port]),
        )
        .await?;
        request(framed, RespValue::command(["REPLCONF", "capa", "psync2"])).await?;

        // The answer is read in the next stage
        framed
            .send(RespValue::command(["PSYNC", "?", "-1"]))
            .await
            .map_err(|e| ReplicationError::link(e, Stage::Handshake))?;

        Ok(())
    }

    async fn await_full_resync<S>(
        &self,
        framed: &mut Framed<S, RespCodec>,
    ) -> Result<(), ReplicationError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stage = Stage::AwaitFullResync;
        info!("Replication stage: {}", stage);

        let reply = next_frame(framed, stage).await?;
        match reply.as_text() {
            Some(text) if text.starts_with("FULLRESYNC") => info!("Master replied {}", text),
            _ => {
                return Err(ReplicationError::UnexpectedReply {
                    stage,
                    reply: reply.to_string(),
                })
            }
        }

        framed.codec_mut().expect_snapshot();
        let snapshot = next_frame(framed, stage).await?;

        let payload = match snapshot {
            RespValue::BulkString(payload) => payload,
            other => {
                return Err(ReplicationError::UnexpectedReply {
                    stage,
                    reply: other.to_string(),
                })
            }
        };

        match self.dispatcher.load_snapshot(payload).await {
            Ok(count) => info!("Loaded {} keys from master snapshot", count),
            Err(e) => warn!("Ignoring snapshot from master: {}", e),
        }

        Ok(())
    }

    async fn stream_commands<S>(
        &self,
        framed: &mut Framed<S, RespCodec>,
    ) -> Result<(), ReplicationError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stage = Stage::Streaming;
        info!("Replication stage: {}", stage);

        let metadata = self.dispatcher.metadata().clone();

        loop {
            let command = next_frame(framed, stage).await?;
            let processed = RespEncoder::encode(&command).len() as u64;
            debug!("Command from master: {}", command);

            let outcome = self.dispatcher.dispatch(command).await;

            if outcome.replies_to_master {
                if let Reply::Value(reply) = outcome.reply {
                    framed
                        .send(reply)
                        .await
                        .map_err(|e| ReplicationError::link(e, stage))?;
                }
            }

            metadata.advance_offset(processed);
        }
    }
}

/// Send a handshake command and wait for its single reply
async fn request<S>(
    framed: &mut Framed<S, RespCodec>,
    command: RespValue,
) -> Result<RespValue, ReplicationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Handshake request: {}", command);
    framed
        .send(command)
        .await
        .map_err(|e| ReplicationError::link(e, Stage::Handshake))?;

    let reply = next_frame(framed, Stage::Handshake).await?;
    debug!("Handshake reply: {}", reply);

    Ok(reply)
}

async fn next_frame<S>(
    framed: &mut Framed<S, RespCodec>,
    stage: Stage,
) -> Result<RespValue, ReplicationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(value)) => Ok(value),
        Some(Err(RespError::Io(e))) => Err(ReplicationError::Io(e)),
        Some(Err(e)) => {
            let buffered = framed.read_buffer();
            let preview = &buffered[..buffered.len().min(64)];
            warn!(
                "Undecodable data from master during {}: {} (next bytes {:?})",
                stage,
                e,
                String::from_utf8_lossy(preview)
            );
            Err(ReplicationError::link(e, stage))
        }
        None => Err(ReplicationError::ConnectionClosed { stage }),
    }
}
