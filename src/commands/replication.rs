//! Replication commands (REPLCONF, PSYNC)

use super::{ChunkStream, Command, CommandContext, Reply};
use crate::protocol::{RespEncoder, RespValue};

/// REPLCONF command - Handshake acknowledgment
///
/// Syntax: REPLCONF option value [option value ...]
///
/// Options are not validated.
pub struct ReplConfCommand;

impl Command for ReplConfCommand {
    fn execute(&self, _ctx: &mut CommandContext, _args: &[RespValue]) -> Reply {
        RespValue::simple_string("OK").into()
    }

    fn name(&self) -> &'static str {
        "REPLCONF"
    }

    fn replies_to_master(&self) -> bool {
        true
    }
}

/// PSYNC command - Start a full resynchronization
///
/// Syntax: PSYNC replicationid offset
///
/// Always answers with a full resync: the `FULLRESYNC` line followed by the
/// current keyspace as a bulk-framed snapshot without trailing CRLF.
pub struct PsyncCommand;

impl Command for PsyncCommand {
    fn execute(&self, ctx: &mut CommandContext, _args: &[RespValue]) -> Reply {
        let header = RespValue::simple_string(format!(
            "FULLRESYNC {} 0",
            ctx.metadata.replication_id()
        ));
        let snapshot = ctx.store.snapshot();

        Reply::Stream(ChunkStream::new(vec![
            RespEncoder::encode(&header),
            RespEncoder::encode_snapshot(&snapshot),
        ]))
    }

    fn name(&self) -> &'static str {
        "PSYNC"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}
