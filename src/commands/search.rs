//! Search commands (KEYS)

use super::{Command, CommandContext, Reply};
use crate::protocol::RespValue;

/// KEYS command - List every key
///
/// Syntax: KEYS [pattern]
///
/// The pattern is accepted but not applied. Expired keys that were never read
/// again are still listed.
pub struct KeysCommand;

impl Command for KeysCommand {
    fn execute(&self, ctx: &mut CommandContext, _args: &[RespValue]) -> Reply {
        let keys = ctx
            .store
            .list_keys()
            .into_iter()
            .map(RespValue::BulkString)
            .collect();

        RespValue::Array(keys).into()
    }

    fn name(&self) -> &'static str {
        "KEYS"
    }
}
