//! Connection and server commands (PING, ECHO, INFO, CONFIG)

use super::{extract_bulk_string, Command, CommandContext, Reply};
use crate::protocol::RespValue;

/// PING command - Test the connection
///
/// Syntax: PING
pub struct PingCommand;

impl Command for PingCommand {
    fn execute(&self, _ctx: &mut CommandContext, _args: &[RespValue]) -> Reply {
        RespValue::simple_string("PONG").into()
    }

    fn name(&self) -> &'static str {
        "PING"
    }
}

/// ECHO command - Return the message unchanged
///
/// Syntax: ECHO message
pub struct EchoCommand;

impl Command for EchoCommand {
    fn execute(&self, _ctx: &mut CommandContext, args: &[RespValue]) -> Reply {
        args[0].clone().into()
    }

    fn name(&self) -> &'static str {
        "ECHO"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// INFO command - Replication information about the server
///
/// Syntax: INFO [section]
pub struct InfoCommand;

impl Command for InfoCommand {
    fn execute(&self, ctx: &mut CommandContext, _args: &[RespValue]) -> Reply {
        RespValue::bulk_string(ctx.metadata.info()).into()
    }

    fn name(&self) -> &'static str {
        "INFO"
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// CONFIG command - Read the snapshot location
///
/// Syntax: CONFIG GET dir|dbfilename
///
/// Only the last argument is looked at: `dir` reports the directory, anything
/// else reports the file name.
pub struct ConfigCommand;

impl Command for ConfigCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[RespValue]) -> Reply {
        let option = match args.last().map(extract_bulk_string) {
            Some(Ok(option)) => String::from_utf8_lossy(option),
            Some(Err(e)) => return RespValue::error(format!("ERR {}", e)).into(),
            None => return RespValue::error("ERR wrong number of arguments for 'CONFIG' command").into(),
        };

        let (name, value) = ctx.store.describe_config(&option);

        RespValue::array(vec![
            RespValue::bulk_string(name),
            value.map_or_else(RespValue::null, |v| RespValue::bulk_string(v.to_string())),
        ])
        .into()
    }

    fn name(&self) -> &'static str {
        "CONFIG"
    }

    fn min_args(&self) -> usize {
        1
    }
}
