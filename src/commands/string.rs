//! String commands (SET, GET)

use super::{extract_bulk_string, extract_integer, Command, CommandContext, Reply};
use crate::protocol::RespValue;

/// SET command - Set a key to a value
///
/// Syntax: SET key value [PX milliseconds]
///
/// When more than two arguments are given, the last one is the ttl in
/// milliseconds whatever precedes it, so `SET k v 100` also expires after 100ms.
pub struct SetCommand;

impl Command for SetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[RespValue]) -> Reply {
        let key = match extract_bulk_string(&args[0]) {
            Ok(k) => k.clone(),
            Err(e) => return RespValue::error(format!("ERR {}", e)).into(),
        };

        let value = match extract_bulk_string(&args[1]) {
            Ok(v) => v.clone(),
            Err(e) => return RespValue::error(format!("ERR {}", e)).into(),
        };

        let ttl_ms = match args.get(2..).and_then(|rest| rest.last()) {
            Some(ttl) => match extract_integer(ttl) {
                Ok(ms) => ms,
                Err(_) => {
                    return RespValue::error("ERR value is not an integer or out of range").into()
                }
            },
            None => 0,
        };

        ctx.store.store(key, value, ttl_ms);

        RespValue::simple_string("OK").into()
    }

    fn name(&self) -> &'static str {
        "SET"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn is_write(&self) -> bool {
        true
    }
}

/// GET command - Get the value of a key
///
/// Syntax: GET key
pub struct GetCommand;

impl Command for GetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[RespValue]) -> Reply {
        let key = match extract_bulk_string(&args[0]) {
            Ok(k) => k,
            Err(e) => return RespValue::error(format!("ERR {}", e)).into(),
        };

        match ctx.store.fetch(key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        }
        .into()
    }

    fn name(&self) -> &'static str {
        "GET"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}
