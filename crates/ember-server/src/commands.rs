//! Command handlers. Every dispatched frame produces exactly one top-level
//! reply; command-level failures become Error replies and never reach the
//! event loop.

use ember::{IntUpdateError, MonoMs, Store, Ttl, Value};
use ember_wire::{CommandName, ReplyWriter};
use tracing::trace;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";
const NOT_A_FLOAT: &str = "ERR value is not a valid float";

/// Runs one parsed request against the store, appending the reply to `out`.
pub fn dispatch(args: &[Vec<u8>], store: &mut Store, now: MonoMs, out: &mut Vec<u8>) {
    let mut reply = ReplyWriter::new(out);
    let Some(raw_name) = args.first() else {
        reply.error("Missing arg: empty command frame");
        return;
    };
    let Some(cmd) = CommandName::lookup(raw_name) else {
        let name = String::from_utf8_lossy(raw_name).to_ascii_uppercase();
        trace!(%name, "dispatch: unknown command");
        reply.error(&format!("Unknown cmd '{name}'"));
        return;
    };

    let args = &args[1..];
    trace!(%cmd, args = args.len(), "dispatch");
    if args.len() != arity_of(cmd) {
        if args.len() < arity_of(cmd) {
            reply.error(&format!("Missing arg for '{cmd}'"));
        } else {
            reply.error(&format!("ERR wrong number of arguments for '{cmd}'"));
        }
        return;
    }

    run(cmd, args, store, now, &mut reply);
}

fn arity_of(cmd: CommandName) -> usize {
    use CommandName::*;
    match cmd {
        Ping | Keys | Dbsize => 0,
        Echo | Get | Del | Exists | Ttl | Persist | Type | Incr | Decr | Zcard => 1,
        Set | Expire | Zscore | Zrem => 2,
        Zadd | Zrange => 3,
    }
}

fn run(cmd: CommandName, args: &[Vec<u8>], store: &mut Store, now: MonoMs, reply: &mut ReplyWriter<'_>) {
    match cmd {
        CommandName::Ping => reply.string(b"PONG"),
        CommandName::Echo => reply.string(&args[0]),

        CommandName::Get => match store.get(&args[0], now) {
            None | Some(Value::Null) => reply.nil(),
            Some(Value::Str(bytes)) => reply.string(bytes),
            Some(Value::Int(n)) => reply.string(n.to_string().as_bytes()),
            Some(Value::Float(f)) => reply.string(format_double(*f).as_bytes()),
            Some(Value::Zset(_)) => reply.error(WRONGTYPE),
        },

        // Replies Nil rather than a status string; the protocol has no
        // dedicated OK frame.
        CommandName::Set => {
            store.set(&args[0], Value::Str(args[1].clone()));
            reply.nil();
        }

        CommandName::Del => reply.int(i64::from(store.remove(&args[0], now))),
        CommandName::Exists => reply.int(i64::from(store.exists(&args[0], now))),

        CommandName::Keys => {
            let keys = store.keys();
            reply.array_header(keys.len() as u32);
            for key in &keys {
                reply.string(key);
            }
        }

        CommandName::Expire => {
            let Some(seconds) = parse_i64(&args[1], reply) else { return };
            let armed = store.set_expire(&args[0], seconds.saturating_mul(1_000), now);
            reply.int(i64::from(armed));
        }

        CommandName::Ttl => match store.ttl(&args[0], now) {
            Ttl::Missing => reply.int(-2),
            Ttl::Persistent => reply.int(-1),
            Ttl::Remaining(ms) => reply.int(ms.div_ceil(1_000) as i64),
        },

        CommandName::Persist => reply.int(i64::from(store.clear_expire(&args[0], now))),

        CommandName::Type => match store.get(&args[0], now) {
            None => reply.string(b"none"),
            Some(value) => reply.string(value.type_name().as_bytes()),
        },

        CommandName::Incr => int_update(store, &args[0], 1, now, reply),
        CommandName::Decr => int_update(store, &args[0], -1, now, reply),

        CommandName::Zadd => {
            let Some(score) = parse_score(&args[1], reply) else { return };
            match store.zset_mut_or_create(&args[0], now) {
                Ok(zs) => reply.int(i64::from(zs.insert(&args[2], score))),
                Err(_) => reply.error(WRONGTYPE),
            }
        }

        CommandName::Zscore => match store.zset(&args[0], now) {
            Ok(None) => reply.nil(),
            Ok(Some(zs)) => match zs.score(&args[1]) {
                Some(score) => reply.string(format_double(score).as_bytes()),
                None => reply.nil(),
            },
            Err(_) => reply.error(WRONGTYPE),
        },

        CommandName::Zrem => match store.zset_mut(&args[0], now) {
            Ok(None) => reply.int(0),
            Ok(Some(zs)) => reply.int(i64::from(zs.remove(&args[1]))),
            Err(_) => reply.error(WRONGTYPE),
        },

        CommandName::Zcard => match store.zset(&args[0], now) {
            Ok(None) => reply.int(0),
            Ok(Some(zs)) => reply.int(zs.len() as i64),
            Err(_) => reply.error(WRONGTYPE),
        },

        CommandName::Zrange => {
            let Some(start) = parse_i64(&args[1], reply) else { return };
            let Some(stop) = parse_i64(&args[2], reply) else { return };
            match store.zset(&args[0], now) {
                Ok(None) => reply.array_header(0),
                Ok(Some(zs)) => {
                    let members = zs.range(start, stop);
                    reply.array_header(members.len() as u32);
                    for member in members {
                        reply.string(member);
                    }
                }
                Err(_) => reply.error(WRONGTYPE),
            }
        }

        CommandName::Dbsize => reply.int(store.len() as i64),
    }
}

fn int_update(store: &mut Store, key: &[u8], delta: i64, now: MonoMs, reply: &mut ReplyWriter<'_>) {
    match store.incr_by(key, delta, now) {
        Ok(n) => reply.int(n),
        Err(IntUpdateError::WrongKind(_)) => reply.error(WRONGTYPE),
        Err(IntUpdateError::NotAnInteger) => reply.error(NOT_AN_INTEGER),
        Err(IntUpdateError::Overflow) => {
            reply.error("ERR increment or decrement would overflow");
        }
    }
}

fn parse_i64(raw: &[u8], reply: &mut ReplyWriter<'_>) -> Option<i64> {
    match std::str::from_utf8(raw).ok().and_then(|s| s.parse().ok()) {
        Some(n) => Some(n),
        None => {
            reply.error(NOT_AN_INTEGER);
            None
        }
    }
}

fn parse_score(raw: &[u8], reply: &mut ReplyWriter<'_>) -> Option<f64> {
    match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<f64>().ok()) {
        Some(score) if !score.is_nan() => Some(score),
        _ => {
            reply.error(NOT_A_FLOAT);
            None
        }
    }
}

/// Integral doubles print without a fraction, the way scores come back from
/// real servers.
fn format_double(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
