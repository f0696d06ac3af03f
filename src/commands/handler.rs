//! Command Dispatch
//!
//! Turns parsed [`Request`]s into calls on the [`Store`] and the store's
//! results into [`RespValue`] replies.
//!
//! Every method here blocks on filesystem I/O; the connection layer runs
//! [`CommandHandler::execute`] on tokio's blocking pool.
//!
//! ## Supported Commands
//!
//! | Command                     | Store call            | Reply                    |
//! |-----------------------------|-----------------------|--------------------------|
//! | `PING [message]`            |                       | `PONG` or the message    |
//! | `ECHO message`              |                       | the message              |
//! | `GET key`                   | `read`                | value or nil             |
//! | `SET key value`             | `write`               | `OK`                     |
//! | `APPEND key value`          | `append`              | `OK`                     |
//! | `DEL key [key ...]`         | `delete`              | number removed           |
//! | `EXISTS key [key ...]`      | `exists`              | number present           |
//! | `MSET key value [...]`      | `bulk_write`          | `OK` or first failure    |
//! | `MGET key [key ...]`        | `read`                | array of values / nils   |
//! | `KEYS [pattern]`            | `keys`                | matching keys            |
//! | `SAVE`                      | `backup`              | `OK`                     |
//! | `INFO`                      | `stats`               | text report              |
//! | `QUIT`                      |                       | `OK`, then disconnect    |

use crate::protocol::{Request, RespValue};
use crate::storage::{Store, StoreError};
use bytes::Bytes;
use std::fmt::Write as _;
use std::time::Instant;
use tracing::debug;

/// Worker threads used for `MSET`.
const MSET_WORKERS: usize = 4;

/// Executes client commands against a shared store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Store,
    started: Instant,
}

impl CommandHandler {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs one request. Blocks on disk I/O.
    pub fn execute(&self, request: Request) -> RespValue {
        let Some(name) = request.name() else {
            return RespValue::error("ERR empty command");
        };
        let args = &request.args[1..];

        match name.as_str() {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "APPEND" => self.cmd_append(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "MSET" => self.cmd_mset(args),
            "MGET" => self.cmd_mget(args),
            "KEYS" => self.cmd_keys(args),
            "SAVE" => self.cmd_save(args),
            "INFO" => self.cmd_info(),
            "QUIT" => RespValue::ok(),
            _ => RespValue::error(format!("ERR unknown command '{}'", name.to_lowercase())),
        }
    }

    fn cmd_ping(&self, args: &[Bytes]) -> RespValue {
        match args {
            [] => RespValue::SimpleString("PONG".to_string()),
            [message] => RespValue::bulk(message.clone()),
            _ => wrong_arity("ping"),
        }
    }

    fn cmd_echo(&self, args: &[Bytes]) -> RespValue {
        match args {
            [message] => RespValue::bulk(message.clone()),
            _ => wrong_arity("echo"),
        }
    }

    fn cmd_get(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("get");
        };
        let key = match key_str(key) {
            Ok(key) => key,
            Err(reply) => return reply,
        };
        self.read_reply(key)
    }

    fn cmd_set(&self, args: &[Bytes]) -> RespValue {
        let [key, value] = args else {
            return wrong_arity("set");
        };
        match key_str(key) {
            Ok(key) => ok_or_error(self.store.write(key, value)),
            Err(reply) => reply,
        }
    }

    fn cmd_append(&self, args: &[Bytes]) -> RespValue {
        let [key, value] = args else {
            return wrong_arity("append");
        };
        match key_str(key) {
            Ok(key) => ok_or_error(self.store.append(key, value)),
            Err(reply) => reply,
        }
    }

    fn cmd_del(&self, args: &[Bytes]) -> RespValue {
        if args.is_empty() {
            return wrong_arity("del");
        }
        let mut removed = 0;
        for key in args {
            let key = match key_str(key) {
                Ok(key) => key,
                Err(reply) => return reply,
            };
            match self.store.delete(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => return store_error(&e),
            }
        }
        RespValue::Integer(removed)
    }

    fn cmd_exists(&self, args: &[Bytes]) -> RespValue {
        if args.is_empty() {
            return wrong_arity("exists");
        }
        let mut present = 0;
        for key in args {
            let key = match key_str(key) {
                Ok(key) => key,
                Err(reply) => return reply,
            };
            match self.store.exists(key) {
                Ok(true) => present += 1,
                Ok(false) => {}
                // A key the store can never hold does not exist
                Err(StoreError::InvalidKey { .. }) => {}
                Err(e) => return store_error(&e),
            }
        }
        RespValue::Integer(present)
    }

    fn cmd_mset(&self, args: &[Bytes]) -> RespValue {
        if args.is_empty() || args.len() % 2 != 0 {
            return wrong_arity("mset");
        }
        let mut pairs = Vec::with_capacity(args.len() / 2);
        for pair in args.chunks_exact(2) {
            match key_str(&pair[0]) {
                Ok(key) => pairs.push((key.to_string(), pair[1].clone())),
                Err(reply) => return reply,
            }
        }

        let results = self.store.bulk_write(pairs, MSET_WORKERS);
        match results.iter().find(|r| !r.is_ok()) {
            None => RespValue::ok(),
            Some(failed) => {
                let failures = results.iter().filter(|r| !r.is_ok()).count();
                debug!(failures = failures, "MSET had failures");
                match failed.error() {
                    Some(e) => store_error(e),
                    None => RespValue::error("ERR write failed"),
                }
            }
        }
    }

    fn cmd_mget(&self, args: &[Bytes]) -> RespValue {
        if args.is_empty() {
            return wrong_arity("mget");
        }
        let values = args
            .iter()
            .map(|key| match key_str(key) {
                Ok(key) => self.read_reply(key),
                Err(_) => RespValue::Null,
            })
            .map(|reply| if reply.is_error() { RespValue::Null } else { reply })
            .collect();
        RespValue::Array(values)
    }

    fn cmd_keys(&self, args: &[Bytes]) -> RespValue {
        let pattern = match args {
            [] => "*",
            [pattern] => match key_str(pattern) {
                Ok(pattern) => pattern,
                Err(reply) => return reply,
            },
            _ => return wrong_arity("keys"),
        };

        match self.store.keys() {
            Ok(mut keys) => {
                keys.retain(|key| matches_pattern(pattern, key));
                keys.sort_unstable();
                RespValue::Array(keys.into_iter().map(RespValue::bulk).collect())
            }
            Err(e) => store_error(&e),
        }
    }

    fn cmd_save(&self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_arity("save");
        }
        ok_or_error(self.store.backup().map(|_| ()))
    }

    fn cmd_info(&self) -> RespValue {
        let stats = self.store.stats();
        let mut info = String::new();
        let _ = writeln!(info, "# Server");
        let _ = writeln!(info, "vaultkv_version:{}", crate::VERSION);
        let _ = writeln!(info, "uptime_in_seconds:{}", self.started.elapsed().as_secs());
        let _ = writeln!(info, "base_dir:{}", self.store.base_dir().display());
        let _ = writeln!(info);
        let _ = writeln!(info, "# Cache");
        let _ = writeln!(info, "policy:{}", stats.policy);
        let _ = writeln!(info, "entries:{}", stats.entries);
        let _ = writeln!(info, "used_bytes:{}", stats.size);
        let _ = writeln!(info, "capacity_bytes:{}", stats.capacity);
        let _ = writeln!(info, "hits:{}", stats.hits);
        let _ = writeln!(info, "misses:{}", stats.misses);
        let _ = writeln!(info, "hit_rate:{:.4}", stats.hit_rate());
        let _ = writeln!(info, "evictions:{}", stats.evictions);
        let _ = writeln!(info);
        let _ = writeln!(info, "# Store");
        let _ = writeln!(info, "writes:{}", stats.writes);
        let _ = writeln!(info, "deletes:{}", stats.deletes);
        RespValue::bulk(info)
    }

    fn read_reply(&self, key: &str) -> RespValue {
        match self.store.read(key) {
            Ok(value) => RespValue::bulk(value),
            Err(e) if e.is_not_found() => RespValue::Null,
            Err(e) => store_error(&e),
        }
    }
}

fn key_str(raw: &Bytes) -> Result<&str, RespValue> {
    std::str::from_utf8(raw).map_err(|_| RespValue::error("ERR keys must be valid UTF-8"))
}

fn wrong_arity(command: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{command}' command"
    ))
}

fn ok_or_error(result: Result<(), StoreError>) -> RespValue {
    match result {
        Ok(()) => RespValue::ok(),
        Err(e) => store_error(&e),
    }
}

fn store_error(err: &StoreError) -> RespValue {
    RespValue::error(format!("ERR {err}"))
}

/// Supports `*`, `prefix*` and exact matches.
fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}
