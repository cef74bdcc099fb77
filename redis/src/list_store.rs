//! Redis lists backing the request queue.
//!
//! | Operation              | Redis                                |
//! |------------------------|--------------------------------------|
//! | `push_head`            | `LPUSH`                              |
//! | `move_tail_to_head`    | `LMOVE src dst RIGHT LEFT`           |
//! | `remove`               | `LREM key 1 value`                   |
//! | `swap`                 | Lua: `LREM` then `LPUSH` if removed  |
//! | `len` / `range`        | `LLEN` / `LRANGE`                    |

use crate::map_error;
use appointments_core::{ListStore, StoreFuture};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction, Script};

/// Removes `ARGV[1]` from `KEYS[1]` and, only if it was there, pushes
/// `ARGV[2]` onto `KEYS[2]`. Runs atomically on the server.
const SWAP_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 1 then
    redis.call('LPUSH', KEYS[2], ARGV[2])
    return 1
end
return 0
";

/// [`ListStore`] on Redis lists.
#[derive(Clone)]
pub struct RedisListStore {
    conn_manager: ConnectionManager,
    swap: Script,
}

impl RedisListStore {
    /// Create a list store on an existing connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            swap: Script::new(SWAP_SCRIPT),
        }
    }
}

impl ListStore for RedisListStore {
    fn push_head<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.lpush(key, value).await.map_err(|e| map_error("LPUSH", &e))
        })
    }

    fn move_tail_to_head<'a>(&'a self, source: &'a str, destination: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.lmove(source, destination, Direction::Right, Direction::Left)
                .await
                .map_err(|e| map_error("LMOVE", &e))
        })
    }

    fn remove<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let removed: usize = conn.lrem(key, 1, value).await.map_err(|e| map_error("LREM", &e))?;
            Ok(removed > 0)
        })
    }

    fn swap<'a>(
        &'a self,
        source: &'a str,
        old: &'a str,
        destination: &'a str,
        new: &'a str,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let swapped: i64 = self
                .swap
                .key(source)
                .key(destination)
                .arg(old)
                .arg(new)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| map_error("swap", &e))?;
            Ok(swapped == 1)
        })
    }

    fn len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.llen(key).await.map_err(|e| map_error("LLEN", &e))
        })
    }

    fn range<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.lrange(key, start, stop).await.map_err(|e| map_error("LRANGE", &e))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| map_error("PING", &e))?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for RedisListStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisListStore").finish_non_exhaustive()
    }
}
