use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use sift_core::error::AppError;
use sift_core::rate_limit::{ConsumeOutcome, RateLimitStore};

fn store_err(e: redis::RedisError) -> AppError {
    AppError::StoreError(e.to_string())
}

/// Redis-backed sliding-window counter, shared across processes.
///
/// Each key is a sorted set of usage units (millisecond scores, unique
/// members, one member per unit of cost). A consume attempt prunes the
/// window, adds its members, and reads the cardinality in one MULTI/EXEC
/// pipeline; a denied attempt removes its members again so denials never
/// consume budget.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl RateLimitStore for RedisRateLimitStore {
    async fn consume(
        &self,
        key: &str,
        cost: u32,
        limit: u32,
        window: Duration,
    ) -> Result<ConsumeOutcome, AppError> {
        let mut conn = self.conn.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_start = now_ms - window.as_millis() as i64;
        let attempt = uuid::Uuid::new_v4();
        let members: Vec<String> = (0..cost)
            .map(|i| format!("{now_ms}-{attempt}-{i}"))
            .collect();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(window_start)
            .ignore();
        for member in &members {
            pipe.zadd(key, member, now_ms).ignore();
        }
        let (count,): (i64,) = pipe
            .zcard(key)
            .expire(key, window.as_secs() as i64 + 1)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        if count as u32 > limit {
            // Roll back our own members; the denial leaves no trace.
            if !members.is_empty() {
                let _: i64 = conn.zrem(key, &members).await.map_err(store_err)?;
            }
            Ok(ConsumeOutcome {
                allowed: false,
                current: (count - cost as i64).max(0) as u32,
            })
        } else {
            Ok(ConsumeOutcome {
                allowed: true,
                current: count.max(0) as u32,
            })
        }
    }

    async fn window_count(&self, key: &str, window: Duration) -> Result<u32, AppError> {
        let mut conn = self.conn.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_start = now_ms - window.as_millis() as i64;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(window_start)
            .ignore()
            .zcard(key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(count.max(0) as u32)
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(store_err)?;
        Ok(())
    }
}
