//! Redis list transport (RPUSH / BLPOP).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{QueueConsumer, QueueTransport, TransportError};

/// Redis-backed queue transport.
///
/// Publishes share one multiplexed connection; every consumer handle gets a
/// connection of its own because BLPOP would otherwise stall unrelated
/// commands pipelined on the shared one.
#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
    publish_conn: MultiplexedConnection,
}

impl RedisTransport {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let publish_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            publish_conn,
        })
    }
}

#[async_trait]
impl QueueTransport for RedisTransport {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut conn = self.publish_conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Command(format!("RPUSH failed: {}", e)))?;
        Ok(())
    }

    async fn consumer(&self) -> Result<Box<dyn QueueConsumer>, TransportError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Box::new(RedisConsumer { conn }))
    }
}

struct RedisConsumer {
    conn: MultiplexedConnection,
}

#[async_trait]
impl QueueConsumer for RedisConsumer {
    async fn pop(
        &mut self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        // BLPOP returns nil on timeout, which decodes to None.
        let reply: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(timeout.as_secs_f64())
            .query_async(&mut self.conn)
            .await
            .map_err(|e| TransportError::Command(format!("BLPOP failed: {}", e)))?;
        Ok(reply.map(|(_, payload)| payload))
    }
}
