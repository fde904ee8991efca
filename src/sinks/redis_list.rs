use anyhow::Context;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::Sink;

/// Encodes a row as the JSON array stored in the list.
fn row_payload(row: &[String]) -> serde_json::Result<String> {
    serde_json::to_string(row)
}

/// Pushes each row as a JSON array onto a Redis list (`RPUSH`).
///
/// Consumers read the table with `LRANGE key 0 -1`.
pub struct RedisListSink {
    id: String,
    key: String,
    conn: MultiplexedConnection,
}

impl RedisListSink {
    /// Opens a multiplexed connection and verifies it with `PING`.
    pub async fn connect(id: &str, url: &str, key: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("invalid redis url {url}"))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .context("redis connect failed")?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self {
            id: id.to_string(),
            key: key.to_string(),
            conn,
        })
    }
}

#[async_trait::async_trait]
impl Sink for RedisListSink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn append_row(&self, row: &[String]) -> anyhow::Result<()> {
        let payload = row_payload(row)?;

        // Multiplexed connections are cheap to clone
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(&self.key, payload).await?;
        Ok(())
    }
}
