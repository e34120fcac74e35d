use anyhow::{Context, Result};
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::debug;

/// Thin pub/sub handle used by the worker for recalculation requests and
/// their outcome events.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid REDIS_URL")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let receivers: i64 = connection.publish(channel, serialized).await?;
        debug!(channel, receivers, "event published");
        Ok(())
    }
}
