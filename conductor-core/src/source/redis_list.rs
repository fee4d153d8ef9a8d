use std::fmt;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::MessageSource;
use crate::config::RedisSourceConfig;
use crate::error::SourceError;
use crate::notification::RawMessage;

/// Message source backed by a Redis list, consumed with `BLPOP`.
///
/// Producers `RPUSH` JSON-encoded notifications onto the list named after
/// the queue id. A `BLPOP` cancelled by shutdown after the server already
/// popped an entry loses that entry.
pub struct RedisListSource {
    client: redis::Client,
    config: RedisSourceConfig,
    conn: Mutex<Option<ConnectionManager>>,
}

impl fmt::Debug for RedisListSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connected = self.conn.try_lock().map(|c| c.is_some()).ok();
        f.debug_struct("RedisListSource")
            .field("config", &self.config)
            .field("connected", &connected)
            .finish()
    }
}

impl RedisListSource {
    /// Validates the url; the connection itself is opened on first use.
    pub fn new(config: RedisSourceConfig) -> Result<Self, SourceError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| SourceError::Transport(format!("Failed to create Redis client: {e}")))?;
        Ok(Self {
            client,
            config,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> redis::RedisResult<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let manager_config =
            ConnectionManagerConfig::new().set_number_of_retries(self.config.connect_retries);
        let conn = ConnectionManager::new_with_config(self.client.clone(), manager_config).await?;
        info!(target: "conductor::source", url = %self.config.url, "connected to Redis message source");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn disconnect(&self) {
        self.conn.lock().await.take();
    }

    async fn unavailable(&self, error: &redis::RedisError) -> Result<Option<RawMessage>, SourceError> {
        debug!(target: "conductor::source", error = %error, "Redis message source unavailable");
        self.disconnect().await;
        tokio::time::sleep(self.config.reconnect_backoff()).await;
        Ok(None)
    }
}

#[async_trait]
impl MessageSource for RedisListSource {
    async fn receive(&self, queue: &str) -> Result<Option<RawMessage>, SourceError> {
        let key = self.config.key_for(queue);
        let timeout_secs = self.config.block_timeout().as_secs_f64();

        loop {
            let mut conn = match self.connection().await {
                Ok(conn) => conn,
                Err(err) => return self.unavailable(&err).await,
            };

            let reply = redis::cmd("BLPOP")
                .arg(&key)
                .arg(timeout_secs)
                .query_async::<Option<(String, Vec<u8>)>>(&mut conn)
                .await;

            match reply {
                Ok(Some((_, body))) => return Ok(Some(RawMessage::new(body))),
                // Idle queue: block again rather than reporting an outage.
                Ok(None) => continue,
                Err(err) if err.is_timeout() => continue,
                Err(err) => return self.unavailable(&err).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        let config = RedisSourceConfig {
            url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            RedisListSource::new(config),
            Err(SourceError::Transport(_))
        ));
    }

    #[test]
    fn accepts_url_without_connecting() {
        let source = RedisListSource::new(RedisSourceConfig::default()).expect("client");
        assert!(format!("{source:?}").contains("RedisListSource"));
    }

    #[tokio::test]
    async fn unreachable_server_reports_an_empty_receive() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let source = RedisListSource::new(RedisSourceConfig {
            url: format!("redis://{addr}"),
            connect_retries: 0,
            reconnect_backoff_ms: 5,
            ..Default::default()
        })
        .expect("client");

        let received = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            source.receive("SERIES.Conductor"),
        )
        .await
        .expect("receive gives up on a refused connection");

        assert!(matches!(received, Ok(None)));
        assert!(source.conn.lock().await.is_none());
        assert!(format!("{source:?}").contains("connected: Some(false)"));
    }
}
