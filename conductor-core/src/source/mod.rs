//! Message sources the conductor pulls notifications from.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::notification::RawMessage;

pub mod channel;
#[cfg(feature = "redis")]
pub mod redis_list;

pub use channel::{ChannelPublisher, ChannelSource, channel};
#[cfg(feature = "redis")]
pub use redis_list::RedisListSource;

/// Transport collaborator that delivers raw messages one at a time.
///
/// `Ok(None)` means the transport had nothing to hand out, typically because
/// it is disconnected. It is not an error and the conductor simply asks
/// again. Implementations must be cancel-safe: the conductor drops the
/// pending `receive` future when it is stopped.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn receive(&self, queue: &str) -> Result<Option<RawMessage>, SourceError>;
}
