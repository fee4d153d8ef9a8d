use std::fmt;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::MessageSource;
use crate::error::SourceError;
use crate::notification::{Notification, RawMessage};

/// Create an in-process queue with room for `capacity` pending messages.
pub fn channel(capacity: usize) -> (ChannelPublisher, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelPublisher { tx },
        ChannelSource {
            rx: Mutex::new(rx),
            capacity: capacity.max(1),
        },
    )
}

/// Producer half of an in-process queue.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<RawMessage>,
}

impl ChannelPublisher {
    pub async fn publish(&self, notification: &Notification) -> Result<(), SourceError> {
        let raw = notification
            .encode()
            .map_err(|err| SourceError::Transport(format!("failed to encode notification: {err}")))?;
        self.publish_raw(raw).await
    }

    pub async fn publish_raw(&self, raw: RawMessage) -> Result<(), SourceError> {
        self.tx
            .send(raw)
            .await
            .map_err(|_| SourceError::Unavailable("channel source was dropped".into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for ChannelPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPublisher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Consumer half of an in-process queue.
///
/// The channel carries a single queue, so the queue id is ignored. Once
/// every publisher is gone the source reports empty receives, the same way a
/// disconnected broker would.
pub struct ChannelSource {
    rx: Mutex<mpsc::Receiver<RawMessage>>,
    capacity: usize,
}

impl fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.rx.try_lock().map(|rx| rx.len()).ok();
        f.debug_struct("ChannelSource")
            .field("capacity", &self.capacity)
            .field("pending", &pending)
            .finish()
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn receive(&self, _queue: &str) -> Result<Option<RawMessage>, SourceError> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
