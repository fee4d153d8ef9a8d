use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use conductor_core::source::RedisListSource;
use conductor_core::{MessageSource, RawMessage, SourceError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SourceConfig;

pub type StdinSource = LineSource<BufReader<Stdin>>;

/// Reads one JSON notification per line. Blank lines are skipped.
///
/// Once the input is exhausted every receive stays pending until the
/// conductor is stopped.
#[derive(Debug)]
pub struct LineSource<R> {
    lines: Mutex<Lines<R>>,
    exhausted: AtomicBool,
}

impl StdinSource {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
            exhausted: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<R> MessageSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn receive(&self, _queue: &str) -> Result<Option<RawMessage>, SourceError> {
        if !self.exhausted.load(Ordering::Acquire) {
            let mut lines = self.lines.lock().await;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => return Ok(Some(RawMessage::new(line))),
                    Ok(None) => break,
                    Err(err) => return Err(SourceError::Transport(err.to_string())),
                }
            }
            if !self.exhausted.swap(true, Ordering::AcqRel) {
                info!(target: "conductor::source", "input closed; waiting for shutdown");
            }
        }
        futures::future::pending().await
    }
}

/// Build the transport named by the configuration.
pub fn build_source(config: &SourceConfig) -> Result<Arc<dyn MessageSource>, SourceError> {
    match config {
        SourceConfig::Redis(redis) => {
            let source = RedisListSource::new(redis.clone())?;
            Ok(Arc::new(source))
        }
        SourceConfig::Stdin => {
            warn!(
                target: "conductor::source",
                "reading notifications from stdin; the queue id is ignored"
            );
            Ok(Arc::new(StdinSource::stdin()))
        }
    }
}
