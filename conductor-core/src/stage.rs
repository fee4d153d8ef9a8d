use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use crate::error::StageError;
use crate::notification::Notification;

pub type StageResult = std::result::Result<(), StageError>;

/// A unit of work invoked once per dispatched notification.
///
/// Stages run strictly one at a time in registration order. A stage that
/// returns an error stops the remaining stages for that notification only;
/// the conductor never retries it, so implementations must be idempotent or
/// tolerate being skipped.
#[async_trait]
pub trait ReactionStage: Send + Sync {
    /// Stable name used for registration, replacement and log fields.
    fn name(&self) -> &str;

    async fn apply(&self, notification: &Notification) -> StageResult;
}

/// Closure-backed stage.
pub struct FnStage<F> {
    name: String,
    handler: F,
}

impl<F, Fut> FnStage<F>
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> ReactionStage for FnStage<F>
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, notification: &Notification) -> StageResult {
        (self.handler)(notification.clone()).await
    }
}
