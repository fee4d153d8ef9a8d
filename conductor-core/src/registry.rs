use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::stage::ReactionStage;

pub type StageHandle = Arc<dyn ReactionStage>;

/// Immutable, ordered view of the registered stages taken for one dispatch.
pub type StageSnapshot = Arc<[StageHandle]>;

/// Ordered, runtime-mutable list of reaction stages.
///
/// Mutations publish a fresh list (copy-on-write). A dispatch that already
/// took a [`StageSnapshot`] keeps iterating its own copy, so registration
/// changes become visible from the next notification on. Readers hold the
/// lock only long enough to clone an `Arc`.
#[derive(Clone)]
pub struct ReactionRegistry {
    stages: Arc<RwLock<StageSnapshot>>,
}

impl Default for ReactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactionRegistry {
    pub fn new() -> Self {
        Self {
            stages: Arc::new(RwLock::new(Arc::from(Vec::<StageHandle>::new()))),
        }
    }

    /// Append a stage. A stage with the same name is replaced in place and
    /// keeps its position.
    pub fn register(&self, stage: StageHandle) {
        let mut guard = self.stages.write();
        let mut next: Vec<StageHandle> = guard.iter().cloned().collect();
        match next.iter().position(|s| s.name() == stage.name()) {
            Some(idx) => {
                debug!(target: "conductor::registry", stage = stage.name(), "replacing reaction stage");
                next[idx] = stage;
            }
            None => {
                debug!(target: "conductor::registry", stage = stage.name(), position = next.len(), "registering reaction stage");
                next.push(stage);
            }
        }
        *guard = Arc::from(next);
    }

    /// Remove the stage registered under `name`, returning it if present.
    pub fn deregister(&self, name: &str) -> Option<StageHandle> {
        let mut guard = self.stages.write();
        let idx = guard.iter().position(|s| s.name() == name)?;
        let mut next: Vec<StageHandle> = guard.iter().cloned().collect();
        let removed = next.remove(idx);
        *guard = Arc::from(next);
        debug!(target: "conductor::registry", stage = name, "deregistered reaction stage");
        Some(removed)
    }

    /// Stages visible to the next dispatch, in registration order.
    pub fn current_stages(&self) -> StageSnapshot {
        self.stages.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.current_stages()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ReactionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionRegistry")
            .field("stages", &self.names())
            .finish()
    }
}
