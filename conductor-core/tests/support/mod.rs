#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::{
    ConductorConfig, EventConductor, InMemoryContextProvider, MessageSource, Notification,
    NotificationKind, OrganizationId, PrincipalId, ProcessingContext, RawMessage,
    ReactionRegistry, ReactionStage, SourceError, StageError, StageResult,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

pub fn notification(resource: &str, kind: NotificationKind) -> Notification {
    Notification::new(
        OrganizationId::new("mh_default_org"),
        PrincipalId::new("admin"),
        resource,
        kind,
    )
}

pub fn notification_for(org: &str, user: &str, resource: &str, kind: NotificationKind) -> Notification {
    Notification::new(OrganizationId::new(org), PrincipalId::new(user), resource, kind)
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn conductor_with(
    config: ConductorConfig,
    source: Arc<dyn MessageSource>,
    registry: ReactionRegistry,
    context: InMemoryContextProvider,
) -> EventConductor {
    EventConductor::new(config, source, registry, Arc::new(context))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Begin,
    End,
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub stage: String,
    pub resource: String,
    pub sequence: u64,
    pub phase: Phase,
    pub context: Option<ProcessingContext>,
}

/// Shared, ordered log of stage invocations across every stage of a test.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: Entry) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    /// `(stage, resource)` for every stage that started, in order.
    pub fn invocations(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.phase == Phase::Begin)
            .map(|e| (e.stage.clone(), e.resource.clone()))
            .collect()
    }
}

type FailWhen = Box<dyn Fn(&Notification) -> bool + Send + Sync>;

/// Stage that records begin/end into a [`Journal`], optionally failing,
/// panicking, or pausing for some notifications.
pub struct RecordingStage {
    name: String,
    journal: Journal,
    context: Option<InMemoryContextProvider>,
    fail_when: Option<FailWhen>,
    panic_when: Option<FailWhen>,
    delay: Duration,
    gate: Option<Gate>,
}

impl fmt::Debug for RecordingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingStage").field("name", &self.name).finish()
    }
}

impl RecordingStage {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            context: None,
            fail_when: None,
            panic_when: None,
            delay: Duration::ZERO,
            gate: None,
        }
    }

    pub fn observing(mut self, context: &InMemoryContextProvider) -> Self {
        self.context = Some(context.clone());
        self
    }

    pub fn failing_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn panicking_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        self.panic_when = Some(Box::new(predicate));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block inside `apply` for `resource` until the gate is released.
    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn into_handle(self) -> Arc<dyn ReactionStage> {
        Arc::new(self)
    }

    fn record(&self, notification: &Notification, phase: Phase) {
        self.journal.push(Entry {
            stage: self.name.clone(),
            resource: notification.resource_id.clone(),
            sequence: notification.sequence,
            phase,
            context: self.context.as_ref().and_then(|c| c.current()),
        });
    }
}

#[async_trait]
impl ReactionStage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, notification: &Notification) -> StageResult {
        self.record(notification, Phase::Begin);

        if let Some(gate) = &self.gate {
            if gate.resource == notification.resource_id {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        if self.panic_when.as_ref().is_some_and(|p| p(notification)) {
            panic!("stage {} panicked on {}", self.name, notification.resource_id);
        }
        if self.fail_when.as_ref().is_some_and(|p| p(notification)) {
            self.record(notification, Phase::End);
            return Err(StageError::failed(format!(
                "{} rejected {}",
                self.name, notification.resource_id
            )));
        }

        self.record(notification, Phase::End);
        Ok(())
    }
}

/// Rendezvous used to hold a stage mid-dispatch.
#[derive(Clone)]
pub struct Gate {
    resource: String,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    pub fn for_resource(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Step {
    Message(RawMessage),
    Empty,
    Fail(String),
    Panic(&'static str),
}

/// Source that replays a fixed script, then blocks forever.
#[derive(Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    blocked: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            blocked: AtomicUsize::new(0),
        }
    }

    pub fn empties(count: usize) -> Self {
        Self::new(std::iter::repeat_n(Step::Empty, count))
    }

    /// Number of receives currently parked after the script ran out.
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn receive(&self, _queue: &str) -> Result<Option<RawMessage>, SourceError> {
        let next = self.steps.lock().pop_front();
        match next {
            Some(Step::Message(raw)) => Ok(Some(raw)),
            Some(Step::Empty) => Ok(None),
            Some(Step::Fail(reason)) => Err(SourceError::Transport(reason)),
            Some(Step::Panic(reason)) => panic!("{reason}"),
            None => {
                let _parked = Parked::new(&self.blocked);
                futures::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
        }
    }
}

struct Parked<'a>(&'a AtomicUsize);

impl<'a> Parked<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

/// `tracing` layer that keeps every event for later assertions.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the thread's default subscriber for the guard's lifetime.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = Registry::default().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == level && e.message.contains(needle))
            .count()
    }

    pub fn count_level(&self, level: Level) -> usize {
        self.events.lock().iter().filter(|e| e.level == level).count()
    }

    /// Values of `field` on every `level` event whose message contains `needle`.
    pub fn field_values(&self, level: Level, needle: &str, field: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == level && e.message.contains(needle))
            .flat_map(|e| e.fields.iter().filter(|(name, _)| name == field))
            .map(|(_, value)| value.clone())
            .collect()
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}
