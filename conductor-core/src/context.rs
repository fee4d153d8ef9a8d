use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::notification::{Notification, OrganizationId, PrincipalId};

/// Tenant + acting principal under which a notification is processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessingContext {
    pub organization: OrganizationId,
    pub principal: PrincipalId,
}

impl ProcessingContext {
    pub fn new(organization: OrganizationId, principal: PrincipalId) -> Self {
        Self {
            organization,
            principal,
        }
    }

    pub fn for_notification(notification: &Notification) -> Self {
        Self::new(
            notification.organization.clone(),
            notification.principal.clone(),
        )
    }
}

impl fmt::Display for ProcessingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.principal, self.organization)
    }
}

/// Security/tenant context collaborator.
///
/// Only the conductor's worker calls into this while it runs, so
/// implementations see strictly alternating `set_current`/`clear` pairs.
pub trait ContextProvider: Send + Sync {
    fn set_current(&self, context: ProcessingContext);
    fn clear(&self);
}

/// Process-local provider that keeps the active context in memory.
#[derive(Clone, Default)]
pub struct InMemoryContextProvider {
    current: Arc<RwLock<Option<ProcessingContext>>>,
}

impl InMemoryContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ProcessingContext> {
        self.current.read().clone()
    }
}

impl ContextProvider for InMemoryContextProvider {
    fn set_current(&self, context: ProcessingContext) {
        *self.current.write() = Some(context);
    }

    fn clear(&self) {
        *self.current.write() = None;
    }
}

impl fmt::Debug for InMemoryContextProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryContextProvider")
            .field("current", &self.current.try_read().map(|guard| (*guard).clone()))
            .finish()
    }
}

/// Clears the provider when dropped, so the context never outlives the
/// dispatch that established it, even across a panic.
pub(crate) struct ContextScope<'a> {
    provider: &'a dyn ContextProvider,
}

impl<'a> ContextScope<'a> {
    pub(crate) fn enter(provider: &'a dyn ContextProvider, context: ProcessingContext) -> Self {
        provider.set_current(context);
        Self { provider }
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.provider.clear();
    }
}
