//! Change notifications consumed by the conductor.
//!
//! The wire representation is a JSON object produced upstream. Decoding
//! stamps the per-conductor arrival `sequence`, which never travels on the
//! wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// Tenant the notification belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub String);

impl OrganizationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Acting user that triggered the change.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of change described by a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// The resource's descriptive metadata document changed.
    UpdateMetadata,
    /// The resource's access control list changed.
    UpdateAccessControl,
    /// An attached element (e.g. a thumbnail) changed.
    UpdateElement,
    /// A single named property changed.
    UpdateProperty,
    /// The resource's opt-out flag changed.
    UpdateOptOut,
    /// A single named property was removed.
    DeleteProperty,
    /// The resource was deleted.
    Delete,
    /// Any kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl NotificationKind {
    /// Kinds dispatched when no explicit filter is configured.
    pub const DEFAULT_HANDLED: [NotificationKind; 3] = [
        NotificationKind::UpdateMetadata,
        NotificationKind::UpdateAccessControl,
        NotificationKind::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::UpdateMetadata => "UpdateMetadata",
            NotificationKind::UpdateAccessControl => "UpdateAccessControl",
            NotificationKind::UpdateElement => "UpdateElement",
            NotificationKind::UpdateProperty => "UpdateProperty",
            NotificationKind::UpdateOptOut => "UpdateOptOut",
            NotificationKind::DeleteProperty => "DeleteProperty",
            NotificationKind::Delete => "Delete",
            NotificationKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable change-event envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub organization: OrganizationId,
    pub principal: PrincipalId,
    /// Identifier of the changed resource (e.g. a series id).
    pub resource_id: String,
    pub kind: NotificationKind,
    /// Opaque change payload; its shape depends on `kind`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Arrival order assigned by the receiving conductor.
    #[serde(skip)]
    pub sequence: u64,
}

impl Notification {
    pub fn new(
        organization: OrganizationId,
        principal: PrincipalId,
        resource_id: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            organization,
            principal,
            resource_id: resource_id.into(),
            kind,
            body: Value::Null,
            sent_at: None,
            sequence: 0,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    /// Decode a wire message and stamp its arrival sequence.
    pub fn decode(raw: &RawMessage, sequence: u64) -> Result<Self, DecodeError> {
        let mut notification: Notification = serde_json::from_slice(raw.body())?;
        if notification.organization.0.is_empty() {
            return Err(DecodeError::MissingField("organization"));
        }
        if notification.resource_id.is_empty() {
            return Err(DecodeError::MissingField("resourceId"));
        }
        notification.sequence = sequence;
        Ok(notification)
    }

    pub fn encode(&self) -> Result<RawMessage, serde_json::Error> {
        serde_json::to_vec(self).map(RawMessage::new)
    }
}

/// Undecoded message exactly as delivered by a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    body: Vec<u8>,
}

impl RawMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}
