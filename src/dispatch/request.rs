//! Send requests and per-send options.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use crate::error::{DispatchError, ValidationError};
use crate::net::transport::FrameOption;

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Queue or topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Queue,
    Topic,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Topic => "topic",
        }
    }

    fn empty_name(&self) -> ValidationError {
        match self {
            Self::Queue => ValidationError::EmptyQueueName,
            Self::Topic => ValidationError::EmptyTopicName,
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated broker destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    kind: DestinationKind,
    name: String,
}

impl Destination {
    /// Rejects empty and whitespace-only names.
    pub fn new(kind: DestinationKind, name: &str) -> Result<Self, ValidationError> {
        if name.trim().is_empty() {
            return Err(kind.empty_name());
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Broker path, e.g. `/queue/orders`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.kind, self.name)
    }
}

/// What hooks get to see about a send.
#[derive(Debug, Clone, Copy)]
pub struct SendContext<'a> {
    pub identifier: &'a str,
    pub destination: &'a Destination,
    pub body: &'a [u8],
    pub started_at: SystemTime,
}

pub type BeforeHook = Arc<dyn Fn(&SendContext<'_>) + Send + Sync>;
pub type AfterHook = Arc<dyn Fn(&SendContext<'_>, Option<&DispatchError>) + Send + Sync>;

/// Per-send options.
#[derive(Clone)]
pub struct SendOptions {
    pub content_type: String,
    pub frame_options: Vec<FrameOption>,
    /// Route through this circuit, if registered on the engine.
    pub circuit: Option<String>,
    pub before: Option<BeforeHook>,
    pub after: Option<AfterHook>,
    /// Extra fields merged into audit records.
    pub log_fields: BTreeMap<String, String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            frame_options: Vec::new(),
            circuit: None,
            before: None,
            after: None,
            log_fields: BTreeMap::new(),
        }
    }
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_frame_option(mut self, option: FrameOption) -> Self {
        self.frame_options.push(option);
        self
    }

    pub fn with_circuit(mut self, name: impl Into<String>) -> Self {
        self.circuit = Some(name.into());
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SendContext<'_>) + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SendContext<'_>, Option<&DispatchError>) + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(hook));
        self
    }

    /// Attach an audit field. Empty keys are ignored.
    pub fn add_log_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if key.is_empty() {
            return;
        }
        self.log_fields.insert(key, value.into());
    }

    pub fn with_log_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_log_field(key, value);
        self
    }

    /// Content type to put on the wire; empty means the default.
    pub fn effective_content_type(&self) -> &str {
        if self.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            &self.content_type
        }
    }
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("content_type", &self.content_type)
            .field("frame_options", &self.frame_options)
            .field("circuit", &self.circuit)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("log_fields", &self.log_fields)
            .finish()
    }
}

/// A validated send waiting for a worker.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub destination: Destination,
    pub body: Vec<u8>,
    pub options: SendOptions,
}

impl SendRequest {
    pub fn new(
        kind: DestinationKind,
        name: &str,
        body: Vec<u8>,
        options: SendOptions,
    ) -> Result<Self, ValidationError> {
        let destination = Destination::new(kind, name)?;
        if body.is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        Ok(Self {
            destination,
            body,
            options,
        })
    }

    pub(crate) fn context<'a>(&'a self, identifier: &'a str, started_at: SystemTime) -> SendContext<'a> {
        SendContext {
            identifier,
            destination: &self.destination,
            body: &self.body,
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_validation() {
        assert_eq!(
            Destination::new(DestinationKind::Queue, "").unwrap_err(),
            ValidationError::EmptyQueueName
        );
        assert_eq!(
            Destination::new(DestinationKind::Topic, " \t\n").unwrap_err(),
            ValidationError::EmptyTopicName
        );

        let dest = Destination::new(DestinationKind::Topic, "prices").unwrap();
        assert_eq!(dest.path(), "/topic/prices");
        assert_eq!(dest.kind().as_str(), "topic");
    }

    #[test]
    fn test_name_checked_before_body() {
        let err = SendRequest::new(DestinationKind::Queue, "", Vec::new(), SendOptions::new()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyQueueName);

        let err = SendRequest::new(DestinationKind::Topic, " ", Vec::new(), SendOptions::new()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyTopicName);

        let err = SendRequest::new(DestinationKind::Queue, "q", Vec::new(), SendOptions::new()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyBody);
    }

    #[test]
    fn test_options_defaults() {
        let options = SendOptions::default();
        assert_eq!(options.effective_content_type(), "text/plain");
        assert!(options.circuit.is_none());

        let options = SendOptions::new().with_content_type("");
        assert_eq!(options.effective_content_type(), "text/plain");
    }

    #[test]
    fn test_add_log_field_ignores_empty_key() {
        let mut options = SendOptions::new();
        options.add_log_field("", "dropped");
        options.add_log_field("tenant", "acme");
        assert_eq!(options.log_fields.len(), 1);
        assert_eq!(options.log_fields.get("tenant").map(String::as_str), Some("acme"));
    }
}
