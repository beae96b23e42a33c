//! Types for the watch api
//!
//! See <https://kubernetes.io/docs/reference/using-api/api-concepts/#efficient-detection-of-changes>
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::Status, object::Object};

/// The type tag of a raw watch event
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    /// An object was added
    Added,
    /// An object was modified
    Modified,
    /// An object was deleted
    Deleted,
    /// A resume-point marker; carries only a resourceVersion
    Bookmark,
    /// A server-side error status
    Error,
}

/// A raw event from the watch stream, one per newline-separated JSON frame.
///
/// The object payload stays undecoded until the translation layer routes it
/// through the kind's codec.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WireWatchEvent {
    /// The event type tag
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    /// The raw object payload (a `Status` value for error events)
    #[serde(default)]
    pub object: Value,
}

impl WireWatchEvent {
    /// The resourceVersion of a bookmark payload, when present
    pub fn bookmark_resource_version(&self) -> Option<String> {
        self.object
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// A decoded watch event delivered on the SDK event channel.
pub enum WatchEvent {
    /// An object was added
    Added(Box<dyn Object>),
    /// An object was modified
    Modified(Box<dyn Object>),
    /// An object was deleted
    Deleted(Box<dyn Object>),
    /// The resume point advanced without an object change
    Bookmark {
        /// The resourceVersion to resume from
        resource_version: String,
    },
    /// The server reported an error on the stream
    Error(Status),
}

impl WatchEvent {
    /// The object carried by the event, when it carries one
    pub fn object(&self) -> Option<&dyn Object> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                Some(obj.as_ref())
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for WatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchEvent::Added(_) => write!(f, "Added event"),
            WatchEvent::Modified(_) => write!(f, "Modified event"),
            WatchEvent::Deleted(_) => write!(f, "Deleted event"),
            WatchEvent::Bookmark { resource_version } => {
                write!(f, "Bookmark event at {resource_version}")
            }
            WatchEvent::Error(status) => write!(f, "Error event: {status:?}"),
        }
    }
}
