//! Desktop notification contract
//!
//! The orchestrator only ever produces one kind of notification itself:
//! a warning about a missed call, carrying an action that redials the
//! remote party through the generic dial dispatch. Rendering, persistence
//! and dismissal are entirely the sink's concern.

use std::sync::Arc;

use async_trait::async_trait;

/// Urgency of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// An action the user can trigger from a rendered notification
#[derive(Clone)]
pub struct NotificationAction {
    /// Button label, e.g. "Call back"
    pub label: String,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl NotificationAction {
    pub fn new(label: impl Into<String>, callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            label: label.into(),
            callback,
        }
    }

    /// Run the bound callback
    pub fn invoke(&self) {
        (self.callback)();
    }
}

impl std::fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationAction")
            .field("label", &self.label)
            .field("callback", &"<callback>")
            .finish()
    }
}

/// One notification to present to the user
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
    pub action: Option<NotificationAction>,
}

/// Rendering backend for desktop notifications
///
/// Held weakly by the orchestrator; a sink that has been dropped simply
/// means missed-call notifications are skipped.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn push_notification(&self, notification: Notification);
}
