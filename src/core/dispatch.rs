//! Single-task event dispatch
//!
//! Backends emit events from protocol threads; everything funnels through
//! one unbounded queue consumed here. Running all subscriber callbacks on
//! this single task is what gives the engine its delivery guarantees:
//!
//! - callbacks never run concurrently, in emission order per call;
//! - `CallCreated` precedes every other event of a call;
//! - `CallCleared`/`CallMissed` is the last lifecycle event, and any
//!   stragglers for that call are dropped with a warning;
//! - `CallRemoved` goes out strictly after terminal delivery has finished
//!   for every subscriber, and only then does the call leave the
//!   registry, so a subscriber can still resolve the call during the
//!   terminal callback.
//!
//! A panicking subscriber is caught and logged; delivery continues to the
//! rest.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::call::Call;
use crate::events::{CoreEvent, CoreEventHandler};
use crate::notify::{Notification, NotificationAction, NotificationLevel};

use super::{CallCore, TerminatedSet};

pub(crate) async fn run_dispatcher(core: Weak<CallCore>, mut queue: UnboundedReceiver<CoreEvent>) {
    let mut terminated = TerminatedSet::new();

    while let Some(event) = queue.recv().await {
        let Some(core) = core.upgrade() else { break };

        if let Some(call_id) = event.call_id() {
            if terminated.contains(&call_id) {
                tracing::warn!(%call_id, ?event, "dropping event for already terminated call");
                continue;
            }
        }

        let terminal = event.is_terminal();
        core.fan_out(&event).await;

        if let CoreEvent::CallMissed {
            remote_uri,
            remote_display_name,
            ..
        } = &event
        {
            core.missed_calls
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            core.push_missed_notification(remote_uri, remote_display_name.as_deref())
                .await;
        }

        if terminal {
            if let Some(call_id) = event.call_id() {
                terminated.insert(call_id);
                core.fan_out(&CoreEvent::CallRemoved { call_id }).await;
                core.calls.remove(&call_id);
                tracing::debug!(%call_id, "call removed from registry");
            }
        }
    }
    tracing::debug!("event dispatcher finished");
}

impl CallCore {
    /// Deliver one event to the broadcast stream and every ordered
    /// subscriber, isolating subscriber faults
    pub(crate) async fn fan_out(&self, event: &CoreEvent) {
        let _ = self.broadcast_tx.send(event.clone());

        let handlers = self.handlers.read().await.clone();
        let call = event
            .call_id()
            .and_then(|call_id| self.get_call(&call_id));

        for handler in handlers {
            let delivery = deliver(handler.as_ref(), event, call.as_ref());
            if std::panic::AssertUnwindSafe(delivery)
                .catch_unwind()
                .await
                .is_err()
            {
                tracing::warn!(?event, "event subscriber panicked, continuing delivery");
            }
        }
    }

    /// Build and push the persistent missed-call notification
    ///
    /// The bound action redials through the orchestrator's generic dial
    /// dispatch, so the callback may well pick a different backend than
    /// the one that received the original call.
    pub(crate) async fn push_missed_notification(
        self: &Arc<Self>,
        remote_uri: &str,
        remote_display_name: Option<&str>,
    ) {
        let Some(sink) = self.notifier_handle() else {
            return;
        };

        let party = remote_display_name.unwrap_or(remote_uri).to_string();
        let weak = Arc::downgrade(self);
        let target = remote_uri.to_string();
        let callback = Arc::new(move || {
            let Some(core) = weak.upgrade() else { return };
            let target = target.clone();
            tokio::spawn(async move {
                if !core.dial(&target).await {
                    tracing::warn!(%target, "redial of missed call failed");
                }
            });
        });

        let notification = Notification {
            level: NotificationLevel::Warning,
            title: "Missed call".to_string(),
            body: format!("Missed call from {}", party),
            action: Some(NotificationAction::new("Call back", callback)),
        };
        sink.push_notification(notification).await;
    }
}

/// Route one event to the matching handler callback
async fn deliver(
    handler: &dyn CoreEventHandler,
    event: &CoreEvent,
    call: Option<&Arc<Call>>,
) {
    match event {
        CoreEvent::ManagerAdded { protocol } => handler.on_manager_added(protocol).await,
        CoreEvent::ManagerRemoved { protocol } => handler.on_manager_removed(protocol).await,
        CoreEvent::CallRemoved { call_id } => handler.on_call_removed(*call_id).await,
        _ => {
            // Per-call events need the call itself; a miss here only
            // happens for events raced past their own terminal
            let Some(call) = call else {
                tracing::debug!(?event, "no registered call for event, skipping handlers");
                return;
            };
            match event {
                CoreEvent::CallCreated { .. } => handler.on_call_created(call.clone()).await,
                CoreEvent::CallSetup { .. } => handler.on_call_setup(call.clone()).await,
                CoreEvent::CallRinging { .. } => handler.on_call_ringing(call.clone()).await,
                CoreEvent::CallEstablished { .. } => {
                    handler.on_call_established(call.clone()).await
                }
                CoreEvent::CallHeld { .. } => handler.on_call_held(call.clone()).await,
                CoreEvent::CallRetrieved { .. } => handler.on_call_retrieved(call.clone()).await,
                CoreEvent::StreamOpened { stream, .. } => {
                    handler.on_stream_opened(call.clone(), stream).await
                }
                CoreEvent::StreamClosed { stream, .. } => {
                    handler.on_stream_closed(call.clone(), stream).await
                }
                CoreEvent::StreamPaused { stream, .. } => {
                    handler.on_stream_paused(call.clone(), stream).await
                }
                CoreEvent::StreamResumed { stream, .. } => {
                    handler.on_stream_resumed(call.clone(), stream).await
                }
                CoreEvent::CallMissed { .. } => handler.on_call_missed(call.clone()).await,
                CoreEvent::CallCleared { reason, .. } => {
                    handler.on_call_cleared(call.clone(), reason).await
                }
                _ => {}
            }
        }
    }
}
