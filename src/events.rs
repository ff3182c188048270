//! Event model for call orchestration
//!
//! Every observable transition in the engine is expressed as a
//! [`CoreEvent`]. Backends emit events from whatever thread the protocol
//! stack runs on; the orchestrator's dispatcher delivers them to
//! subscribers one at a time on a single task, so no subscriber ever sees
//! two callbacks concurrently and per-call ordering is preserved.
//!
//! Subscribers come in two flavours, mirroring how UIs and collectors
//! consume them:
//!
//! - implement [`CoreEventHandler`] and register it for ordered, awaited
//!   callbacks (the handler may query the call registry during a
//!   `cleared`/`missed` callback; the call is still registered);
//! - or take a broadcast receiver from the orchestrator for a plain
//!   stream of cloned events.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::call::{Call, CallId, StreamType};
use crate::error::ClearedReason;

/// Relative urgency of an event, for subscribers that triage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

/// One directional media flow within a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Codec name carried by the stream, e.g. "PCMU"
    pub name: String,
    /// Whether the stream carries audio or video
    pub stream_type: StreamType,
    /// Transmit direction when true, receive when false
    pub is_transmitting: bool,
}

/// Observable transitions of the call engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A protocol backend was registered
    ManagerAdded { protocol: String },
    /// A protocol backend was deregistered
    ManagerRemoved { protocol: String },
    /// A call entered the active registry
    CallCreated { call_id: CallId },
    /// A transport-level dialog exists for the call
    CallSetup { call_id: CallId },
    /// The remote party signalled ringing (outgoing calls only)
    CallRinging { call_id: CallId },
    /// Both media directions are confirmed
    CallEstablished { call_id: CallId },
    /// The call was put on hold
    CallHeld { call_id: CallId },
    /// The call was retrieved from hold
    CallRetrieved { call_id: CallId },
    /// A media stream opened
    StreamOpened { call_id: CallId, stream: StreamInfo },
    /// A media stream closed
    StreamClosed { call_id: CallId, stream: StreamInfo },
    /// A media stream paused
    StreamPaused { call_id: CallId, stream: StreamInfo },
    /// A media stream resumed
    StreamResumed { call_id: CallId, stream: StreamInfo },
    /// An incoming call terminated without ever being answered
    CallMissed {
        call_id: CallId,
        remote_uri: String,
        remote_display_name: Option<String>,
    },
    /// The call terminated
    CallCleared { call_id: CallId, reason: ClearedReason },
    /// Terminal dispatch finished; the call is leaving the registry
    CallRemoved { call_id: CallId },
}

impl CoreEvent {
    /// The call this event belongs to, if any
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            CoreEvent::ManagerAdded { .. } | CoreEvent::ManagerRemoved { .. } => None,
            CoreEvent::CallCreated { call_id }
            | CoreEvent::CallSetup { call_id }
            | CoreEvent::CallRinging { call_id }
            | CoreEvent::CallEstablished { call_id }
            | CoreEvent::CallHeld { call_id }
            | CoreEvent::CallRetrieved { call_id }
            | CoreEvent::StreamOpened { call_id, .. }
            | CoreEvent::StreamClosed { call_id, .. }
            | CoreEvent::StreamPaused { call_id, .. }
            | CoreEvent::StreamResumed { call_id, .. }
            | CoreEvent::CallMissed { call_id, .. }
            | CoreEvent::CallCleared { call_id, .. }
            | CoreEvent::CallRemoved { call_id } => Some(*call_id),
        }
    }

    /// Whether this is the last lifecycle event a call may emit
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreEvent::CallCleared { .. } | CoreEvent::CallMissed { .. }
        )
    }

    /// Whether this event is relayed even for calls the friend-or-foe
    /// policy rejected
    ///
    /// Universal events keep observers that log every call (including
    /// rejected ones) complete; the remaining lifecycle and stream events
    /// are only wired for admitted calls.
    pub fn is_universal(&self) -> bool {
        matches!(
            self,
            CoreEvent::ManagerAdded { .. }
                | CoreEvent::ManagerRemoved { .. }
                | CoreEvent::CallCreated { .. }
                | CoreEvent::CallRinging { .. }
                | CoreEvent::CallMissed { .. }
                | CoreEvent::CallCleared { .. }
                | CoreEvent::CallRemoved { .. }
        )
    }

    /// Urgency used when relaying this event
    pub fn priority(&self) -> EventPriority {
        match self {
            CoreEvent::CallCreated { .. }
            | CoreEvent::CallEstablished { .. }
            | CoreEvent::CallMissed { .. }
            | CoreEvent::CallCleared { .. } => EventPriority::High,
            CoreEvent::StreamOpened { .. }
            | CoreEvent::StreamClosed { .. }
            | CoreEvent::StreamPaused { .. }
            | CoreEvent::StreamResumed { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}

/// Ordered subscriber callbacks
///
/// All methods default to no-ops so a subscriber only implements the
/// transitions it cares about. Callbacks run on the dispatcher task, one
/// at a time, in emission order. During `on_call_cleared` and
/// `on_call_missed` the call is still resolvable through the registry,
/// but the reference must not be retained past the callback.
#[async_trait]
pub trait CoreEventHandler: Send + Sync {
    async fn on_manager_added(&self, _protocol: &str) {}

    async fn on_manager_removed(&self, _protocol: &str) {}

    async fn on_call_created(&self, _call: Arc<Call>) {}

    async fn on_call_setup(&self, _call: Arc<Call>) {}

    async fn on_call_ringing(&self, _call: Arc<Call>) {}

    async fn on_call_established(&self, _call: Arc<Call>) {}

    async fn on_call_held(&self, _call: Arc<Call>) {}

    async fn on_call_retrieved(&self, _call: Arc<Call>) {}

    async fn on_stream_opened(&self, _call: Arc<Call>, _stream: &StreamInfo) {}

    async fn on_stream_closed(&self, _call: Arc<Call>, _stream: &StreamInfo) {}

    async fn on_stream_paused(&self, _call: Arc<Call>, _stream: &StreamInfo) {}

    async fn on_stream_resumed(&self, _call: Arc<Call>, _stream: &StreamInfo) {}

    async fn on_call_missed(&self, _call: Arc<Call>) {}

    async fn on_call_cleared(&self, _call: Arc<Call>, _reason: &ClearedReason) {}

    async fn on_call_removed(&self, _call_id: CallId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_terminal_events() {
        let id = Uuid::new_v4();
        assert!(CoreEvent::CallCleared {
            call_id: id,
            reason: ClearedReason::LocalHangup
        }
        .is_terminal());
        assert!(CoreEvent::CallMissed {
            call_id: id,
            remote_uri: "sip:alice@example.com".into(),
            remote_display_name: None
        }
        .is_terminal());
        assert!(!CoreEvent::CallEstablished { call_id: id }.is_terminal());
    }

    #[test]
    fn test_universal_events() {
        let id = Uuid::new_v4();
        assert!(CoreEvent::CallCreated { call_id: id }.is_universal());
        assert!(CoreEvent::CallRinging { call_id: id }.is_universal());
        assert!(!CoreEvent::CallEstablished { call_id: id }.is_universal());
        assert!(!CoreEvent::StreamOpened {
            call_id: id,
            stream: StreamInfo {
                name: "PCMU".into(),
                stream_type: StreamType::Audio,
                is_transmitting: true
            }
        }
        .is_universal());
    }

    #[test]
    fn test_priorities() {
        let id = Uuid::new_v4();
        assert_eq!(
            CoreEvent::CallEstablished { call_id: id }.priority(),
            EventPriority::High
        );
        assert_eq!(
            CoreEvent::CallSetup { call_id: id }.priority(),
            EventPriority::Normal
        );
        assert!(EventPriority::Low < EventPriority::High);
    }
}
