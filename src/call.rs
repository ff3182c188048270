//! Call entity and lifecycle state machine
//!
//! A [`Call`] tracks one session from dial or invite through ringing,
//! establishment, hold/retrieve and termination, and owns the per-stream
//! (audio/video × transmit/receive) substates. Protocol backends drive the
//! state machine from their own threads; every transition emits exactly
//! one event into the orchestrator's dispatch queue, and duplicate
//! transitions are suppressed here, at the source.
//!
//! # Lifecycle
//!
//! ```text
//!           outgoing                     incoming
//! Standby ──────────► Calling ─► Ringing    Called ◄────────── Standby
//!                        │          │          │
//!                        └──────────┴─► Connected ◄┘
//!                                       │      ▲
//!                                  hold │      │ retrieve
//!                                       ▼      │
//!                                     (held, still Connected)
//!                                          │
//!                                          ▼
//!                                 Standby (cleared / missed)
//! ```
//!
//! Hold is orthogonal to the main state: a held call stays `Connected`
//! and only flags itself, pausing its open streams.
//!
//! Termination is a single path. Hanging up a call that is still ringing
//! is not a separate cancellation primitive; it clears the call with a
//! [`ClearedReason::LocalHangup`] so subscribers always see a terminal
//! event. An incoming call that ends without ever reaching `Connected`
//! (and not by local action or forwarding) emits `CallMissed` instead of
//! `CallCleared`; the distinction drives the persistent missed-call
//! notification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ClearedReason;
use crate::events::{CoreEvent, StreamInfo};

/// Unique identifier for a call
pub type CallId = Uuid;

/// Interval at which an established call refreshes its duration
const DURATION_TICK: Duration = Duration::from_secs(1);

/// Main lifecycle state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// No active dialog
    Standby,
    /// Outgoing call, dialog exists, remote not yet ringing
    Calling,
    /// Incoming call, waiting for local answer
    Called,
    /// Outgoing call, remote signalled ringing
    Ringing,
    /// Both media directions confirmed
    Connected,
}

/// Direction of a call, from the local endpoint's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Kind of media carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Audio,
    Video,
}

/// How far the orchestrator has wired this call's signals
///
/// `Universal` relays only the events every observer must see (ringing,
/// missed, cleared); the policy-admitted upgrade to `Full` adds the
/// remaining lifecycle and stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalScope {
    Universal,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamStatus {
    Open,
    Paused,
}

#[derive(Debug, Clone)]
struct StreamEntry {
    /// Negotiated codec name for this stream
    codec_name: String,
    status: StreamStatus,
}

/// Rolling transport statistics for a call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStatistics {
    /// Receive jitter in milliseconds
    pub jitter_ms: u32,
    /// Packets lost
    pub lost_packets: u64,
    /// Packets that arrived too late to play out
    pub late_packets: u64,
    /// Packets that arrived out of order
    pub out_of_order_packets: u64,
    /// Transmit bandwidth in kbit/s
    pub transmit_bandwidth_kbps: u32,
    /// Receive bandwidth in kbit/s
    pub receive_bandwidth_kbps: u32,
    /// Time since establishment, refreshed once per second
    pub duration: Duration,
}

/// Serializable snapshot of a call's current state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub state: CallState,
    pub direction: CallDirection,
    pub remote_uri: String,
    pub remote_display_name: Option<String>,
    pub is_held: bool,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub statistics: CallStatistics,
}

struct CallInner {
    state: CallState,
    remote_uri: String,
    remote_display_name: Option<String>,
    held: bool,
    was_established: bool,
    terminated: bool,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    connected_instant: Option<tokio::time::Instant>,
    streams: HashMap<(StreamType, bool), StreamEntry>,
    stats: CallStatistics,
    sink: Option<UnboundedSender<CoreEvent>>,
    scope: SignalScope,
    ticker: Option<JoinHandle<()>>,
}

impl CallInner {
    /// Send an event through the wired sink, honoring the signal scope
    fn emit(&self, event: CoreEvent) {
        let allowed = match self.scope {
            SignalScope::Full => true,
            SignalScope::Universal => event.is_universal(),
        };
        if !allowed {
            return;
        }
        if let Some(sink) = &self.sink {
            // The dispatcher may already be gone during teardown
            let _ = sink.send(event);
        }
    }

    /// Stream keys in a stable order: audio before video, receive before
    /// transmit
    fn sorted_stream_keys(&self) -> Vec<(StreamType, bool)> {
        let mut keys: Vec<_> = self.streams.keys().copied().collect();
        keys.sort();
        keys
    }
}

/// One active or terminated call session
///
/// Calls are created by their owning [`CallManager`](crate::manager::CallManager)
/// and handed to [`CallCore::add_call`](crate::core::CallCore::add_call),
/// which wires their signals before any subscriber can observe them. All
/// transition methods are safe to invoke from any thread.
pub struct Call {
    id: CallId,
    direction: CallDirection,
    inner: Mutex<CallInner>,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &inner.state)
            .field("remote_uri", &inner.remote_uri)
            .field("held", &inner.held)
            .field("terminated", &inner.terminated)
            .finish()
    }
}

impl Call {
    /// Create an unwired call
    pub fn new(
        direction: CallDirection,
        remote_uri: impl Into<String>,
        remote_display_name: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: CallId::new_v4(),
            direction,
            inner: Mutex::new(CallInner {
                state: CallState::Standby,
                remote_uri: remote_uri.into(),
                remote_display_name,
                held: false,
                was_established: false,
                terminated: false,
                created_at: Utc::now(),
                connected_at: None,
                ended_at: None,
                connected_instant: None,
                streams: HashMap::new(),
                stats: CallStatistics::default(),
                sink: None,
                scope: SignalScope::Universal,
                ticker: None,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CallInner> {
        // A poisoned lock only means a panicking subscriber test; the
        // state itself is still consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wire the call's signals to the dispatch queue
    pub(crate) fn attach_sink(&self, sink: UnboundedSender<CoreEvent>, scope: SignalScope) {
        let mut inner = self.lock();
        inner.sink = Some(sink);
        inner.scope = scope;
    }

    /// Widen or narrow the set of relayed signals
    pub(crate) fn set_signal_scope(&self, scope: SignalScope) {
        self.lock().scope = scope;
    }

    // ===== ACCESSORS =====

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn state(&self) -> CallState {
        self.lock().state
    }

    pub fn remote_uri(&self) -> String {
        self.lock().remote_uri.clone()
    }

    pub fn remote_display_name(&self) -> Option<String> {
        self.lock().remote_display_name.clone()
    }

    /// Update the remote party identity once the backend learns it
    pub fn set_remote_party(&self, uri: impl Into<String>, display_name: Option<String>) {
        let mut inner = self.lock();
        inner.remote_uri = uri.into();
        if display_name.is_some() {
            inner.remote_display_name = display_name;
        }
    }

    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Whether the call ever reached `Connected`
    pub fn was_established(&self) -> bool {
        self.lock().was_established
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.lock().created_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.lock().connected_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.lock().ended_at
    }

    /// Time connected so far, zero before establishment
    pub fn duration(&self) -> Duration {
        let inner = self.lock();
        match inner.connected_instant {
            Some(instant) if !inner.terminated => instant.elapsed(),
            Some(_) => inner.stats.duration,
            None => Duration::ZERO,
        }
    }

    pub fn statistics(&self) -> CallStatistics {
        let mut stats = self.lock().stats.clone();
        stats.duration = self.duration();
        stats
    }

    /// Negotiated codec name for one stream, if it has been opened
    pub fn stream_codec(&self, stream_type: StreamType, is_transmitting: bool) -> Option<String> {
        self.lock()
            .streams
            .get(&(stream_type, is_transmitting))
            .map(|s| s.codec_name.clone())
    }

    /// Serializable snapshot of the current state
    pub fn snapshot(&self) -> CallSnapshot {
        let stats = self.statistics();
        let inner = self.lock();
        CallSnapshot {
            call_id: self.id,
            state: inner.state,
            direction: self.direction,
            remote_uri: inner.remote_uri.clone(),
            remote_display_name: inner.remote_display_name.clone(),
            is_held: inner.held,
            created_at: inner.created_at,
            connected_at: inner.connected_at,
            ended_at: inner.ended_at,
            statistics: stats,
        }
    }

    // ===== LIFECYCLE TRANSITIONS =====

    /// A transport-level dialog now exists
    ///
    /// Moves an outgoing call to `Calling` and an incoming one to
    /// `Called`. Repeated notifications are ignored.
    pub fn notify_setup(&self) {
        let mut inner = self.lock();
        if inner.terminated || inner.state != CallState::Standby {
            return;
        }
        inner.state = match self.direction {
            CallDirection::Outgoing => CallState::Calling,
            CallDirection::Incoming => CallState::Called,
        };
        tracing::debug!(call_id = %self.id, state = ?inner.state, "call setup");
        inner.emit(CoreEvent::CallSetup { call_id: self.id });
    }

    /// The remote party signalled ringing
    ///
    /// Only meaningful for outgoing calls that are in `Calling`.
    pub fn notify_ringing(&self) {
        let mut inner = self.lock();
        if inner.terminated
            || self.direction != CallDirection::Outgoing
            || inner.state != CallState::Calling
        {
            return;
        }
        inner.state = CallState::Ringing;
        tracing::debug!(call_id = %self.id, "remote ringing");
        inner.emit(CoreEvent::CallRinging { call_id: self.id });
    }

    /// Both media directions are confirmed
    ///
    /// Starts the tick-driven duration refresher. Requires a prior
    /// `notify_setup`; duplicate notifications are ignored.
    pub fn notify_established(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.terminated
            || !matches!(
                inner.state,
                CallState::Calling | CallState::Called | CallState::Ringing
            )
        {
            return;
        }
        inner.state = CallState::Connected;
        inner.was_established = true;
        inner.connected_at = Some(Utc::now());
        inner.connected_instant = Some(tokio::time::Instant::now());
        tracing::info!(call_id = %self.id, remote = %inner.remote_uri, "call established");
        inner.emit(CoreEvent::CallEstablished { call_id: self.id });

        let weak: Weak<Call> = Arc::downgrade(self);
        inner.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(DURATION_TICK);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(call) = weak.upgrade() else { break };
                let mut inner = call.lock();
                if inner.terminated {
                    break;
                }
                if let Some(instant) = inner.connected_instant {
                    inner.stats.duration = instant.elapsed();
                }
            }
        }));
    }

    /// Put the call on hold, pausing every open stream
    pub fn hold(&self) {
        let mut inner = self.lock();
        if inner.terminated || inner.state != CallState::Connected || inner.held {
            return;
        }
        inner.held = true;
        tracing::info!(call_id = %self.id, "call held");
        inner.emit(CoreEvent::CallHeld { call_id: self.id });

        for key in inner.sorted_stream_keys() {
            let entry = inner.streams.get_mut(&key).map(|e| {
                let pausing = e.status == StreamStatus::Open;
                if pausing {
                    e.status = StreamStatus::Paused;
                }
                (pausing, e.codec_name.clone())
            });
            if let Some((true, codec_name)) = entry {
                inner.emit(CoreEvent::StreamPaused {
                    call_id: self.id,
                    stream: StreamInfo {
                        name: codec_name,
                        stream_type: key.0,
                        is_transmitting: key.1,
                    },
                });
            }
        }
    }

    /// Retrieve a held call, resuming the streams hold paused
    pub fn retrieve(&self) {
        let mut inner = self.lock();
        if inner.terminated || !inner.held {
            return;
        }
        inner.held = false;
        tracing::info!(call_id = %self.id, "call retrieved");
        inner.emit(CoreEvent::CallRetrieved { call_id: self.id });

        for key in inner.sorted_stream_keys() {
            let entry = inner.streams.get_mut(&key).map(|e| {
                let resuming = e.status == StreamStatus::Paused;
                if resuming {
                    e.status = StreamStatus::Open;
                }
                (resuming, e.codec_name.clone())
            });
            if let Some((true, codec_name)) = entry {
                inner.emit(CoreEvent::StreamResumed {
                    call_id: self.id,
                    stream: StreamInfo {
                        name: codec_name,
                        stream_type: key.0,
                        is_transmitting: key.1,
                    },
                });
            }
        }
    }

    // ===== STREAM TRANSITIONS =====

    /// A media stream opened with the given negotiated codec
    ///
    /// Reopening an already-open stream is suppressed here; backends do
    /// not need to deduplicate device-layer callbacks.
    pub fn open_stream(&self, codec_name: impl Into<String>, stream_type: StreamType, is_transmitting: bool) {
        let mut inner = self.lock();
        if inner.terminated {
            return;
        }
        let key = (stream_type, is_transmitting);
        if inner.streams.contains_key(&key) {
            return;
        }
        let codec_name = codec_name.into();
        inner.streams.insert(
            key,
            StreamEntry {
                codec_name: codec_name.clone(),
                status: StreamStatus::Open,
            },
        );
        tracing::debug!(call_id = %self.id, codec = %codec_name, ?stream_type, is_transmitting, "stream opened");
        inner.emit(CoreEvent::StreamOpened {
            call_id: self.id,
            stream: StreamInfo {
                name: codec_name,
                stream_type,
                is_transmitting,
            },
        });
    }

    /// A media stream closed
    pub fn close_stream(&self, stream_type: StreamType, is_transmitting: bool) {
        let mut inner = self.lock();
        if inner.terminated {
            return;
        }
        let key = (stream_type, is_transmitting);
        let Some(entry) = inner.streams.remove(&key) else {
            return;
        };
        tracing::debug!(call_id = %self.id, codec = %entry.codec_name, ?stream_type, is_transmitting, "stream closed");
        inner.emit(CoreEvent::StreamClosed {
            call_id: self.id,
            stream: StreamInfo {
                name: entry.codec_name,
                stream_type,
                is_transmitting,
            },
        });
    }

    /// Pause one stream without holding the whole call
    pub fn pause_stream(&self, stream_type: StreamType, is_transmitting: bool) {
        let mut inner = self.lock();
        if inner.terminated {
            return;
        }
        let key = (stream_type, is_transmitting);
        let Some(entry) = inner.streams.get_mut(&key) else {
            return;
        };
        if entry.status != StreamStatus::Open {
            return;
        }
        entry.status = StreamStatus::Paused;
        let codec_name = entry.codec_name.clone();
        inner.emit(CoreEvent::StreamPaused {
            call_id: self.id,
            stream: StreamInfo {
                name: codec_name,
                stream_type,
                is_transmitting,
            },
        });
    }

    /// Resume one paused stream
    pub fn resume_stream(&self, stream_type: StreamType, is_transmitting: bool) {
        let mut inner = self.lock();
        if inner.terminated {
            return;
        }
        let key = (stream_type, is_transmitting);
        let Some(entry) = inner.streams.get_mut(&key) else {
            return;
        };
        if entry.status != StreamStatus::Paused {
            return;
        }
        entry.status = StreamStatus::Open;
        let codec_name = entry.codec_name.clone();
        inner.emit(CoreEvent::StreamResumed {
            call_id: self.id,
            stream: StreamInfo {
                name: codec_name,
                stream_type,
                is_transmitting,
            },
        });
    }

    // ===== STATISTICS =====

    /// Record transport quality counters reported by the media layer
    pub fn set_stream_statistics(
        &self,
        jitter_ms: u32,
        lost_packets: u64,
        late_packets: u64,
        out_of_order_packets: u64,
    ) {
        let mut inner = self.lock();
        inner.stats.jitter_ms = jitter_ms;
        inner.stats.lost_packets = lost_packets;
        inner.stats.late_packets = late_packets;
        inner.stats.out_of_order_packets = out_of_order_packets;
    }

    /// Record current bandwidth usage
    pub fn set_bandwidth(&self, transmit_kbps: u32, receive_kbps: u32) {
        let mut inner = self.lock();
        inner.stats.transmit_bandwidth_kbps = transmit_kbps;
        inner.stats.receive_bandwidth_kbps = receive_kbps;
    }

    // ===== TERMINATION =====

    /// Terminate the call
    ///
    /// Closes any remaining streams, then emits the terminal event:
    /// `CallMissed` for an incoming call that was never answered and was
    /// not ended locally or forwarded, `CallCleared` otherwise. Repeated
    /// calls are no-ops; nothing is ever emitted after the terminal event.
    pub fn clear(&self, reason: ClearedReason) {
        let mut inner = self.lock();
        if inner.terminated {
            return;
        }

        for key in inner.sorted_stream_keys() {
            if let Some(entry) = inner.streams.remove(&key) {
                inner.emit(CoreEvent::StreamClosed {
                    call_id: self.id,
                    stream: StreamInfo {
                        name: entry.codec_name,
                        stream_type: key.0,
                        is_transmitting: key.1,
                    },
                });
            }
        }

        inner.terminated = true;
        inner.held = false;
        inner.state = CallState::Standby;
        inner.ended_at = Some(Utc::now());
        if let Some(instant) = inner.connected_instant {
            inner.stats.duration = instant.elapsed();
        }
        if let Some(ticker) = inner.ticker.take() {
            ticker.abort();
        }

        let missed = self.direction == CallDirection::Incoming
            && !inner.was_established
            && !matches!(reason, ClearedReason::LocalHangup | ClearedReason::Forwarded);

        if missed {
            tracing::info!(call_id = %self.id, remote = %inner.remote_uri, "call missed");
            inner.emit(CoreEvent::CallMissed {
                call_id: self.id,
                remote_uri: inner.remote_uri.clone(),
                remote_display_name: inner.remote_display_name.clone(),
            });
        } else {
            tracing::info!(call_id = %self.id, %reason, "call cleared");
            inner.emit(CoreEvent::CallCleared {
                call_id: self.id,
                reason,
            });
        }
    }

    /// Terminate the call locally
    ///
    /// Works in any state; a call still ringing is cancelled through the
    /// same path and still produces its terminal event.
    pub fn hang_up(&self) {
        self.clear(ClearedReason::LocalHangup);
    }
}
