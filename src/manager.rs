//! Per-protocol backend contract
//!
//! A [`CallManager`] is one signaling backend: SIP, H.323, or the local
//! sound-device endpoint. Each exposes the same capability surface (dial,
//! hang up, auto-answer, no-answer handling, codec negotiation, audio
//! pipeline toggles) over whatever protocol machinery it wraps, and the
//! orchestrator treats all of them uniformly.
//!
//! Two contracts here are load-bearing:
//!
//! - **URI routing is data first, `dial` last.** Every manager declares
//!   the URI schemes it accepts; the orchestrator consults that set as an
//!   advisory pre-filter when picking a manager, but `dial` itself remains
//!   authoritative and returns `false` for anything it cannot parse or
//!   route. A `false` from `dial` is never a network failure; those
//!   arrive later as a `CallCleared` event.
//! - **`set_codecs` is in/out.** The manager is the authority on what is
//!   negotiable: it mutates the passed list in place to the accepted set,
//!   flagging known-but-unsupported entries inactive, and keeps its own
//!   value copy internally.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::call::Call;
use crate::codec::CodecList;
use crate::core::CallCore;
use crate::error::ClearedReason;

/// How DTMF digits are transmitted during a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DtmfMode {
    /// RTP telephone-events (RFC 4733)
    Rfc4733,
    /// Signaling-channel INFO messages
    Info,
    /// Encoded into the audio stream itself
    InBand,
}

impl Default for DtmfMode {
    fn default() -> Self {
        DtmfMode::Rfc4733
    }
}

/// What to do with an incoming call that is not answered in time
///
/// Evaluated exactly once, at the point of the incoming invite; the
/// no-answer watchdog only applies the stored decision when the delay
/// elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoAnswerAction {
    /// Auto-answer immediately, bypassing the ringing phase
    Answer,
    /// Forward to the configured URI
    Forward(String),
    /// Reject when the delay elapses
    Reject,
}

/// Backend-local settings
///
/// These belong to the manager alone: the orchestrator never owns or
/// caches audio-pipeline or timeout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Name presented to remote parties
    pub display_name: String,
    /// Local addresses the backend listens on for signaling
    pub listen_addresses: Vec<std::net::SocketAddr>,
    /// How long an incoming call may ring before the no-answer action fires
    pub reject_delay: Duration,
    /// Answer incoming calls immediately, without ringing
    pub auto_answer: bool,
    /// Where to forward unanswered incoming calls, if anywhere
    pub forward_uri: Option<String>,
    /// Echo cancellation in the local audio pipeline
    pub echo_cancellation: bool,
    /// Silence detection in the local audio pipeline
    pub silence_detection: bool,
    /// Jitter buffer lower bound in milliseconds
    pub jitter_buffer_min_ms: u32,
    /// Jitter buffer upper bound in milliseconds
    pub jitter_buffer_max_ms: u32,
    /// DTMF transmission mode
    pub dtmf_mode: DtmfMode,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            listen_addresses: Vec::new(),
            reject_delay: Duration::from_secs(30),
            auto_answer: false,
            forward_uri: None,
            echo_cancellation: true,
            silence_detection: true,
            jitter_buffer_min_ms: 20,
            jitter_buffer_max_ms: 500,
            dtmf_mode: DtmfMode::default(),
        }
    }
}

impl ManagerSettings {
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_listen_address(mut self, addr: std::net::SocketAddr) -> Self {
        self.listen_addresses.push(addr);
        self
    }

    pub fn with_reject_delay(mut self, delay: Duration) -> Self {
        self.reject_delay = delay;
        self
    }

    pub fn with_auto_answer(mut self, enabled: bool) -> Self {
        self.auto_answer = enabled;
        self
    }

    pub fn with_forward_uri(mut self, uri: impl Into<String>) -> Self {
        self.forward_uri = Some(uri.into());
        self
    }

    /// Decide, at invite time, what happens if the call is never answered
    pub fn no_answer_action(&self) -> NoAnswerAction {
        if self.auto_answer {
            NoAnswerAction::Answer
        } else if let Some(uri) = &self.forward_uri {
            NoAnswerAction::Forward(uri.clone())
        } else {
            NoAnswerAction::Reject
        }
    }
}

/// Capability contract every protocol backend implements
///
/// All methods take `&self`; implementations are shared behind `Arc` and
/// use interior locking for their settings and call registries, so the
/// orchestrator can drive any manager from any task.
#[async_trait]
pub trait CallManager: Send + Sync {
    /// Short protocol identifier, e.g. "sip", "h323", "local"
    fn protocol_name(&self) -> &str;

    /// URI schemes this backend accepts, as data
    ///
    /// An empty set means the backend declares nothing and the
    /// orchestrator's pre-filter is skipped for it.
    fn accepted_schemes(&self) -> Vec<String>;

    /// Advisory check whether a URI looks routable by this backend
    ///
    /// The default matches the URI's scheme against
    /// [`accepted_schemes`](Self::accepted_schemes). `dial` remains
    /// authoritative; this only spares it obviously-foreign targets.
    fn is_supported_uri(&self, uri: &str) -> bool {
        let schemes = self.accepted_schemes();
        if schemes.is_empty() {
            return true;
        }
        match url::Url::parse(uri) {
            Ok(parsed) => schemes.iter().any(|s| s == parsed.scheme()),
            Err(_) => false,
        }
    }

    /// Attempt to originate a call
    ///
    /// Returns `false` only when the URI cannot be parsed or routed by
    /// this backend. May resolve the target synchronously but never
    /// blocks on network I/O; setup progress and failure arrive through
    /// the call's event sequence.
    async fn dial(&self, uri: &str) -> bool;

    /// Terminate every call this manager currently owns
    async fn hang_up(&self);

    fn set_reject_delay(&self, delay: Duration);

    fn reject_delay(&self) -> Duration;

    fn set_auto_answer(&self, enabled: bool);

    fn auto_answer(&self) -> bool;

    fn set_forward_uri(&self, uri: Option<String>);

    /// Negotiate the passed preference list against this backend
    ///
    /// In/out: the list is mutated to the accepted set, with
    /// known-but-unsupported codecs appended or flagged inactive.
    async fn set_codecs(&self, codecs: &mut CodecList);

    /// The currently negotiated codec set
    fn codecs(&self) -> CodecList;

    fn set_echo_cancellation(&self, enabled: bool);

    fn set_silence_detection(&self, enabled: bool);

    fn set_dtmf_mode(&self, mode: DtmfMode);

    fn set_display_name(&self, name: String);

    /// Snapshot of the backend-local settings
    fn settings(&self) -> ManagerSettings;
}

/// Arm the no-answer timer for an incoming call
///
/// Sleeps for `delay`, then applies the action decided at invite time,
/// unless the call was answered or terminated in the meantime. Forwarding
/// redials through the orchestrator's generic dispatch and clears the
/// original leg as forwarded; rejection clears it as unanswered, which
/// surfaces as a missed call.
pub fn spawn_no_answer_watchdog(
    call: &Arc<Call>,
    delay: Duration,
    action: NoAnswerAction,
    core: Weak<CallCore>,
) -> JoinHandle<()> {
    let call = Arc::downgrade(call);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(call) = call.upgrade() else { return };
        if call.was_established() || call.is_terminated() {
            return;
        }
        match action {
            NoAnswerAction::Answer => {}
            NoAnswerAction::Forward(uri) => {
                tracing::info!(call_id = %call.id(), target = %uri, "forwarding unanswered call");
                if let Some(core) = core.upgrade() {
                    if !core.dial(&uri).await {
                        tracing::warn!(target = %uri, "forward target is not routable");
                    }
                }
                call.clear(ClearedReason::Forwarded);
            }
            NoAnswerAction::Reject => {
                tracing::info!(call_id = %call.id(), "rejecting unanswered call");
                call.clear(ClearedReason::Timeout);
            }
        }
    })
}
