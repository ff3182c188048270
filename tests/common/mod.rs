//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use call_engine_core::{
    Call, CallCore, CallDirection, CallId, CallManager, CodecList, CoreConfig, CoreEvent,
    CoreEventHandler, DtmfMode, FriendOrFoe, ManagerSettings, Notification, NotificationSink,
    StreamInfo, Verdict,
};
use call_engine_core::error::ClearedReason;

/// One record per handler callback, for ordering assertions
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: &'static str,
    pub call_id: Option<CallId>,
    pub detail: Option<String>,
}

/// Ordered subscriber that records every callback it receives
pub struct CollectingHandler {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CollectingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, kind: &'static str, call_id: Option<CallId>, detail: Option<String>) {
        self.events.lock().unwrap().push(RecordedEvent {
            kind,
            call_id,
            detail,
        });
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Callback kinds observed for one call, in delivery order
    pub fn kinds_for(&self, call_id: CallId) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter(|e| e.call_id == Some(call_id))
            .map(|e| e.kind)
            .collect()
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.events().iter().any(|e| e.kind == kind)
    }
}

#[async_trait]
impl CoreEventHandler for CollectingHandler {
    async fn on_manager_added(&self, protocol: &str) {
        self.record("manager_added", None, Some(protocol.to_string()));
    }
    async fn on_manager_removed(&self, protocol: &str) {
        self.record("manager_removed", None, Some(protocol.to_string()));
    }
    async fn on_call_created(&self, call: Arc<Call>) {
        self.record("created", Some(call.id()), None);
    }
    async fn on_call_setup(&self, call: Arc<Call>) {
        self.record("setup", Some(call.id()), None);
    }
    async fn on_call_ringing(&self, call: Arc<Call>) {
        self.record("ringing", Some(call.id()), None);
    }
    async fn on_call_established(&self, call: Arc<Call>) {
        self.record("established", Some(call.id()), None);
    }
    async fn on_call_held(&self, call: Arc<Call>) {
        self.record("held", Some(call.id()), None);
    }
    async fn on_call_retrieved(&self, call: Arc<Call>) {
        self.record("retrieved", Some(call.id()), None);
    }
    async fn on_stream_opened(&self, call: Arc<Call>, stream: &StreamInfo) {
        self.record("stream_opened", Some(call.id()), Some(stream.name.clone()));
    }
    async fn on_stream_closed(&self, call: Arc<Call>, stream: &StreamInfo) {
        self.record("stream_closed", Some(call.id()), Some(stream.name.clone()));
    }
    async fn on_stream_paused(&self, call: Arc<Call>, stream: &StreamInfo) {
        self.record("stream_paused", Some(call.id()), Some(stream.name.clone()));
    }
    async fn on_stream_resumed(&self, call: Arc<Call>, stream: &StreamInfo) {
        self.record("stream_resumed", Some(call.id()), Some(stream.name.clone()));
    }
    async fn on_call_missed(&self, call: Arc<Call>) {
        self.record("missed", Some(call.id()), call.remote_display_name());
    }
    async fn on_call_cleared(&self, call: Arc<Call>, reason: &ClearedReason) {
        self.record("cleared", Some(call.id()), Some(reason.to_string()));
    }
    async fn on_call_removed(&self, call_id: CallId) {
        self.record("removed", Some(call_id), None);
    }
}

/// Fixed blacklist policy
pub struct StaticPolicy {
    foes: Vec<String>,
}

impl StaticPolicy {
    pub fn new(foes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            foes: foes.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl FriendOrFoe for StaticPolicy {
    fn decide(&self, _context: &str, uri: &str) -> Verdict {
        if self.foes.iter().any(|f| f == uri) {
            Verdict::Foe
        } else {
            Verdict::Unknown
        }
    }
}

/// Notification sink that just records what it is asked to show
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notifications: Mutex::new(Vec::new()),
        })
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn push_notification(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Scriptable protocol backend for dispatch and negotiation tests
pub struct StubManager {
    core: Weak<CallCore>,
    protocol: String,
    schemes: Vec<String>,
    accept_dials: bool,
    pub dial_attempts: Mutex<Vec<String>>,
    pub started_calls: Mutex<Vec<Arc<Call>>>,
    settings: Mutex<ManagerSettings>,
    supported: CodecList,
    negotiated: Mutex<CodecList>,
}

impl StubManager {
    pub fn new(
        core: &Arc<CallCore>,
        protocol: &str,
        schemes: &[&str],
        accept_dials: bool,
        supported: CodecList,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::downgrade(core),
            protocol: protocol.to_string(),
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
            accept_dials,
            dial_attempts: Mutex::new(Vec::new()),
            started_calls: Mutex::new(Vec::new()),
            settings: Mutex::new(ManagerSettings::default()),
            supported: supported.clone(),
            negotiated: Mutex::new(supported),
        })
    }

    pub fn attempts(&self) -> Vec<String> {
        self.dial_attempts.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<Arc<Call>> {
        self.started_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallManager for StubManager {
    fn protocol_name(&self) -> &str {
        &self.protocol
    }

    fn accepted_schemes(&self) -> Vec<String> {
        self.schemes.clone()
    }

    async fn dial(&self, uri: &str) -> bool {
        self.dial_attempts.lock().unwrap().push(uri.to_string());
        if !self.accept_dials {
            return false;
        }
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        let call = Call::new(CallDirection::Outgoing, uri, None);
        if core.add_call(call.clone()).is_err() {
            return false;
        }
        call.notify_setup();
        self.started_calls.lock().unwrap().push(call);
        true
    }

    async fn hang_up(&self) {
        for call in self.started() {
            call.hang_up();
        }
    }

    fn set_reject_delay(&self, delay: Duration) {
        self.settings.lock().unwrap().reject_delay = delay;
    }

    fn reject_delay(&self) -> Duration {
        self.settings.lock().unwrap().reject_delay
    }

    fn set_auto_answer(&self, enabled: bool) {
        self.settings.lock().unwrap().auto_answer = enabled;
    }

    fn auto_answer(&self) -> bool {
        self.settings.lock().unwrap().auto_answer
    }

    fn set_forward_uri(&self, uri: Option<String>) {
        self.settings.lock().unwrap().forward_uri = uri;
    }

    async fn set_codecs(&self, codecs: &mut CodecList) {
        codecs.merge_supported(&self.supported);
        *self.negotiated.lock().unwrap() = codecs.clone();
    }

    fn codecs(&self) -> CodecList {
        self.negotiated.lock().unwrap().clone()
    }

    fn set_echo_cancellation(&self, enabled: bool) {
        self.settings.lock().unwrap().echo_cancellation = enabled;
    }

    fn set_silence_detection(&self, enabled: bool) {
        self.settings.lock().unwrap().silence_detection = enabled;
    }

    fn set_dtmf_mode(&self, mode: DtmfMode) {
        self.settings.lock().unwrap().dtmf_mode = mode;
    }

    fn set_display_name(&self, name: String) {
        self.settings.lock().unwrap().display_name = name;
    }

    fn settings(&self) -> ManagerSettings {
        self.settings.lock().unwrap().clone()
    }
}

/// Install a test subscriber once, honoring `RUST_LOG`
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A started core with the default configuration
pub async fn started_core() -> Arc<CallCore> {
    started_core_with(CoreConfig::default()).await
}

pub async fn started_core_with(config: CoreConfig) -> Arc<CallCore> {
    init_logging();
    let core = CallCore::new(config);
    core.start().await.expect("core should start");
    core
}

/// Wait until the broadcast stream yields an event matching the predicate
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<CoreEvent>,
    mut pred: impl FnMut(&CoreEvent) -> bool,
) -> CoreEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(err) => panic!("event stream ended: {}", err),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Collect every event for one call until its `CallRemoved` arrives
pub async fn collect_call_events(
    events: &mut broadcast::Receiver<CoreEvent>,
    call_id: CallId,
) -> Vec<CoreEvent> {
    tokio::time::timeout(Duration::from_secs(2), async {
        let mut seen = Vec::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event.call_id() == Some(call_id) {
                        let done = matches!(event, CoreEvent::CallRemoved { .. });
                        seen.push(event);
                        if done {
                            return seen;
                        }
                    }
                }
                Err(err) => panic!("event stream ended: {}", err),
            }
        }
    })
    .await
    .expect("timed out collecting call events")
}

/// Give queued events a moment to drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
