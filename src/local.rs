//! Local sound-device backend
//!
//! [`LocalManager`] is the endpoint that bridges calls to the machine's
//! own speakers and microphone, the "PC sound system" leg of a
//! softphone. It accepts `pc:` and `local:` targets, answers them as soon
//! as the device path is up, and implements the full backend contract:
//! auto-answer, no-answer handling and codec negotiation against its
//! built-in supported set.
//!
//! Device enumeration and the audio pipeline itself live outside the
//! engine; this backend only tracks open/closed stream state and the
//! negotiated codec per stream.

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::call::{Call, CallDirection, CallId, StreamType};
use crate::codec::{CodecDescription, CodecKind, CodecList};
use crate::core::CallCore;
use crate::error::{CoreError, CoreResult};
use crate::manager::{
    spawn_no_answer_watchdog, CallManager, DtmfMode, ManagerSettings, NoAnswerAction,
};

/// Backend for the local audio device
pub struct LocalManager {
    core: Weak<CallCore>,
    settings: RwLock<ManagerSettings>,
    /// Currently negotiated set, a value copy independent of any caller's
    negotiated: RwLock<CodecList>,
    /// What the device layer can actually encode and decode
    supported: CodecList,
    /// Calls this backend owns
    calls: DashMap<CallId, Arc<Call>>,
}

impl LocalManager {
    pub const PROTOCOL: &'static str = "local";

    /// Create the backend, holding only a weak handle to the orchestrator
    pub fn new(core: &Arc<CallCore>) -> Arc<Self> {
        let supported = CodecList::from(vec![
            CodecDescription::new("PCMU", CodecKind::Audio, 8_000).with_display_info("G.711 u-Law"),
            CodecDescription::new("PCMA", CodecKind::Audio, 8_000).with_display_info("G.711 A-Law"),
            CodecDescription::new("G.722", CodecKind::Audio, 16_000),
            CodecDescription::new("opus", CodecKind::Audio, 48_000),
        ]);
        Arc::new(Self {
            core: Arc::downgrade(core),
            settings: RwLock::new(ManagerSettings::default().with_display_name("Local Audio")),
            negotiated: RwLock::new(supported.clone()),
            supported,
            calls: DashMap::new(),
        })
    }

    fn read_settings(&self) -> ManagerSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_settings(&self, update: impl FnOnce(&mut ManagerSettings)) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        update(&mut settings);
    }

    /// Drop bookkeeping for calls that already terminated
    fn sweep(&self) {
        self.calls.retain(|_, call| !call.is_terminated());
    }

    /// First active audio codec in preference order
    fn preferred_codec(&self) -> String {
        self.negotiated
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .first_active(CodecKind::Audio)
            .map(|codec| codec.name.clone())
            .unwrap_or_else(|| "PCMU".to_string())
    }

    /// Confirm media both ways and open the device streams
    fn establish(call: &Arc<Call>, codec: String) {
        call.notify_established();
        call.open_stream(codec.clone(), StreamType::Audio, true);
        call.open_stream(codec, StreamType::Audio, false);
    }

    /// Register an incoming call bridged to the local device
    ///
    /// The call is admitted through the orchestrator first; if the
    /// friend-or-foe policy rejected it, it is returned already
    /// terminated. Otherwise the no-answer decision is made here, once,
    /// and either answers immediately (auto-answer) or arms the watchdog.
    pub async fn incoming_call(
        &self,
        remote_uri: &str,
        remote_display_name: Option<&str>,
    ) -> CoreResult<Arc<Call>> {
        let core = self
            .core
            .upgrade()
            .ok_or_else(|| CoreError::internal_error("call core is gone"))?;

        let call = Call::new(
            CallDirection::Incoming,
            remote_uri,
            remote_display_name.map(str::to_string),
        );
        core.add_call(call.clone())?;
        if call.is_terminated() {
            return Ok(call);
        }

        self.sweep();
        self.calls.insert(call.id(), call.clone());
        call.notify_setup();

        let settings = self.read_settings();
        match settings.no_answer_action() {
            NoAnswerAction::Answer => {
                tracing::debug!(call_id = %call.id(), "auto-answering incoming call");
                Self::establish(&call, self.preferred_codec());
            }
            action => {
                spawn_no_answer_watchdog(&call, settings.reject_delay, action, self.core.clone());
            }
        }
        Ok(call)
    }

    /// Answer a ringing incoming call
    pub fn answer(&self, call_id: &CallId) -> CoreResult<()> {
        let call = self
            .calls
            .get(call_id)
            .map(|entry| entry.value().clone())
            .ok_or(CoreError::CallNotFound { call_id: *call_id })?;
        Self::establish(&call, self.preferred_codec());
        Ok(())
    }
}

#[async_trait]
impl CallManager for LocalManager {
    fn protocol_name(&self) -> &str {
        Self::PROTOCOL
    }

    fn accepted_schemes(&self) -> Vec<String> {
        vec!["pc".to_string(), "local".to_string()]
    }

    async fn dial(&self, uri: &str) -> bool {
        if !self.is_supported_uri(uri) {
            return false;
        }
        let Some(core) = self.core.upgrade() else {
            return false;
        };

        let call = Call::new(CallDirection::Outgoing, uri, None);
        if core.add_call(call.clone()).is_err() {
            return false;
        }
        self.sweep();
        if call.is_terminated() {
            // Policy hung it up; origination itself succeeded
            return true;
        }
        self.calls.insert(call.id(), call.clone());
        call.notify_setup();

        // The local device answers as soon as its path is up
        let codec = self.preferred_codec();
        tokio::spawn(async move {
            Self::establish(&call, codec);
        });
        true
    }

    async fn hang_up(&self) {
        for entry in self.calls.iter() {
            entry.value().hang_up();
        }
        self.calls.clear();
    }

    fn set_reject_delay(&self, delay: Duration) {
        self.update_settings(|s| s.reject_delay = delay);
    }

    fn reject_delay(&self) -> Duration {
        self.read_settings().reject_delay
    }

    fn set_auto_answer(&self, enabled: bool) {
        self.update_settings(|s| s.auto_answer = enabled);
    }

    fn auto_answer(&self) -> bool {
        self.read_settings().auto_answer
    }

    fn set_forward_uri(&self, uri: Option<String>) {
        self.update_settings(|s| s.forward_uri = uri);
    }

    async fn set_codecs(&self, codecs: &mut CodecList) {
        codecs.merge_supported(&self.supported);
        *self.negotiated.write().unwrap_or_else(|e| e.into_inner()) = codecs.clone();
    }

    fn codecs(&self) -> CodecList {
        self.negotiated.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_echo_cancellation(&self, enabled: bool) {
        self.update_settings(|s| s.echo_cancellation = enabled);
    }

    fn set_silence_detection(&self, enabled: bool) {
        self.update_settings(|s| s.silence_detection = enabled);
    }

    fn set_dtmf_mode(&self, mode: DtmfMode) {
        self.update_settings(|s| s.dtmf_mode = mode);
    }

    fn set_display_name(&self, name: String) {
        self.update_settings(|s| s.display_name = name);
    }

    fn settings(&self) -> ManagerSettings {
        self.read_settings()
    }
}
