//! Call admission, dial dispatch and hang-up

use std::sync::Arc;

use crate::call::{Call, SignalScope};
use crate::error::{CoreError, CoreResult};
use crate::events::CoreEvent;
use crate::policy::Verdict;

impl super::CallCore {
    /// Admit a freshly created call into the orchestrator
    ///
    /// The admission sequence is deliberate and observable:
    ///
    /// 1. the call's universal signals (ringing, missed, cleared) are
    ///    wired and `CallCreated` is emitted, unconditionally;
    /// 2. the friend-or-foe policy judges the remote URI;
    /// 3. a `Foe` verdict hangs the call up on the spot. The call has
    ///    still appeared in the registry and still fired `CallCreated`,
    ///    so observers that log every call, rejected ones included, see
    ///    it; its terminal event follows through the universal wiring.
    /// 4. any other verdict upgrades the wiring to the full signal set.
    ///
    /// The policy check runs synchronously on the caller's thread, so
    /// policy implementations must not block.
    pub fn add_call(&self, call: Arc<Call>) -> CoreResult<Arc<Call>> {
        if !self.is_running() {
            return Err(CoreError::NotRunning);
        }

        call.attach_sink(self.event_tx.clone(), SignalScope::Universal);

        match self.calls.entry(call.id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CoreError::CallAlreadyRegistered { call_id: call.id() });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(call.clone());
            }
        }
        self.total_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let _ = self.event_tx.send(CoreEvent::CallCreated { call_id: call.id() });

        let remote_uri = call.remote_uri();
        let verdict = self
            .policy_handle()
            .map(|policy| policy.decide("call", &remote_uri))
            .unwrap_or(Verdict::Unknown);

        if verdict.is_foe() {
            tracing::info!(call_id = %call.id(), remote = %remote_uri, "hanging up call from blacklisted party");
            call.hang_up();
            return Ok(call);
        }

        call.set_signal_scope(SignalScope::Full);
        tracing::debug!(call_id = %call.id(), remote = %remote_uri, ?verdict, "call admitted");
        Ok(call)
    }

    /// Route a dial target to the first backend that takes it
    ///
    /// Managers are tried in registration order. A manager that declares
    /// URI schemes and does not match the target is skipped without being
    /// asked; otherwise its `dial` decides. The first success
    /// short-circuits the scan.
    pub async fn dial(&self, uri: &str) -> bool {
        if !self.is_running() {
            tracing::warn!(%uri, "dial attempted while the core is not running");
            return false;
        }
        let managers = self.managers.read().await.clone();
        for manager in managers {
            if !manager.accepted_schemes().is_empty() && !manager.is_supported_uri(uri) {
                continue;
            }
            if manager.dial(uri).await {
                tracing::info!(%uri, protocol = manager.protocol_name(), "dial dispatched");
                return true;
            }
        }
        tracing::debug!(%uri, "no manager could route the dial target");
        false
    }

    /// Hang up everything, on every registered backend
    pub async fn hang_up(&self) {
        let managers = self.managers.read().await.clone();
        for manager in managers {
            manager.hang_up().await;
        }
    }
}
