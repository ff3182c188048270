// Tests for the full call lifecycle through the orchestration root:
// event ordering, registry residency during terminal dispatch, and
// subscriber fault isolation.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use call_engine_core::error::ClearedReason;
use call_engine_core::{
    Call, CallCore, CallManager, CoreEvent, CoreEventHandler, LocalManager, StreamType,
};
use common::*;

#[tokio::test]
async fn test_outgoing_local_call_event_sequence() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    let handler = CollectingHandler::new();
    core.add_event_handler(handler.clone()).await;
    let mut events = core.subscribe_events();

    assert!(core.dial("pc:echo-test").await);

    let created = wait_for_event(&mut events, |e| matches!(e, CoreEvent::CallCreated { .. })).await;
    let call_id = created.call_id().unwrap();

    // Wait until both device streams are up
    wait_for_event(&mut events, |e| {
        matches!(e, CoreEvent::StreamOpened { stream, .. } if !stream.is_transmitting)
    })
    .await;

    let call = core.get_call(&call_id).expect("call should be registered");
    assert!(call.was_established());
    assert_eq!(call.stream_codec(StreamType::Audio, true), call.stream_codec(StreamType::Audio, false));

    core.hang_up().await;
    let seen = collect_call_events(&mut events, call_id).await;
    assert!(matches!(
        seen.last(),
        Some(CoreEvent::CallRemoved { .. })
    ));

    settle().await;
    let kinds = handler.kinds_for(call_id);
    assert_eq!(
        kinds,
        vec![
            "created",
            "setup",
            "established",
            "stream_opened",
            "stream_opened",
            "stream_closed",
            "stream_closed",
            "cleared",
            "removed",
        ]
    );
    assert!(core.get_call(&call_id).is_none());

    let stats = core.stats().await;
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.active_calls, 0);
}

#[tokio::test]
async fn test_cancelling_a_ringing_call_still_clears_it() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    let handler = CollectingHandler::new();
    core.add_event_handler(handler.clone()).await;
    let mut events = core.subscribe_events();

    // Ring without answering, then cancel locally before the delay
    local.set_reject_delay(std::time::Duration::from_secs(30));
    let call = local.incoming_call("pc:caller", None).await.unwrap();
    call.hang_up();

    let seen = collect_call_events(&mut events, call.id()).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        CoreEvent::CallCleared { reason: ClearedReason::LocalHangup, .. }
    )));

    settle().await;
    let kinds = handler.kinds_for(call.id());
    assert_eq!(kinds, vec!["created", "setup", "cleared", "removed"]);
}

#[tokio::test]
async fn test_exactly_one_terminal_event_and_no_leakage() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    let mut events = core.subscribe_events();
    assert!(core.dial("pc:echo-test").await);

    let created = wait_for_event(&mut events, |e| matches!(e, CoreEvent::CallCreated { .. })).await;
    let call_id = created.call_id().unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, CoreEvent::StreamOpened { stream, .. } if !stream.is_transmitting)
    })
    .await;

    let call = core.get_call(&call_id).unwrap();
    call.hang_up();
    // Racing terminations collapse into the first
    call.clear(ClearedReason::NetworkFailure);
    call.hang_up();

    let seen = collect_call_events(&mut events, call_id).await;
    let terminals = seen.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1);

    // Nothing more may surface for this call
    call.open_stream("PCMU", StreamType::Audio, true);
    call.hold();
    settle().await;
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.call_id(), Some(call_id), "event leaked after removal: {:?}", event);
    }
}

/// Records whether the call was still resolvable from the registry when
/// its terminal callback ran
struct ClearedProbe {
    core: Mutex<Option<Weak<CallCore>>>,
    resolvable_during_cleared: AtomicBool,
}

impl ClearedProbe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(None),
            resolvable_during_cleared: AtomicBool::new(false),
        })
    }

    fn bind(&self, core: &Arc<CallCore>) {
        *self.core.lock().unwrap() = Some(Arc::downgrade(core));
    }
}

#[async_trait]
impl CoreEventHandler for ClearedProbe {
    async fn on_call_cleared(&self, call: Arc<Call>, _reason: &ClearedReason) {
        let resolvable = self
            .core
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .and_then(|core| core.get_call(&call.id()))
            .is_some();
        self.resolvable_during_cleared.store(resolvable, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_call_remains_queryable_during_terminal_dispatch() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    let probe = ClearedProbe::new();
    probe.bind(&core);
    core.add_event_handler(probe.clone()).await;
    let mut events = core.subscribe_events();

    assert!(core.dial("pc:echo-test").await);
    let created = wait_for_event(&mut events, |e| matches!(e, CoreEvent::CallCreated { .. })).await;
    let call_id = created.call_id().unwrap();

    core.hang_up().await;
    collect_call_events(&mut events, call_id).await;
    settle().await;

    assert!(probe.resolvable_during_cleared.load(Ordering::SeqCst));
    assert!(core.get_call(&call_id).is_none());
}

/// Panics on establishment to prove fault isolation
struct PanickyHandler;

#[async_trait]
impl CoreEventHandler for PanickyHandler {
    async fn on_call_established(&self, _call: Arc<Call>) {
        panic!("subscriber bug");
    }
}

#[tokio::test]
async fn test_subscriber_panic_does_not_break_delivery() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    core.add_event_handler(Arc::new(PanickyHandler)).await;
    let handler = CollectingHandler::new();
    core.add_event_handler(handler.clone()).await;
    let mut events = core.subscribe_events();

    assert!(core.dial("pc:echo-test").await);
    let created = wait_for_event(&mut events, |e| matches!(e, CoreEvent::CallCreated { .. })).await;
    let call_id = created.call_id().unwrap();
    wait_for_event(&mut events, |e| matches!(e, CoreEvent::CallEstablished { .. })).await;
    settle().await;

    // The handler registered after the panicking one still saw the event
    assert!(handler.kinds_for(call_id).contains(&"established"));
}

#[tokio::test]
async fn test_manager_registration_events() {
    let core = started_core().await;
    let handler = CollectingHandler::new();
    core.add_event_handler(handler.clone()).await;

    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();
    // A second backend for the same protocol is refused
    let dup = LocalManager::new(&core);
    assert!(core.add_manager(dup).await.is_err());

    core.remove_manager("local").await.unwrap();
    assert!(core.remove_manager("local").await.is_err());

    settle().await;
    assert!(handler.has_kind("manager_added"));
    assert!(handler.has_kind("manager_removed"));
    assert_eq!(core.stats().await.registered_managers, 0);
}
