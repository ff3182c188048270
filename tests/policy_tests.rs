// Tests for friend-or-foe admission: rejected calls are still observable,
// admitted calls get the full signal set, and a dropped policy object
// simply disables the check.

mod common;

use call_engine_core::{CallManager, CoreEvent, LocalManager};
use common::*;

#[tokio::test]
async fn test_foe_call_is_created_then_hung_up_and_never_established() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    let policy = StaticPolicy::new(&["sip:spammer@example.com"]);
    core.set_friend_or_foe(&policy);

    // Subscriber registered before the call arrives
    let handler = CollectingHandler::new();
    core.add_event_handler(handler.clone()).await;
    let mut events = core.subscribe_events();

    let call = local
        .incoming_call("sip:spammer@example.com", Some("Spammer"))
        .await
        .unwrap();
    assert!(call.is_terminated());

    let seen = collect_call_events(&mut events, call.id()).await;
    settle().await;

    let kinds = handler.kinds_for(call.id());
    // The rejected call still fired its creation, then its terminal event
    assert_eq!(kinds.first(), Some(&"created"));
    assert!(!kinds.contains(&"established"));
    assert!(!kinds.contains(&"setup"));
    assert!(kinds.contains(&"cleared"));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, CoreEvent::CallEstablished { .. })));
    assert!(core.get_call(&call.id()).is_none());
}

#[tokio::test]
async fn test_unknown_caller_is_admitted_with_full_signals() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    let policy = StaticPolicy::new(&["sip:spammer@example.com"]);
    core.set_friend_or_foe(&policy);

    let handler = CollectingHandler::new();
    core.add_event_handler(handler.clone()).await;
    let mut events = core.subscribe_events();

    local.set_auto_answer(true);
    let call = local
        .incoming_call("sip:friend@example.com", Some("A Friend"))
        .await
        .unwrap();

    wait_for_event(&mut events, |e| matches!(e, CoreEvent::CallEstablished { .. })).await;
    settle().await;

    let kinds = handler.kinds_for(call.id());
    assert!(kinds.contains(&"setup"));
    assert!(kinds.contains(&"established"));
}

#[tokio::test]
async fn test_dropped_policy_disables_the_check() {
    let core = started_core().await;
    let local = LocalManager::new(&core);
    core.add_manager(local.clone()).await.unwrap();

    {
        let policy = StaticPolicy::new(&["sip:spammer@example.com"]);
        core.set_friend_or_foe(&policy);
        // The policy service goes away during teardown
    }

    let mut events = core.subscribe_events();
    local.set_auto_answer(true);
    let call = local
        .incoming_call("sip:spammer@example.com", None)
        .await
        .unwrap();

    // With the policy gone, the formerly blacklisted caller is admitted
    assert!(!call.is_terminated());
    wait_for_event(&mut events, |e| matches!(e, CoreEvent::CallEstablished { .. })).await;
}
