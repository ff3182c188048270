//! Orchestration root for calls and protocol backends
//!
//! [`CallCore`] aggregates every registered [`CallManager`], tracks every
//! active [`Call`], and relays their lifecycle signals to subscribers.
//! It is constructed once by the application root and handed out as an
//! `Arc` to whatever needs it (managers, UI layers, the notification
//! bridge); there is no global accessor.
//!
//! # Structure
//!
//! The implementation is split across this module's files:
//!
//! - `managers`: backend registration and lookup
//! - `calls`: call admission, dial dispatch and hang-up
//! - `codecs`: aggregate codec negotiation across backends
//! - `dispatch`: the single-task event dispatcher
//!
//! # Threading
//!
//! Backends may register calls and emit events from any thread. All
//! subscriber callbacks run on one dispatcher task, in emission order;
//! the registries themselves are concurrently safe, so a backend thread
//! can add a call while the dispatcher is mid-delivery.
//!
//! # Usage
//!
//! ```rust,no_run
//! use call_engine_core::{CallCore, CoreConfig, LocalManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = CallCore::new(CoreConfig::default());
//! let local = LocalManager::new(&core);
//! core.add_manager(local.clone()).await?;
//! core.start().await?;
//!
//! let mut events = core.subscribe_events();
//! if core.dial("pc:test").await {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod calls;
pub mod codecs;
pub mod dispatch;
pub mod managers;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock as StdRwLock, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::call::{Call, CallId};
use crate::codec::CodecList;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::{CoreEvent, CoreEventHandler};
use crate::manager::CallManager;
use crate::notify::NotificationSink;
use crate::policy::FriendOrFoe;

/// Statistics about the orchestrator's current activity
#[derive(Debug, Clone)]
pub struct CoreStats {
    /// Whether the dispatcher is running
    pub is_running: bool,
    /// Number of registered protocol backends
    pub registered_managers: usize,
    /// Number of calls currently in the registry
    pub active_calls: usize,
    /// Calls handled since construction
    pub total_calls: u64,
    /// Missed calls since construction
    pub missed_calls: u64,
}

/// Process-wide call orchestration root
pub struct CallCore {
    pub(crate) config: CoreConfig,
    /// Registered backends, in registration order (dial dispatch order)
    pub(crate) managers: RwLock<Vec<Arc<dyn CallManager>>>,
    /// Active calls by id
    pub(crate) calls: Arc<DashMap<CallId, Arc<Call>>>,
    /// Ordered subscriber callbacks
    pub(crate) handlers: RwLock<Vec<Arc<dyn CoreEventHandler>>>,
    /// Friend-or-foe policy, lookup only, never extends its lifetime
    policy: StdRwLock<Option<Weak<dyn FriendOrFoe>>>,
    /// Notification backend, lookup only, never extends its lifetime
    notifier: StdRwLock<Option<Weak<dyn NotificationSink>>>,
    pub(crate) event_tx: UnboundedSender<CoreEvent>,
    event_rx: Mutex<Option<UnboundedReceiver<CoreEvent>>>,
    pub(crate) broadcast_tx: broadcast::Sender<CoreEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
    pub(crate) total_calls: AtomicU64,
    pub(crate) missed_calls: AtomicU64,
}

impl std::fmt::Debug for CallCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCore")
            .field("is_running", &self.is_running())
            .field("active_calls", &self.calls.len())
            .finish()
    }
}

impl CallCore {
    /// Create an orchestrator
    ///
    /// Register managers and subscribers, then call [`start`](Self::start)
    /// to begin event delivery.
    pub fn new(config: CoreConfig) -> Arc<Self> {
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(config.event_channel_capacity);
        Arc::new(Self {
            config,
            managers: RwLock::new(Vec::new()),
            calls: Arc::new(DashMap::new()),
            handlers: RwLock::new(Vec::new()),
            policy: StdRwLock::new(None),
            notifier: StdRwLock::new(None),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            broadcast_tx,
            dispatcher: Mutex::new(None),
            is_running: AtomicBool::new(false),
            total_calls: AtomicU64::new(0),
            missed_calls: AtomicU64::new(0),
        })
    }

    /// Start the event dispatcher and apply the persisted codec order
    ///
    /// Managers registered before `start` receive the configured codec
    /// preference; events queued during setup are delivered once the
    /// dispatcher runs. A core is started once and stopped at shutdown.
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyRunning);
        }
        let rx = self
            .lock_queue()
            .take()
            .ok_or_else(|| CoreError::internal_error("event queue already consumed"))?;

        let weak = Arc::downgrade(self);
        *self.lock_dispatcher() = Some(tokio::spawn(dispatch::run_dispatcher(weak, rx)));
        tracing::info!("call core started");

        if !self.config.codec_order.is_empty() {
            let mut list = CodecList::load(&self.config.codec_order)?;
            self.set_codecs(&mut list).await;
        }
        Ok(())
    }

    /// Stop event delivery
    ///
    /// Pending events are dropped; managers keep their own state and must
    /// be shut down by their owner.
    pub async fn stop(&self) -> CoreResult<()> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(CoreError::NotRunning);
        }
        if let Some(task) = self.lock_dispatcher().take() {
            task.abort();
        }
        tracing::info!("call core stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Register an ordered event subscriber
    pub async fn add_event_handler(&self, handler: Arc<dyn CoreEventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Take a broadcast receiver for the event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Install the friend-or-foe policy
    ///
    /// Only a weak handle is kept; when the policy is dropped the check
    /// is skipped and calls are admitted as unknown.
    pub fn set_friend_or_foe<P>(&self, policy: &Arc<P>)
    where
        P: FriendOrFoe + 'static,
    {
        let coerced: Arc<dyn FriendOrFoe> = policy.clone();
        let weak: Weak<dyn FriendOrFoe> = Arc::downgrade(&coerced);
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = Some(weak);
    }

    /// Install the notification backend
    ///
    /// Only a weak handle is kept; when the sink is gone, missed-call
    /// notifications are skipped.
    pub fn set_notification_sink<S>(&self, sink: &Arc<S>)
    where
        S: NotificationSink + 'static,
    {
        let coerced: Arc<dyn NotificationSink> = sink.clone();
        let weak: Weak<dyn NotificationSink> = Arc::downgrade(&coerced);
        *self.notifier.write().unwrap_or_else(|e| e.into_inner()) = Some(weak);
    }

    pub(crate) fn policy_handle(&self) -> Option<Arc<dyn FriendOrFoe>> {
        self.policy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn notifier_handle(&self) -> Option<Arc<dyn NotificationSink>> {
        self.notifier
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Look up an active call
    pub fn get_call(&self, call_id: &CallId) -> Option<Arc<Call>> {
        self.calls.get(call_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all currently registered calls
    pub fn active_calls(&self) -> Vec<Arc<Call>> {
        self.calls.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Current activity counters
    pub async fn stats(&self) -> CoreStats {
        CoreStats {
            is_running: self.is_running(),
            registered_managers: self.managers.read().await.len(),
            active_calls: self.calls.len(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            missed_calls: self.missed_calls.load(Ordering::Relaxed),
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Option<UnboundedReceiver<CoreEvent>>> {
        self.event_rx.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_dispatcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.dispatcher.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CallCore {
    fn drop(&mut self) {
        if let Some(task) = self.lock_dispatcher().take() {
            task.abort();
        }
    }
}

/// Call ids that already saw their terminal event
///
/// The dispatcher uses this to guarantee nothing is delivered for a call
/// after its `CallCleared`/`CallMissed` has gone out.
pub(crate) type TerminatedSet = HashSet<CallId>;
