//! Call lifecycle and endpoint orchestration core
//!
//! This crate is the signaling-agnostic heart of a multi-protocol VoIP
//! client: the state machine that tracks every call from dial or invite
//! through ringing, establishment, hold/retrieve and termination, and the
//! orchestration root that fans call events out to whatever is listening:
//! UI layers, notification bridges, statistics collectors.
//!
//! ## Layer separation
//!
//! ```text
//! application / UI
//!        │ events, dial, hang_up
//! ┌──────▼───────────────────────────────┐
//! │ CallCore                             │ ◄── this crate
//! │   manager registry · call registry   │
//! │   event dispatcher · codec aggregate │
//! └──────┬───────────────────────────────┘
//!        │ CallManager trait
//!  ┌─────┴─────┬───────────┐
//!  │ SIP       │ H.323     │ LocalManager (sound device)
//!  │ backend   │ backend   │
//! ```
//!
//! Protocol backends (SIP, H.323) implement the [`CallManager`] trait
//! outside this crate; the wire protocol itself is entirely theirs. The
//! in-tree [`LocalManager`] is the backend for the machine's own audio
//! device.
//!
//! ## Delivery guarantees
//!
//! Backends emit events from their own threads; all subscriber callbacks
//! run on a single dispatcher task. Per call, `CallCreated` always comes
//! first, `CallCleared` or `CallMissed` always comes last, and the call
//! stays resolvable until `CallRemoved` has been delivered.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use call_engine_core::{CallCore, CoreConfig, LocalManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = CallCore::new(
//!     CoreConfig::default().with_codec_order(vec!["PCMU:1".to_string()]),
//! );
//! let local = LocalManager::new(&core);
//! core.add_manager(local).await?;
//! core.start().await?;
//!
//! let mut events = core.subscribe_events();
//! core.dial("pc:echo-test").await;
//! let event = events.recv().await?;
//! println!("first event: {:?}", event);
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod local;
pub mod manager;
pub mod notify;
pub mod policy;

// Public API exports
pub use call::{Call, CallDirection, CallId, CallSnapshot, CallState, CallStatistics, StreamType};
pub use codec::{CodecDescription, CodecKind, CodecList};
pub use config::CoreConfig;
pub use crate::core::{CallCore, CoreStats};
pub use error::{ClearedReason, CoreError, CoreResult};
pub use events::{CoreEvent, CoreEventHandler, EventPriority, StreamInfo};
pub use local::LocalManager;
pub use manager::{
    spawn_no_answer_watchdog, CallManager, DtmfMode, ManagerSettings, NoAnswerAction,
};
pub use notify::{Notification, NotificationAction, NotificationLevel, NotificationSink};
pub use policy::{FriendOrFoe, Verdict};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
