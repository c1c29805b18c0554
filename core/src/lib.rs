//! Nudge core: push messages into conversations that are no longer active.
//!
//! A user registers a conversation under a username (`reg alice`). Later a
//! live command (`send alice build is green`) or a system event
//! (`notifyEvent {username, message}`) resumes that conversation through the
//! channel adapter and posts the message there, bumping the user's delivery
//! counter in the same step.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;
pub mod transport;
pub mod turn;

mod integration_tests;

// Re-exports for convenience
pub use command::{Action, CommandInterpreter, InboundEvent, NOTIFY_EVENT};
pub use config::Config;
pub use engine::{DeliveryReceipt, DeliveryState, ProactiveContinuationEngine};
pub use error::{NudgeError, Result};
pub use registry::{NotifyRegistry, RegistryEntry, RegistrySlot};
pub use session::{Participant, SessionHandle};
pub use store::{FileStore, MemoryStore, RegistryStore};
pub use transport::{ConversationAdapter, InMemoryAdapter, ResumedTurn};
pub use turn::{Activity, InboundTurn, TurnController};
